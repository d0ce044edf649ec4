//! # Sysctl Access Layer
//!
//! Reads and writes kernel parameter files under `/proc/sys`, scoped to a
//! network namespace. A dotted parameter name maps to a path by literal
//! dot-to-slash substitution (`net.core.somaxconn` →
//! `/proc/sys/net/core/somaxconn`).
//!
//! Writes are change-detected: if the requested values exactly match the
//! current ones the write is skipped, avoiding redundant and possibly
//! privilege-sensitive writes. The comparison deliberately reads the
//! *global*-namespace value even for a namespaced target; this mirrors the
//! long-standing daemon behavior and is kept as documented semantics.

use std::path::{Path, PathBuf};

use log::debug;

use crate::domain::TunerError;
use crate::netns::{NetnsGuard, NetnsHandle};

/// Fixed kernel-parameter root.
pub const PROC_SYS: &str = "/proc/sys";

/// Maximum number of whitespace-separated integers read from one
/// parameter file (the widest kernel tunables, e.g. `tcp_mem`, carry 3).
pub const MAX_SYSCTL_VALUES: usize = 3;

/// Outcome of a change-detected write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The parameter file was actually written.
    Written,
    /// Requested values already matched; no filesystem write happened.
    Skipped,
}

/// Namespace-scoped accessor for kernel parameter files.
///
/// The root is injectable so tests can point it at a fake `/proc/sys`
/// tree; production code uses [`SysctlAccess::default`].
#[derive(Debug, Clone)]
pub struct SysctlAccess {
    root: PathBuf,
}

impl Default for SysctlAccess {
    fn default() -> Self {
        Self::new(PROC_SYS)
    }
}

impl SysctlAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Derive the parameter file path for a dotted name.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name.replace('.', "/"))
    }

    /// Read up to [`MAX_SYSCTL_VALUES`] integers from the named parameter,
    /// inside namespace `ns` for the duration of the call.
    ///
    /// # Errors
    /// [`TunerError::SysctlNotFound`] if the file yields zero values;
    /// open/read failures surface as the underlying I/O error.
    pub fn read(&self, ns: &NetnsHandle, name: &str) -> Result<Vec<i64>, TunerError> {
        let path = self.path_for(name);
        let _guard = NetnsGuard::enter(ns)?;
        let raw = std::fs::read_to_string(&path)?;
        let values = parse_values(&raw);
        if values.is_empty() {
            return Err(TunerError::SysctlNotFound(name.to_string()));
        }
        for (i, v) in values.iter().enumerate() {
            debug!("read {name}[{i}] = {v}");
        }
        Ok(values)
    }

    /// Write `values` to the named parameter inside namespace `ns`, unless
    /// the current values already match exactly (same count, same order),
    /// in which case the write is skipped.
    ///
    /// Change detection always compares against the global-namespace
    /// current values (see module docs).
    ///
    /// # Errors
    /// Propagates the change-detection read error or the write failure;
    /// there is no rollback because nothing was mutated before the failure.
    pub fn write(
        &self,
        ns: &NetnsHandle,
        name: &str,
        values: &[i64],
    ) -> Result<WriteOutcome, TunerError> {
        let path = self.path_for(name);
        debug!("writing sysctl '{}' (netns {})", path.display(), if ns.is_global() { "global" } else { "non-global" });

        let old_values = self.read(&NetnsHandle::Global, name)?;
        if old_values == values {
            return Ok(WriteOutcome::Skipped);
        }

        let _guard = NetnsGuard::enter(ns)?;
        write_values(&path, values)?;
        for (i, v) in values.iter().enumerate() {
            debug!("wrote {name}[{i}] = {v}");
        }
        Ok(WriteOutcome::Written)
    }
}

/// Parse whitespace-separated integers, stopping at the first token that
/// is not an integer (fscanf-style), capped at [`MAX_SYSCTL_VALUES`].
fn parse_values(raw: &str) -> Vec<i64> {
    raw.split_whitespace()
        .map_while(|tok| tok.parse::<i64>().ok())
        .take(MAX_SYSCTL_VALUES)
        .collect()
}

fn write_values(path: &Path, values: &[i64]) -> Result<(), TunerError> {
    let line =
        values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
    std::fs::write(path, line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_sysctl(dir: &TempDir, name: &str, contents: &str) -> SysctlAccess {
        let access = SysctlAccess::new(dir.path());
        let path = access.path_for(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
        access
    }

    #[test]
    fn test_path_derivation() {
        let access = SysctlAccess::default();
        assert_eq!(
            access.path_for("net.ipv4.tcp_rmem"),
            PathBuf::from("/proc/sys/net/ipv4/tcp_rmem")
        );
    }

    #[test]
    fn test_read_multiple_values() {
        let dir = TempDir::new().unwrap();
        let access = fake_sysctl(&dir, "net.ipv4.tcp_rmem", "4096\t131072\t6291456\n");
        let values = access.read(&NetnsHandle::Global, "net.ipv4.tcp_rmem").unwrap();
        assert_eq!(values, vec![4096, 131_072, 6_291_456]);
    }

    #[test]
    fn test_read_empty_is_not_found() {
        let dir = TempDir::new().unwrap();
        let access = fake_sysctl(&dir, "net.foo.bar", "\n");
        let err = access.read(&NetnsHandle::Global, "net.foo.bar").unwrap_err();
        assert!(matches!(err, TunerError::SysctlNotFound(_)));
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let access = SysctlAccess::new(dir.path());
        let err = access.read(&NetnsHandle::Global, "net.absent").unwrap_err();
        assert!(matches!(err, TunerError::Io(_)));
    }

    #[test]
    fn test_write_idempotence() {
        let dir = TempDir::new().unwrap();
        let access = fake_sysctl(&dir, "net.core.somaxconn", "128\n");

        let first = access.write(&NetnsHandle::Global, "net.core.somaxconn", &[4096]).unwrap();
        assert_eq!(first, WriteOutcome::Written);

        // Identical values: at most one actual filesystem write.
        let second = access.write(&NetnsHandle::Global, "net.core.somaxconn", &[4096]).unwrap();
        assert_eq!(second, WriteOutcome::Skipped);

        let on_disk = fs::read_to_string(access.path_for("net.core.somaxconn")).unwrap();
        assert_eq!(on_disk.trim(), "4096");
    }

    #[test]
    fn test_write_value_order_matters() {
        let dir = TempDir::new().unwrap();
        let access = fake_sysctl(&dir, "net.ipv4.tcp_wmem", "1 2 3");
        // Same multiset, different order: must still write.
        let outcome = access.write(&NetnsHandle::Global, "net.ipv4.tcp_wmem", &[3, 2, 1]).unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        let on_disk = fs::read_to_string(access.path_for("net.ipv4.tcp_wmem")).unwrap();
        assert_eq!(on_disk, "3 2 1");
    }
}

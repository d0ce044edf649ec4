//! Namespace switch primitive
//!
//! A netns switch is a per-thread, globally visible rebinding of the
//! calling thread. [`NetnsGuard`] guarantees the original namespace is
//! restored on every exit path, including failure paths; a failed save or
//! failed switch leaves the caller's namespace unchanged and is reported.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use log::error;

use crate::domain::TunerError;

/// A handle onto one network namespace.
///
/// `Global` means "stay in the current/global namespace"; switching to it
/// is a no-op. A real handle is an open `ns/net` (or nsfs mountpoint) file.
#[derive(Debug)]
pub enum NetnsHandle {
    Global,
    Fd(File),
}

impl NetnsHandle {
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, NetnsHandle::Global)
    }
}

/// Enter `setns(2)` with `CLONE_NEWNET`.
#[allow(unsafe_code)]
fn setns(fd: RawFd) -> Result<(), TunerError> {
    // SAFETY: plain FFI; fd validity is the caller's invariant.
    let ret = unsafe { libc::setns(fd, libc::CLONE_NEWNET) };
    if ret < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// RAII guard around a namespace switch.
///
/// Construction saves the caller's current namespace and switches; Drop
/// restores the original. Entering [`NetnsHandle::Global`] performs no
/// switch at all.
#[derive(Debug)]
pub struct NetnsGuard {
    orig: Option<File>,
}

impl NetnsGuard {
    /// Switch the calling thread into `ns`.
    ///
    /// # Errors
    /// If saving `/proc/self/ns/net` or the switch itself fails, the error
    /// is returned and the caller's namespace is unchanged.
    pub fn enter(ns: &NetnsHandle) -> Result<Self, TunerError> {
        match ns {
            NetnsHandle::Global => Ok(Self { orig: None }),
            NetnsHandle::Fd(target) => Self::enter_raw(target.as_raw_fd()),
        }
    }

    /// Switch to the namespace behind a raw fd (an open `ns/net` file).
    ///
    /// # Errors
    /// Same contract as [`NetnsGuard::enter`].
    pub fn enter_raw(target: RawFd) -> Result<Self, TunerError> {
        let orig = File::open("/proc/self/ns/net")?;
        setns(target)?;
        Ok(Self { orig: Some(orig) })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Some(orig) = self.orig.take() {
            if let Err(e) = setns(orig.as_raw_fd()) {
                // Cannot propagate from Drop; a thread stuck in a foreign
                // namespace is a serious condition, so shout.
                error!("could not restore original netns: {e}");
            }
        }
    }
}

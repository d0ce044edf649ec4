//! Process-scoped tuning context
//!
//! One [`TuneContext`] owns everything the daemon used to keep in hidden
//! process-wide state: the shared map handles, probed capability flags, the
//! global netns cookie, the stop flag and the sysctl accessor. It is
//! created at daemon start, passed to every core operation, and torn down
//! at daemon stop.
//!
//! Concurrency contract: the context performs no internal locking. Load
//! and teardown phases must never overlap the dispatch loop's lifetime;
//! the surrounding process guarantees that sequencing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::domain::{NetnsCookie, SupportLevel};
use crate::mux::{self, SharedMaps};
use crate::sysctl::SysctlAccess;

/// Static daemon configuration, resolved by the binary before the context
/// is built.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding the probe and tuner BPF object files.
    pub bpf_dir: PathBuf,
    /// bpffs directory the shared maps are pinned under.
    pub pin_dir: PathBuf,
    /// Kernel parameter root; overridable for tests.
    pub sysctl_root: PathBuf,
    /// Standing override forcing legacy BPF support regardless of probing.
    pub force_legacy: bool,
    /// Dispatch loop poll timeout; bounds shutdown latency.
    pub poll_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bpf_dir: PathBuf::from("/usr/lib/kerntuned"),
            pin_dir: PathBuf::from("/sys/fs/bpf/kerntuned"),
            sysctl_root: PathBuf::from(crate::sysctl::PROC_SYS),
            force_legacy: false,
            poll_timeout: Duration::from_millis(1000),
        }
    }
}

/// The explicit owner of all process-wide mutable tuning state.
pub struct TuneContext {
    /// The two process-wide shared kernel resources.
    pub shared: SharedMaps,
    /// BPF feature level yielded by probing; [`SupportLevel::None`] until
    /// [`TuneContext::probe`] runs.
    pub support: SupportLevel,
    /// Standing force-legacy override (see [`TuneContext::effective_support`]).
    pub force_legacy: bool,
    /// Whether the kernel exposes `SO_NETNS_COOKIE`; gates the whole
    /// namespace correlation engine.
    pub netns_cookie_supported: bool,
    /// Cookie of the namespace the daemon itself runs in.
    pub global_netns_cookie: NetnsCookie,
    /// Sysctl accessor, shared by all tuners.
    pub sysctl: SysctlAccess,
    /// Directory holding tuner BPF objects.
    pub bpf_dir: PathBuf,
    /// Dispatch loop poll timeout.
    pub poll_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl TuneContext {
    /// Build a context from configuration. Performs no kernel probing;
    /// call [`TuneContext::probe`] before loading tuners.
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            shared: SharedMaps::new(config.pin_dir),
            support: SupportLevel::None,
            force_legacy: config.force_legacy,
            netns_cookie_supported: false,
            global_netns_cookie: NetnsCookie::GLOBAL,
            sysctl: SysctlAccess::new(config.sysctl_root),
            bpf_dir: config.bpf_dir,
            poll_timeout: config.poll_timeout,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run capability probing: BPF feature level and netns cookie support.
    pub fn probe(&mut self) {
        self.support = mux::probe_support(&self.bpf_dir);
        self.netns_cookie_supported = crate::netns::cookie_supported();
        info!(
            "bpf support level {}, netns cookies {}",
            self.effective_support(),
            if self.netns_cookie_supported { "supported" } else { "unsupported" }
        );
    }

    /// Probed support level, capped at Legacy when the standing override
    /// is set.
    #[must_use]
    pub fn effective_support(&self) -> SupportLevel {
        if self.force_legacy && self.support > SupportLevel::Legacy {
            debug!("legacy bpf forced by override");
            return SupportLevel::Legacy;
        }
        self.support
    }

    /// Clone of the cooperative stop flag, for signal handlers.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Request dispatch loop shutdown; observed between poll calls only.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_legacy_caps_support() {
        let mut ctx = TuneContext::new(DaemonConfig::default());
        ctx.support = SupportLevel::Normal;
        assert_eq!(ctx.effective_support(), SupportLevel::Normal);
        ctx.force_legacy = true;
        assert_eq!(ctx.effective_support(), SupportLevel::Legacy);
        // The override never upgrades a lesser level.
        ctx.support = SupportLevel::None;
        assert_eq!(ctx.effective_support(), SupportLevel::None);
    }

    #[test]
    fn test_stop_flag_shared() {
        let ctx = TuneContext::new(DaemonConfig::default());
        let flag = ctx.stop_flag();
        assert!(!ctx.should_stop());
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(ctx.should_stop());
    }
}

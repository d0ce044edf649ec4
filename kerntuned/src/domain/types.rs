//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a scenario index
//! where a tuner id is expected, and make function signatures more
//! expressive.

use std::fmt;

/// Tuner ID (dense, 0-based)
///
/// Assigned sequentially by the registry at load time. Carried by every
/// event record so the dispatch loop can route to the owning tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunerId(pub u32);

impl fmt::Display for TunerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tuner#{}", self.0)
    }
}

impl TunerId {
    /// Index into the registry table.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Network namespace cookie
///
/// Opaque kernel identifier correlating an event to one network namespace.
/// Cookie 0 denotes the global/default namespace everywhere in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetnsCookie(pub u64);

impl NetnsCookie {
    /// The always-present global namespace cookie.
    pub const GLOBAL: NetnsCookie = NetnsCookie(0);

    #[must_use]
    pub fn is_global(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NetnsCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "netns:{:#x}", self.0)
    }
}

/// Tuner lifecycle state
///
/// A tuner is `Active` from successful registration until teardown; the
/// terminal state passed to teardown distinguishes an administratively
/// disabled tuner from one removed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerState {
    Active,
    Inactive,
    Removed,
}

impl fmt::Display for TunerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunerState::Active => "active",
            TunerState::Inactive => "inactive",
            TunerState::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

/// Kernel BPF feature level, as determined by capability probing
///
/// Ordered so that comparisons read naturally: `support < Normal` means the
/// full-feature probe failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupportLevel {
    /// Neither probe image loads; tuners cannot run.
    None,
    /// Only the legacy probe loads; tuners should avoid newer program types.
    Legacy,
    /// Full feature set available.
    Normal,
}

impl fmt::Display for SupportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupportLevel::None => "none",
            SupportLevel::Legacy => "legacy",
            SupportLevel::Normal => "normal",
        };
        write!(f, "{s}")
    }
}

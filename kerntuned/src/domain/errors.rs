//! Structured error types for kerntuned
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Initialization failures are fatal only to the tuner being initialized;
//! runtime failures are logged and the operation abandoned.

use super::types::NetnsCookie;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunerError {
    #[error("tuner table full, cannot register more than {0} tuners")]
    CapacityExceeded(usize),

    #[error("no tunable at index {index} for tuner '{tuner}'")]
    TunableNotFound { tuner: String, index: usize },

    #[error("no scenario at index {index} for tuner '{tuner}'")]
    ScenarioNotFound { tuner: String, index: usize },

    #[error("tunable '{name}': expected {expected} values, kernel has {actual}")]
    ValueCountMismatch { name: String, expected: usize, actual: usize },

    #[error("sysctl '{0}' not found")]
    SysctlNotFound(String),

    #[error("no namespace found for cookie {0}")]
    CookieNotFound(NetnsCookie),

    #[error("no loaded BPF object for tuner '{0}'")]
    NoBpfObject(String),

    #[error("program '{0}' not found in BPF object")]
    ProgramNotFound(String),

    #[error("shared map '{0}' not found in BPF object")]
    SharedMapNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bpf(#[from] aya::EbpfError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_display() {
        let err = TunerError::CapacityExceeded(64);
        assert_eq!(err.to_string(), "tuner table full, cannot register more than 64 tuners");
    }

    #[test]
    fn test_value_count_mismatch_display() {
        let err = TunerError::ValueCountMismatch {
            name: "net.ipv4.tcp_rmem".to_string(),
            expected: 3,
            actual: 1,
        };
        assert!(err.to_string().contains("net.ipv4.tcp_rmem"));
        assert!(err.to_string().contains("expected 3"));
    }
}

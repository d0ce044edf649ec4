//! Built-in tuners
//!
//! The interesting per-subsystem heuristics live outside the core; this
//! module carries the compiled-in set the daemon registers at startup.
//! `backlog` doubles as the reference implementation of the plugin
//! contract.

pub mod backlog;

use crate::registry::TunerPlugin;

/// The tuners registered by the daemon binary, in load order.
#[must_use]
pub fn builtin() -> Vec<Box<dyn TunerPlugin>> {
    vec![Box::new(backlog::BacklogTuner::default())]
}

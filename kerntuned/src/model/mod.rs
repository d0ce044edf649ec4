//! # Tunable/Scenario Model
//!
//! Per-tuner bookkeeping: the declared tunables, the immutable scenario
//! catalog, and occurrence statistics split by global/non-global scope.
//!
//! Shape is fixed at registration time (only values and counters mutate
//! afterwards): counter arrays are sized to the scenario catalog, and a
//! sysctl tunable's live kernel values are captured as both the "initial"
//! and "current" baseline. A mismatch between the declared value count and
//! what the kernel actually exposes is a hard registration failure for the
//! whole tuner.

use log::{debug, info};

use crate::domain::TunerError;
use crate::netns::NetnsHandle;
use crate::registry::Tuner;
use crate::sysctl::{SysctlAccess, WriteOutcome};

/// What kind of knob a tunable is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunableKind {
    /// A kernel parameter under `/proc/sys`; gets a live baseline at
    /// registration and value caching on write.
    Sysctl,
    /// Anything else a tuner adjusts (e.g. a BPF map value); the model
    /// only keeps occurrence statistics for these.
    Other,
}

/// Static descriptor of one tunable, declared by the plugin.
#[derive(Debug, Clone)]
pub struct TunableDesc {
    pub name: String,
    pub kind: TunableKind,
    /// Whether writes may target a non-global namespace; non-namespaced
    /// tunables are always written globally.
    pub namespaced: bool,
    /// Number of values the parameter carries (e.g. 3 for `tcp_rmem`).
    pub num_values: usize,
}

impl TunableDesc {
    pub fn sysctl(name: impl Into<String>, namespaced: bool, num_values: usize) -> Self {
        Self { name: name.into(), kind: TunableKind::Sysctl, namespaced, num_values }
    }

    pub fn other(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: TunableKind::Other, namespaced: false, num_values: 0 }
    }
}

/// Immutable catalog entry describing one condition that triggers tuning.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: String,
}

impl Scenario {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

/// One tunable's runtime state.
#[derive(Debug)]
pub struct Tunable {
    pub desc: TunableDesc,
    /// Values captured at registration; never updated afterwards.
    pub initial: Vec<i64>,
    /// Values as of the last confirmed successful write.
    pub current: Vec<i64>,
    global_hits: Vec<u64>,
    nonglobal_hits: Vec<u64>,
}

impl Tunable {
    fn new(desc: TunableDesc, values: Vec<i64>, num_scenarios: usize) -> Self {
        Self {
            desc,
            current: values.clone(),
            initial: values,
            global_hits: vec![0; num_scenarios],
            nonglobal_hits: vec![0; num_scenarios],
        }
    }

    /// Occurrences of `scenario` in the global namespace.
    #[must_use]
    pub fn global_count(&self, scenario: usize) -> u64 {
        self.global_hits.get(scenario).copied().unwrap_or(0)
    }

    /// Occurrences of `scenario` in any non-global namespace.
    #[must_use]
    pub fn nonglobal_count(&self, scenario: usize) -> u64 {
        self.nonglobal_hits.get(scenario).copied().unwrap_or(0)
    }
}

/// Log one occurrence and bump the matching counter. Free function taking
/// split borrows so callers can hold the scenario catalog and the mutable
/// tunable at the same time.
fn log_and_count(scenario: &Scenario, tunable: &mut Tunable, index: usize, global: bool, message: &str) {
    if global {
        tunable.global_hits[index] += 1;
    } else {
        tunable.nonglobal_hits[index] += 1;
    }
    info!(
        "Scenario '{}' occurred for tunable '{}' in {}global ns. {} {}",
        scenario.name,
        tunable.desc.name,
        if global { "" } else { "non-" },
        scenario.description,
        message
    );
    debug!(
        "updated stat for tunable {}, scenario {index}: {}",
        tunable.desc.name,
        if global { tunable.global_hits[index] } else { tunable.nonglobal_hits[index] }
    );
}

fn join_values(values: &[i64]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

impl Tuner {
    /// Register this tuner's tunables and scenario catalog.
    ///
    /// Sysctl-kind descriptors get their live kernel value(s) read and
    /// recorded as both initial and current baseline.
    ///
    /// # Errors
    /// A read failure or a value-count mismatch fails registration of the
    /// whole tuner; no partial table is kept.
    pub fn register_tunables(
        &mut self,
        descs: Vec<TunableDesc>,
        scenarios: Vec<Scenario>,
        sysctl: &SysctlAccess,
    ) -> Result<(), TunerError> {
        let mut tunables = Vec::with_capacity(descs.len());
        for desc in descs {
            let values = if desc.kind == TunableKind::Sysctl {
                let values = sysctl.read(&NetnsHandle::Global, &desc.name)?;
                if values.len() != desc.num_values {
                    return Err(TunerError::ValueCountMismatch {
                        name: desc.name,
                        expected: desc.num_values,
                        actual: values.len(),
                    });
                }
                values
            } else {
                Vec::new()
            };
            tunables.push(Tunable::new(desc, values, scenarios.len()));
        }
        self.scenarios = scenarios;
        self.tunables = tunables;
        Ok(())
    }

    /// Bounds-checked tunable access.
    #[must_use]
    pub fn tunable(&self, index: usize) -> Option<&Tunable> {
        self.tunables.get(index)
    }

    #[must_use]
    pub fn num_tunables(&self) -> usize {
        self.tunables.len()
    }

    #[must_use]
    pub fn scenario(&self, index: usize) -> Option<&Scenario> {
        self.scenarios.get(index)
    }

    /// Record one occurrence of `scenario` for `tunable` without touching
    /// the kernel. Scope is global iff `ns` denotes the global namespace.
    ///
    /// # Errors
    /// Unknown tunable or scenario indices.
    pub fn record_occurrence(
        &mut self,
        tunable: usize,
        scenario: usize,
        ns: &NetnsHandle,
        message: &str,
    ) -> Result<(), TunerError> {
        let sc = self.scenarios.get(scenario).ok_or_else(|| TunerError::ScenarioNotFound {
            tuner: self.name().to_string(),
            index: scenario,
        })?;
        let name = self.name().to_string();
        let t = self
            .tunables
            .get_mut(tunable)
            .ok_or(TunerError::TunableNotFound { tuner: name, index: tunable })?;
        log_and_count(sc, t, scenario, ns.is_global(), message);
        Ok(())
    }

    /// Write a sysctl tunable and, only on success, update its cached
    /// current values and record the occurrence. On failure neither the
    /// cache nor the counters change and the error is returned unmodified.
    ///
    /// Non-namespaced tunables are always written in the global namespace,
    /// whatever `ns` says; the occurrence scope still follows `ns`.
    ///
    /// # Errors
    /// Unknown indices, a value-count mismatch against the descriptor, or
    /// the underlying write failure.
    pub fn apply_and_record(
        &mut self,
        sysctl: &SysctlAccess,
        tunable: usize,
        scenario: usize,
        ns: &NetnsHandle,
        values: &[i64],
        message: &str,
    ) -> Result<WriteOutcome, TunerError> {
        let name = self.name().to_string();
        let sc = self.scenarios.get(scenario).ok_or_else(|| TunerError::ScenarioNotFound {
            tuner: name.clone(),
            index: scenario,
        })?;
        let t = self
            .tunables
            .get_mut(tunable)
            .ok_or(TunerError::TunableNotFound { tuner: name, index: tunable })?;
        if values.len() != t.desc.num_values {
            return Err(TunerError::ValueCountMismatch {
                name: t.desc.name.clone(),
                expected: t.desc.num_values,
                actual: values.len(),
            });
        }

        let target = if t.desc.namespaced { ns } else { &NetnsHandle::Global };
        let outcome = sysctl.write(target, &t.desc.name, values)?;

        t.current = values.to_vec();
        log_and_count(sc, t, scenario, ns.is_global(), message);
        Ok(outcome)
    }

    /// Compose the teardown summary: one line per (tunable, scenario,
    /// scope) triple with a non-zero occurrence count, plus the
    /// initial→current delta for sysctl tunables.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for t in &self.tunables {
            for (index, sc) in self.scenarios.iter().enumerate() {
                for (global, count) in
                    [(true, t.global_count(index)), (false, t.nonglobal_count(index))]
                {
                    if count == 0 {
                        continue;
                    }
                    lines.push(format!(
                        "Summary: scenario '{}' occurred {count} times for tunable '{}' in {}global ns. {}",
                        sc.name,
                        t.desc.name,
                        if global { "" } else { "non-" },
                        sc.description
                    ));
                    if t.desc.kind == TunableKind::Sysctl {
                        lines.push(format!(
                            "sysctl '{}' changed from ({}) -> ({})",
                            t.desc.name,
                            join_values(&t.initial),
                            join_values(&t.current)
                        ));
                    }
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TunerId;
    use std::fs;
    use tempfile::TempDir;

    fn fake_sysctl(dir: &TempDir, name: &str, contents: &str) -> SysctlAccess {
        let access = SysctlAccess::new(dir.path());
        let path = access.path_for(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
        access
    }

    fn test_tuner() -> Tuner {
        Tuner::new(TunerId(0), "test")
    }

    #[test]
    fn test_register_captures_baseline() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap();
        let t = tuner.tunable(0).unwrap();
        assert_eq!(t.initial, vec![10]);
        assert_eq!(t.current, vec![10]);
    }

    #[test]
    fn test_register_value_count_mismatch_fails() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        let err = tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 3)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap_err();
        assert!(matches!(err, TunerError::ValueCountMismatch { expected: 3, actual: 1, .. }));
        assert_eq!(tuner.num_tunables(), 0);
    }

    #[test]
    fn test_occurrence_counters_split_by_scope() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap();

        for _ in 0..3 {
            tuner.record_occurrence(0, 0, &NetnsHandle::Global, "global hit").unwrap();
        }
        let t = tuner.tunable(0).unwrap();
        assert_eq!(t.global_count(0), 3);
        assert_eq!(t.nonglobal_count(0), 0);

        // A non-global handle flips the scope. Any open file stands in for
        // a namespace handle here; scope only consults the handle kind.
        let file = fs::File::open(dir.path()).unwrap();
        tuner.record_occurrence(0, 0, &NetnsHandle::Fd(file), "netns hit").unwrap();
        let t = tuner.tunable(0).unwrap();
        assert_eq!(t.global_count(0), 3);
        assert_eq!(t.nonglobal_count(0), 1);
    }

    #[test]
    fn test_record_unknown_scenario_fails() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap();
        let err = tuner.record_occurrence(0, 5, &NetnsHandle::Global, "").unwrap_err();
        assert!(matches!(err, TunerError::ScenarioNotFound { index: 5, .. }));
    }

    #[test]
    fn test_apply_failure_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap();

        // Remove the backing file so the write's change-detection read fails.
        fs::remove_file(sysctl.path_for("net.foo.bar")).unwrap();
        let err = tuner
            .apply_and_record(&sysctl, 0, 0, &NetnsHandle::Global, &[20], "bump")
            .unwrap_err();
        assert!(matches!(err, TunerError::Io(_)));
        let t = tuner.tunable(0).unwrap();
        assert_eq!(t.current, vec![10]);
        assert_eq!(t.global_count(0), 0);
    }

    #[test]
    fn test_summary_includes_initial_and_current() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap();
        tuner.apply_and_record(&sysctl, 0, 0, &NetnsHandle::Global, &[20], "bump").unwrap();

        let lines = tuner.summary_lines();
        assert!(lines.iter().any(|l| l.contains("occurred 1 times")));
        let delta = lines.iter().find(|l| l.contains("changed from")).unwrap();
        assert!(delta.contains("(10)"));
        assert!(delta.contains("(20)"));
    }

    #[test]
    fn test_summary_silent_without_occurrences() {
        let dir = TempDir::new().unwrap();
        let sysctl = fake_sysctl(&dir, "net.foo.bar", "10\n");
        let mut tuner = test_tuner();
        tuner
            .register_tunables(
                vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
                vec![Scenario::new("pressure", "resource pressure seen")],
                &sysctl,
            )
            .unwrap();
        assert!(tuner.summary_lines().is_empty());
    }
}

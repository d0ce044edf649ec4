//! Event routing tests: record validation, drop semantics, namespace
//! tracking on first sight, and the full event-to-sysctl-write path.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use kerntuned::context::{DaemonConfig, TuneContext};
use kerntuned::dispatch::{dispatch_record, DispatchOutcome, DispatchStats};
use kerntuned::domain::{NetnsCookie, TunerError};
use kerntuned::model::{Scenario, TunableDesc};
use kerntuned::netns::NetnsHandle;
use kerntuned::registry::{Registry, Tuner, TunerPlugin};
use kerntuned::sysctl::SysctlAccess;
use kerntuned_common::{TuneEvent, EVENT_PAYLOAD_SIZE, MAX_TUNERS};

/// Serialize an event the way the kernel side lays it out.
fn event_bytes(tuner_id: u32, scenario_id: u32, netns_cookie: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + EVENT_PAYLOAD_SIZE);
    bytes.extend_from_slice(&tuner_id.to_ne_bytes());
    bytes.extend_from_slice(&scenario_id.to_ne_bytes());
    bytes.extend_from_slice(&netns_cookie.to_ne_bytes());
    bytes.extend_from_slice(&[0u8; EVENT_PAYLOAD_SIZE]);
    bytes
}

/// Plugin that records every event it is handed.
struct RecordingTuner {
    handled: Arc<AtomicUsize>,
}

impl TunerPlugin for RecordingTuner {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn init(&mut self, _tuner: &mut Tuner, _ctx: &mut TuneContext) -> Result<(), TunerError> {
        Ok(())
    }

    fn fini(&mut self, _tuner: &mut Tuner, _ctx: &mut TuneContext) {}

    fn event_handler(&mut self, _tuner: &mut Tuner, _ctx: &mut TuneContext, _event: &TuneEvent) {
        self.handled.fetch_add(1, Ordering::SeqCst);
    }
}

fn recording_registry(ctx: &mut TuneContext) -> (Registry, Arc<AtomicUsize>) {
    let handled = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::new();
    registry
        .load(ctx, Box::new(RecordingTuner { handled: Arc::clone(&handled) }))
        .unwrap();
    (registry, handled)
}

#[test]
fn test_valid_event_is_delivered() {
    let mut ctx = TuneContext::new(DaemonConfig::default());
    let (mut registry, handled) = recording_registry(&mut ctx);
    let mut stats = DispatchStats::default();

    let outcome = dispatch_record(&event_bytes(0, 0, 0), &mut registry, &mut ctx, &mut stats);
    assert_eq!(outcome, DispatchOutcome::Delivered);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(stats.delivered, 1);
}

#[test]
fn test_undersized_record_is_dropped() {
    let mut ctx = TuneContext::new(DaemonConfig::default());
    let (mut registry, handled) = recording_registry(&mut ctx);
    let mut stats = DispatchStats::default();

    let bytes = event_bytes(0, 0, 0);
    let outcome = dispatch_record(&bytes[..10], &mut registry, &mut ctx, &mut stats);
    assert_eq!(outcome, DispatchOutcome::DroppedShort);
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert_eq!(stats.dropped_short, 1);
    assert_eq!(stats.delivered, 0);
}

#[test]
fn test_unknown_tuner_id_is_dropped() {
    let mut ctx = TuneContext::new(DaemonConfig::default());
    let (mut registry, handled) = recording_registry(&mut ctx);
    let mut stats = DispatchStats::default();

    // Id past the registered table, and id past the table capacity.
    for id in [5, MAX_TUNERS as u32, u32::MAX] {
        let outcome = dispatch_record(&event_bytes(id, 0, 0), &mut registry, &mut ctx, &mut stats);
        assert_eq!(outcome, DispatchOutcome::DroppedBadTuner);
    }
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert_eq!(stats.dropped_bad_tuner, 3);
}

#[test]
fn test_drops_do_not_poison_the_stream() {
    let mut ctx = TuneContext::new(DaemonConfig::default());
    let (mut registry, handled) = recording_registry(&mut ctx);
    let mut stats = DispatchStats::default();

    let good = event_bytes(0, 0, 0);
    dispatch_record(&good[..4], &mut registry, &mut ctx, &mut stats);
    dispatch_record(&event_bytes(99, 0, 0), &mut registry, &mut ctx, &mut stats);
    let outcome = dispatch_record(&good, &mut registry, &mut ctx, &mut stats);

    assert_eq!(outcome, DispatchOutcome::Delivered);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped_short, 1);
    assert_eq!(stats.dropped_bad_tuner, 1);
}

#[test]
fn test_first_event_from_cookie_starts_tracking() {
    let mut ctx = TuneContext::new(DaemonConfig::default());
    ctx.netns_cookie_supported = true;
    ctx.global_netns_cookie = NetnsCookie(0xaaaa);
    let (mut registry, _handled) = recording_registry(&mut ctx);
    let mut stats = DispatchStats::default();

    dispatch_record(&event_bytes(0, 0, 0xbbbb), &mut registry, &mut ctx, &mut stats);
    let tuner = registry.tuner(kerntuned::domain::TunerId(0)).unwrap();
    assert!(tuner.tracks_cookie(NetnsCookie(0xbbbb)));
    assert_eq!(tuner.netns().len(), 1);

    // The daemon's own cookie counts as global and is never tracked.
    dispatch_record(&event_bytes(0, 0, 0xaaaa), &mut registry, &mut ctx, &mut stats);
    let tuner = registry.tuner(kerntuned::domain::TunerId(0)).unwrap();
    assert_eq!(tuner.netns().len(), 1);
}

#[test]
fn test_tracking_disabled_without_cookie_support() {
    let mut ctx = TuneContext::new(DaemonConfig::default());
    ctx.netns_cookie_supported = false;
    let (mut registry, _handled) = recording_registry(&mut ctx);
    let mut stats = DispatchStats::default();

    dispatch_record(&event_bytes(0, 0, 0xbbbb), &mut registry, &mut ctx, &mut stats);
    let tuner = registry.tuner(kerntuned::domain::TunerId(0)).unwrap();
    assert!(tuner.netns().is_empty());
}

/// Plugin that reacts to every event by doubling its one sysctl tunable.
struct DoublingTuner;

impl TunerPlugin for DoublingTuner {
    fn name(&self) -> &'static str {
        "doubling"
    }

    fn init(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext) -> Result<(), TunerError> {
        tuner.register_tunables(
            vec![TunableDesc::sysctl("net.foo.bar", true, 1)],
            vec![Scenario::new("pressure", "resource pressure seen")],
            &ctx.sysctl,
        )
    }

    fn fini(&mut self, _tuner: &mut Tuner, _ctx: &mut TuneContext) {}

    fn event_handler(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext, _event: &TuneEvent) {
        let doubled = tuner.tunable(0).map(|t| t.current[0] * 2).unwrap_or_default();
        tuner
            .apply_and_record(&ctx.sysctl, 0, 0, &NetnsHandle::Global, &[doubled], "doubled")
            .unwrap();
    }
}

#[test]
fn test_event_drives_sysctl_write() {
    let dir = TempDir::new().unwrap();
    let sysctl = SysctlAccess::new(dir.path());
    let path = sysctl.path_for("net.foo.bar");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "10\n").unwrap();

    let mut config = DaemonConfig::default();
    config.sysctl_root = dir.path().to_path_buf();
    let mut ctx = TuneContext::new(config);
    let mut registry = Registry::new();
    let id = registry.load(&mut ctx, Box::new(DoublingTuner)).unwrap();
    let mut stats = DispatchStats::default();

    let outcome = dispatch_record(&event_bytes(0, 0, 0), &mut registry, &mut ctx, &mut stats);
    assert_eq!(outcome, DispatchOutcome::Delivered);

    // Kernel file, cached values and statistics all moved together.
    assert_eq!(fs::read_to_string(&path).unwrap(), "20");
    let tuner = registry.tuner(id).unwrap();
    let t = tuner.tunable(0).unwrap();
    assert_eq!(t.initial, vec![10]);
    assert_eq!(t.current, vec![20]);
    assert_eq!(t.global_count(0), 1);
    assert_eq!(t.nonglobal_count(0), 0);
}

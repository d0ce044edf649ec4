//! # Plugin Registry
//!
//! Loads and unloads tuning modules, assigns dense ids, and holds the
//! fixed-capacity active-tuner table ([`kerntuned_common::MAX_TUNERS`]).
//!
//! Tuners are compiled-in implementations of [`TunerPlugin`] registered at
//! one well-defined loading boundary; there is no runtime symbol
//! resolution. A plugin and its [`Tuner`] state share one registry slot so
//! the dispatch loop can borrow both halves disjointly.
//!
//! Registration is all-or-nothing: any `init` failure discards the partial
//! tuner and nothing is registered.

use std::os::fd::RawFd;

use aya::Ebpf;
use kerntuned_common::{TuneEvent, MAX_TUNERS};
use log::{debug, info};

use crate::context::TuneContext;
use crate::domain::{NetnsCookie, TunerError, TunerId, TunerState};
use crate::model::{Scenario, Tunable};
use crate::mux::{self, AttachSpec};
use crate::netns::NetnsSet;

/// The contract every tuning module implements.
///
/// `init` runs synchronously at registration; any error means the tuner is
/// never registered. `event_handler` is invoked in-line by the dispatch
/// loop; a slow handler stalls delivery to every other tuner until it
/// returns, and its outcome is not observed by the loop.
pub trait TunerPlugin: Send {
    /// Display name; becomes the tuner's registry name.
    fn name(&self) -> &'static str;

    /// Load kernel programs (via [`mux`]) and register tunables/scenarios.
    ///
    /// # Errors
    /// Any error aborts registration of this tuner; the process and all
    /// other tuners are unaffected.
    fn init(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext) -> Result<(), TunerError>;

    /// Tuner-specific cleanup, called during teardown after the summary
    /// records are emitted and before the BPF image is released.
    fn fini(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext);

    /// Handle one event addressed to this tuner.
    fn event_handler(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext, event: &TuneEvent);
}

/// Per-tuner state owned by the registry.
///
/// Everything the rest of the core touches on a tuner's behalf lives here;
/// other components only ever borrow it.
pub struct Tuner {
    id: TunerId,
    name: String,
    state: TunerState,
    bpf: Option<Ebpf>,
    attach_specs: Vec<AttachSpec>,
    optional_progs: Vec<&'static str>,
    /// Cached view of the shared channel handle; refreshed by mux attach.
    ring_fd: Option<RawFd>,
    /// Whether this tuner holds one reference on the shared maps.
    shared_held: bool,
    pub(crate) tunables: Vec<Tunable>,
    pub(crate) scenarios: Vec<Scenario>,
    netns: NetnsSet,
}

impl Tuner {
    pub(crate) fn new(id: TunerId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: TunerState::Active,
            bpf: None,
            attach_specs: Vec::new(),
            optional_progs: Vec::new(),
            ring_fd: None,
            shared_held: false,
            tunables: Vec::new(),
            scenarios: Vec::new(),
            netns: NetnsSet::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TunerId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> TunerState {
        self.state
    }

    /// Cached shared-channel fd, if the tuner's image is live.
    #[must_use]
    pub fn ring_fd(&self) -> Option<RawFd> {
        self.ring_fd
    }

    // -- mux plumbing -----------------------------------------------------

    pub(crate) fn install_bpf(
        &mut self,
        bpf: Ebpf,
        specs: Vec<AttachSpec>,
        optional: Vec<&'static str>,
    ) {
        self.bpf = Some(bpf);
        self.attach_specs = specs;
        self.optional_progs = optional;
    }

    pub(crate) fn bpf_mut(&mut self) -> Option<&mut Ebpf> {
        self.bpf.as_mut()
    }

    /// Drop the program image; returns whether one was loaded.
    pub(crate) fn drop_bpf(&mut self) -> bool {
        self.bpf.take().is_some()
    }

    pub(crate) fn mark_shared_held(&mut self) {
        self.shared_held = true;
    }

    /// Clear this tuner's hold on the shared maps; returns whether one
    /// was held.
    pub(crate) fn release_shared(&mut self) -> bool {
        std::mem::take(&mut self.shared_held)
    }

    pub(crate) fn attach_specs(&self) -> &[AttachSpec] {
        &self.attach_specs
    }

    pub(crate) fn optional_progs(&self) -> &[&'static str] {
        &self.optional_progs
    }

    pub(crate) fn set_ring_fd(&mut self, fd: Option<RawFd>) {
        self.ring_fd = fd;
    }

    // -- namespace tracking ----------------------------------------------

    /// Track a namespace cookie for this tuner; idempotent.
    pub fn netns_add(&mut self, cookie: NetnsCookie) -> bool {
        let added = self.netns.add(cookie);
        if added {
            debug!("tuner '{}' now tracks {cookie}", self.name);
        }
        added
    }

    /// Stop tracking a cookie; no-op if absent.
    pub fn netns_remove(&mut self, cookie: NetnsCookie) {
        self.netns.remove(cookie);
    }

    /// Whether this tuner tracks `cookie` (always true for the global one).
    #[must_use]
    pub fn tracks_cookie(&self, cookie: NetnsCookie) -> bool {
        self.netns.tracks(cookie)
    }

    #[must_use]
    pub fn netns(&self) -> &NetnsSet {
        &self.netns
    }
}

/// One registry slot: the tuner state plus the plugin that drives it, kept
/// side by side so callers can borrow both mutably at once.
pub struct Slot {
    pub tuner: Tuner,
    pub plugin: Box<dyn TunerPlugin>,
}

/// The fixed-capacity active-tuner table.
#[derive(Default)]
pub struct Registry {
    slots: Vec<Slot>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tuning module: create its tuner, run `init`
    /// synchronously, and on success insert it under the next sequential
    /// id.
    ///
    /// # Errors
    /// A full table or a failed `init` yields an error and no tuner;
    /// previously registered tuners are untouched either way.
    pub fn load(
        &mut self,
        ctx: &mut TuneContext,
        mut plugin: Box<dyn TunerPlugin>,
    ) -> Result<TunerId, TunerError> {
        if self.slots.len() >= MAX_TUNERS {
            return Err(TunerError::CapacityExceeded(MAX_TUNERS));
        }
        #[allow(clippy::cast_possible_truncation)]
        let id = TunerId(self.slots.len() as u32);
        let mut tuner = Tuner::new(id, plugin.name());
        debug!("calling init for '{}'", tuner.name);
        if let Err(e) = plugin.init(&mut tuner, ctx) {
            // A tuner that got as far as loading its BPF image holds one
            // reference on the shared maps; drop it before discarding.
            mux::teardown(ctx, &mut tuner);
            return Err(e);
        }
        info!("successfully initialized tuner {}[{}]", tuner.name, id.0);
        self.slots.push(Slot { tuner, plugin });
        Ok(id)
    }

    /// Bounds-checked constant-time lookup.
    #[must_use]
    pub fn tuner(&self, id: TunerId) -> Option<&Tuner> {
        self.slots.get(id.index()).map(|s| &s.tuner)
    }

    #[must_use]
    pub fn slot_mut(&mut self, id: TunerId) -> Option<&mut Slot> {
        self.slots.get_mut(id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of tuners still in the Active state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.tuner.state == TunerState::Active).count()
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    /// Tear one tuner down into `terminal` state. Idempotent: a tuner that
    /// is not Active is left alone.
    ///
    /// Order: summary records for every (tunable, scenario, scope) with a
    /// non-zero occurrence count, then the plugin's own `fini`, then the
    /// BPF image release, then the state change.
    pub fn teardown(&mut self, ctx: &mut TuneContext, id: TunerId, terminal: TunerState) {
        let Some(slot) = self.slots.get_mut(id.index()) else { return };
        if slot.tuner.state != TunerState::Active {
            return;
        }
        debug!(
            "cleaning up tuner {} with {} tunables, {} scenarios",
            slot.tuner.name,
            slot.tuner.tunables.len(),
            slot.tuner.scenarios.len()
        );
        for line in slot.tuner.summary_lines() {
            info!("{line}");
        }
        slot.plugin.fini(&mut slot.tuner, ctx);
        mux::teardown(ctx, &mut slot.tuner);
        slot.tuner.state = terminal;
    }

    /// Tear down every active tuner, in registration order.
    pub fn teardown_all(&mut self, ctx: &mut TuneContext, terminal: TunerState) {
        #[allow(clippy::cast_possible_truncation)]
        for i in 0..self.slots.len() as u32 {
            self.teardown(ctx, TunerId(i), terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DaemonConfig, TuneContext};

    /// Plugin that takes a hold on the shared maps and then fails, the way
    /// a real tuner does when its BPF load succeeds but tunable
    /// registration fails afterwards.
    struct LoadThenFail;

    impl TunerPlugin for LoadThenFail {
        fn name(&self) -> &'static str {
            "load-then-fail"
        }

        fn init(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext) -> Result<(), TunerError> {
            ctx.shared.retain();
            tuner.mark_shared_held();
            Err(TunerError::SysctlNotFound("net.absent".to_string()))
        }

        fn fini(&mut self, _tuner: &mut Tuner, _ctx: &mut TuneContext) {}

        fn event_handler(
            &mut self,
            _tuner: &mut Tuner,
            _ctx: &mut TuneContext,
            _event: &TuneEvent,
        ) {
        }
    }

    #[test]
    fn test_failed_init_releases_shared_hold() {
        let mut ctx = TuneContext::new(DaemonConfig::default());
        let mut registry = Registry::new();

        let err = registry.load(&mut ctx, Box::new(LoadThenFail)).unwrap_err();
        assert!(matches!(err, TunerError::SysctlNotFound(_)));
        assert!(registry.is_empty());
        // The discarded tuner's hold must come back; a leak here would keep
        // the shared handles alive past the last real tuner's teardown.
        assert_eq!(ctx.shared.active_tuners(), 0);
    }
}

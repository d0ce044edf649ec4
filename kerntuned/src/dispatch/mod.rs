//! # Event Dispatch Loop
//!
//! The single long-running operation in the core: one thread blocks on the
//! shared ring buffer, validates each record, and calls the target tuner's
//! handler synchronously in-line. Events are delivered in the order the
//! channel yields them; there is no batching or reordering.
//!
//! Malformed records (undersized, or naming a tuner id outside the table)
//! are logged and discarded: never retried, never fatal to the loop. There
//! is deliberately no dead-letter or replay path.
//!
//! Termination is cooperative: the stop flag is checked only between poll
//! calls, so shutdown latency is bounded by the poll timeout, not by
//! in-flight handler work. The loop owns the ring buffer and releases it
//! on return.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use aya::maps::{MapData, RingBuf};
use kerntuned_common::{TuneEvent, MAX_TUNERS};
use log::{debug, error, warn};

use crate::context::TuneContext;
use crate::domain::{NetnsCookie, TunerId};
use crate::registry::Registry;

/// Why a single record did or did not reach a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Record shorter than the fixed event layout; no field was read.
    DroppedShort,
    /// Tuner id outside the registry table.
    DroppedBadTuner,
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped_short: u64,
    pub dropped_bad_tuner: u64,
}

/// Validate and route one ring buffer record.
///
/// Public so the routing policy is testable without a live ring buffer.
pub fn dispatch_record(
    bytes: &[u8],
    registry: &mut Registry,
    ctx: &mut TuneContext,
    stats: &mut DispatchStats,
) -> DispatchOutcome {
    let Some(event) = TuneEvent::parse(bytes) else {
        warn!("unexpected event size {}", bytes.len());
        stats.dropped_short += 1;
        return DispatchOutcome::DroppedShort;
    };
    if event.tuner_id as usize >= MAX_TUNERS {
        warn!("invalid tuner id {}", event.tuner_id);
        stats.dropped_bad_tuner += 1;
        return DispatchOutcome::DroppedBadTuner;
    }
    let id = TunerId(event.tuner_id);
    let Some(slot) = registry.slot_mut(id) else {
        warn!("no tuner for id {}", event.tuner_id);
        stats.dropped_bad_tuner += 1;
        return DispatchOutcome::DroppedBadTuner;
    };

    let cookie = NetnsCookie(event.netns_cookie);
    // Scope comparison is purely diagnostic; dispatch proceeds either way.
    let global = cookie.is_global() || cookie == ctx.global_netns_cookie;
    debug!(
        "event scenario [{}] for tuner {}[{}] {cookie} ({})",
        event.scenario_id,
        slot.tuner.name(),
        event.tuner_id,
        if global { "global netns" } else { "non-global netns" }
    );

    // First event from an unseen cookie creates the tracking entry.
    if ctx.netns_cookie_supported && !global {
        slot.tuner.netns_add(cookie);
    }

    let crate::registry::Slot { tuner, plugin } = slot;
    plugin.event_handler(tuner, ctx, &event);
    stats.delivered += 1;
    DispatchOutcome::Delivered
}

/// Block until the ring buffer fd is readable or the timeout elapses.
///
/// Returns `Ok(false)` on timeout (or a benign EINTR), `Ok(true)` when
/// readable.
#[allow(unsafe_code)]
fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    #[allow(clippy::cast_possible_truncation)]
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: pfd is a valid pollfd for the duration of the call.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}

/// Run the dispatch loop until the stop flag is raised or the poll fails
/// unrecoverably. Consumes the ring buffer and releases it on return.
pub fn run(
    mut ring: RingBuf<MapData>,
    registry: &mut Registry,
    ctx: &mut TuneContext,
) -> DispatchStats {
    let mut stats = DispatchStats::default();
    let fd = ring.as_raw_fd();
    let timeout = ctx.poll_timeout;

    debug!("dispatch loop starting, ring fd {fd}");
    while !ctx.should_stop() {
        match poll_readable(fd, timeout) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                error!("ring buffer poll failed: {e}");
                break;
            }
        }
        while let Some(item) = ring.next() {
            dispatch_record(&item, registry, ctx, &mut stats);
        }
    }
    debug!(
        "dispatch loop done: {} delivered, {} short, {} bad tuner id",
        stats.delivered, stats.dropped_short, stats.dropped_bad_tuner
    );
    stats
    // ring dropped here: the loop's hold on the shared channel is released
}

//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Layout definitions shared between the kernel-side tuner programs and the
//! `kerntuned` daemon. All types use `#[repr(C)]` so the memory layout is
//! identical on both sides of the ring buffer.
//!
//! ## Key Items
//!
//! - [`TuneEvent`] - the one event record carried by the shared ring buffer
//! - [`RING_BUFFER_MAP`] / [`CORR_MAP`] - names of the two process-wide
//!   shared maps every tuner program declares (pinned by name, so every
//!   image loaded after the first reuses the same kernel objects)
//! - [`MAX_TUNERS`] - compile-time bound on the active-tuner table

#![no_std]

/// Name of the shared event ring buffer map.
///
/// Every tuner's BPF object declares a ring buffer under this name with
/// `LIBBPF_PIN_BY_NAME` pinning; the daemon loads all objects with one pin
/// directory so a single kernel ring buffer backs them all.
pub const RING_BUFFER_MAP: &str = "tune_events";

/// Name of the shared correlation map.
///
/// Auxiliary kernel-side table used by tuner programs to correlate
/// multi-stage events before emission. Userspace never reads it; it only
/// multiplexes its existence across tuner images.
pub const CORR_MAP: &str = "corr_map";

/// Compile-time maximum number of registered tuners.
///
/// The tuner id carried in [`TuneEvent`] must be below this bound; the
/// registry refuses to load a tuner once the table is full.
pub const MAX_TUNERS: usize = 64;

/// Size of the opaque per-event payload, in bytes.
///
/// The payload is interpreted by the target tuner only; the dispatch loop
/// never looks inside it.
pub const EVENT_PAYLOAD_SIZE: usize = 32;

/// Event sent from a tuner's BPF program to userspace via the shared ring
/// buffer.
///
/// **Memory layout**: `#[repr(C)]`, 8-byte aligned, 48 bytes. The dispatch
/// loop rejects any ring buffer record shorter than this struct before
/// reading a single field.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TuneEvent {
    /// Registry id of the tuner this event is addressed to (dense, 0-based).
    pub tuner_id: u32,

    /// Index into the target tuner's scenario catalog.
    pub scenario_id: u32,

    /// Network namespace cookie of the socket/flow that triggered the
    /// event. Zero means the kernel could not attribute a namespace; the
    /// daemon treats it as the global namespace.
    pub netns_cookie: u64,

    /// Opaque tuner-specific payload (e.g. the observed pressure value).
    pub payload: [u8; EVENT_PAYLOAD_SIZE],
}

impl TuneEvent {
    /// Parse one ring buffer record.
    ///
    /// Returns `None` if the record is shorter than the fixed event layout;
    /// no field is read in that case.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < core::mem::size_of::<Self>() {
            return None;
        }
        // SAFETY: length checked above; TuneEvent is repr(C), Copy, and
        // valid for any bit pattern, so an unaligned read of the bytes the
        // BPF side wrote is sound.
        #[allow(unsafe_code)]
        let event = unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<Self>()) };
        Some(event)
    }
}

#[cfg(feature = "user")]
use aya::Pod;

// Required for eBPF <-> userspace communication; Pod guarantees the type
// can travel as plain bytes.
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for TuneEvent {}

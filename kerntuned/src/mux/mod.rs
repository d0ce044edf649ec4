//! # Resource Multiplexer
//!
//! Ensures exactly one event ring buffer and one correlation map exist per
//! process, shared by every tuner's BPF programs regardless of load order.
//!
//! Sharing mechanism: the tuner objects declare both maps with
//! `LIBBPF_PIN_BY_NAME` pinning, and every image is loaded through
//! [`aya::EbpfLoader::map_pin_path`] pointing at one bpffs directory. The
//! first load creates the kernel objects; every later load reuses them
//! through the pin. The daemon adopts the maps out of the first image and
//! holds them process-wide until the last active tuner is torn down.
//!
//! Also home to capability probing: a full-feature probe object, a legacy
//! fallback, and the standing force-legacy override carried by the context.

use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use aya::maps::{Map, MapData, RingBuf};
use aya::{Ebpf, EbpfLoader};
use aya_log::EbpfLogger;
use kerntuned_common::{CORR_MAP, RING_BUFFER_MAP};
use log::{debug, warn};

use crate::context::TuneContext;
use crate::domain::{SupportLevel, TunerError};
use crate::registry::Tuner;

/// Full-feature capability probe object.
const PROBE_OBJECT: &str = "probe.bpf.o";
/// Reduced-feature fallback probe object.
const PROBE_LEGACY_OBJECT: &str = "probe_legacy.bpf.o";

/// How one BPF program in a tuner image gets attached.
///
/// Tuner plugins declare these at load time; [`attach`] walks them. aya
/// loads programs lazily, so an optional program that fails verification
/// is simply skipped at attach time (the stand-in for libbpf's
/// `autoload = false` feature-detection fallback).
#[derive(Debug, Clone)]
pub enum AttachSpec {
    TracePoint { prog: &'static str, category: &'static str, name: &'static str },
    KProbe { prog: &'static str, function: &'static str },
    RawTracePoint { prog: &'static str, tracepoint: &'static str },
}

impl AttachSpec {
    #[must_use]
    pub fn prog(&self) -> &'static str {
        match self {
            AttachSpec::TracePoint { prog, .. }
            | AttachSpec::KProbe { prog, .. }
            | AttachSpec::RawTracePoint { prog, .. } => prog,
        }
    }
}

/// The two process-wide shared kernel resources and their refcount.
pub struct SharedMaps {
    pin_dir: PathBuf,
    ring: Option<RingBuf<MapData>>,
    corr: Option<Map>,
    active: usize,
}

impl SharedMaps {
    #[must_use]
    pub fn new(pin_dir: PathBuf) -> Self {
        Self { pin_dir, ring: None, corr: None, active: 0 }
    }

    #[must_use]
    pub fn pin_dir(&self) -> &Path {
        &self.pin_dir
    }

    /// Raw fd of the shared ring buffer, if adopted.
    #[must_use]
    pub fn ring_fd(&self) -> Option<RawFd> {
        self.ring.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Number of tuners currently holding the shared resources.
    #[must_use]
    pub fn active_tuners(&self) -> usize {
        self.active
    }

    /// Hand the ring buffer to the dispatch loop, which owns it for its
    /// lifetime and releases it on return.
    pub fn take_ring(&mut self) -> Option<RingBuf<MapData>> {
        self.ring.take()
    }

    /// Adopt the two named maps out of a just-loaded image, if no shared
    /// handle exists yet.
    fn adopt_from(&mut self, bpf: &mut Ebpf, tuner_name: &str) -> Result<(), TunerError> {
        if self.ring.is_none() {
            let map = bpf
                .take_map(RING_BUFFER_MAP)
                .ok_or_else(|| TunerError::SharedMapNotFound(RING_BUFFER_MAP.to_string()))?;
            let ring = RingBuf::try_from(map)?;
            debug!("adopted shared ring buffer map from '{tuner_name}'");
            self.ring = Some(ring);
        } else {
            debug!("'{tuner_name}' reuses the shared ring buffer map");
        }
        if self.corr.is_none() {
            match bpf.take_map(CORR_MAP) {
                Some(map) => {
                    debug!("adopted shared correlation map from '{tuner_name}'");
                    self.corr = Some(map);
                }
                // Not every tuner image carries the correlation map.
                None => debug!("no correlation map in '{tuner_name}'"),
            }
        }
        Ok(())
    }

    pub(crate) fn retain(&mut self) {
        self.active += 1;
    }

    /// Drop one tuner's hold; the last release closes both shared handles
    /// and unpins them so a later load cycle recreates them fresh.
    fn release(&mut self) {
        debug_assert!(self.active > 0);
        self.active = self.active.saturating_sub(1);
        if self.active == 0 {
            self.ring = None;
            self.corr = None;
            for name in [RING_BUFFER_MAP, CORR_MAP] {
                let pin = self.pin_dir.join(name);
                if std::fs::remove_file(&pin).is_ok() {
                    debug!("unpinned {}", pin.display());
                }
            }
            debug!("closed shared maps, last tuner gone");
        }
    }
}

/// Load a tuner's BPF object, wiring it onto the shared maps.
///
/// `optional_progs` names the feature-detection fallback programs: if one
/// of them fails to load or attach later, that failure is logged and
/// skipped rather than failing the tuner.
///
/// # Errors
/// Object read or load failures, and a missing shared ring buffer map in
/// the image, are fatal to this one tuner.
pub fn load(
    ctx: &mut TuneContext,
    tuner: &mut Tuner,
    object: &Path,
    specs: Vec<AttachSpec>,
    optional_progs: &[&'static str],
) -> Result<(), TunerError> {
    let data = std::fs::read(object)?;
    // The pin directory must exist before the loader touches it; bpffs is
    // mounted by the surrounding process.
    std::fs::create_dir_all(ctx.shared.pin_dir())?;

    let mut bpf = EbpfLoader::new().map_pin_path(ctx.shared.pin_dir()).load(&data)?;

    if let Err(e) = EbpfLogger::init(&mut bpf) {
        // Objects without a log section are fine.
        debug!("no BPF logger for '{}': {e}", tuner.name());
    }

    ctx.shared.adopt_from(&mut bpf, tuner.name())?;
    ctx.shared.retain();
    tuner.mark_shared_held();

    for prog in optional_progs {
        debug!("marking '{prog}' as optional for '{}'", tuner.name());
    }
    tuner.install_bpf(bpf, specs, optional_progs.to_vec());
    tuner.set_ring_fd(ctx.shared.ring_fd());
    Ok(())
}

/// Activate every still-wanted program in the tuner's image, and refresh
/// the tuner's cached channel handle from the now-live map.
///
/// # Errors
/// A required program failing to load or attach fails the tuner; optional
/// programs degrade with a warning.
pub fn attach(ctx: &mut TuneContext, tuner: &mut Tuner) -> Result<(), TunerError> {
    let name = tuner.name().to_string();
    let optional = tuner.optional_progs().to_vec();
    let specs = tuner.attach_specs().to_vec();
    let bpf = tuner.bpf_mut().ok_or(TunerError::NoBpfObject(name.clone()))?;
    for spec in &specs {
        match attach_one(bpf, spec) {
            Ok(()) => debug!("attached '{}' for '{name}'", spec.prog()),
            Err(e) if optional.contains(&spec.prog()) => {
                warn!("optional program '{}' unavailable for '{name}': {e}", spec.prog());
            }
            Err(e) => return Err(e),
        }
    }
    tuner.set_ring_fd(ctx.shared.ring_fd());
    Ok(())
}

fn attach_one(bpf: &mut Ebpf, spec: &AttachSpec) -> Result<(), TunerError> {
    let prog = bpf
        .program_mut(spec.prog())
        .ok_or_else(|| TunerError::ProgramNotFound(spec.prog().to_string()))?;
    match spec {
        AttachSpec::TracePoint { category, name, .. } => {
            let tp: &mut aya::programs::TracePoint = prog.try_into()?;
            tp.load()?;
            tp.attach(category, name)?;
        }
        AttachSpec::KProbe { function, .. } => {
            let kp: &mut aya::programs::KProbe = prog.try_into()?;
            kp.load()?;
            kp.attach(function, 0)?;
        }
        AttachSpec::RawTracePoint { tracepoint, .. } => {
            let rtp: &mut aya::programs::RawTracePoint = prog.try_into()?;
            rtp.load()?;
            rtp.attach(tracepoint)?;
        }
    }
    Ok(())
}

/// Release this tuner's program image and its hold on the shared maps.
/// The last hold going away closes and unpins both shared handles.
pub fn teardown(ctx: &mut TuneContext, tuner: &mut Tuner) {
    tuner.drop_bpf();
    if tuner.release_shared() {
        ctx.shared.release();
    }
    tuner.set_ring_fd(None);
}

/// Probe the kernel's BPF feature level.
///
/// Tries the full-feature probe image first, then the legacy one. Objects
/// that fail to load (missing file or verifier rejection) degrade the
/// level; nothing here is an operator-facing error.
#[must_use]
pub fn probe_support(bpf_dir: &Path) -> SupportLevel {
    match Ebpf::load_file(bpf_dir.join(PROBE_OBJECT)) {
        Ok(_) => SupportLevel::Normal,
        Err(e) => {
            debug!("full bpf support not available: {e}");
            match Ebpf::load_file(bpf_dir.join(PROBE_LEGACY_OBJECT)) {
                Ok(_) => SupportLevel::Legacy,
                Err(e) => {
                    debug!("legacy bpf support not available: {e}");
                    SupportLevel::None
                }
            }
        }
    }
}

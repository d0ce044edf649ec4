//! Listen backlog tuner
//!
//! Reacts to accept-queue overflow events by raising
//! `net.core.somaxconn` in the namespace the overflow happened in.
//! Deliberately the simplest possible tuner: it exists to exercise the
//! whole core path (mux load/attach, tunable registration, netns
//! resolution, apply-and-record) and to serve as the template for real
//! tuners.

use kerntuned_common::TuneEvent;
use log::{debug, warn};

use crate::context::TuneContext;
use crate::domain::{NetnsCookie, SupportLevel, TunerError};
use crate::model::{Scenario, TunableDesc};
use crate::mux::{self, AttachSpec};
use crate::netns;
use crate::registry::{Tuner, TunerPlugin};

const OBJECT: &str = "backlog_tuner.bpf.o";
/// Reduced-feature build of the same programs, for kernels (or the
/// standing override) stuck at legacy support.
const LEGACY_OBJECT: &str = "backlog_tuner.legacy.bpf.o";

/// Tunable index within this tuner's table.
const SOMAXCONN: usize = 0;
/// Scenario index within this tuner's catalog.
const OVERFLOW: usize = 0;

/// Never raise somaxconn past this.
const SOMAXCONN_CAP: i64 = 65_535;

fn object_for(support: SupportLevel) -> &'static str {
    if support == SupportLevel::Legacy {
        LEGACY_OBJECT
    } else {
        OBJECT
    }
}

#[derive(Default)]
pub struct BacklogTuner;

impl TunerPlugin for BacklogTuner {
    fn name(&self) -> &'static str {
        "backlog"
    }

    fn init(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext) -> Result<(), TunerError> {
        let object = ctx.bpf_dir.join(object_for(ctx.effective_support()));
        let specs = vec![
            AttachSpec::KProbe { prog: "listen_overflow", function: "tcp_v4_syn_recv_sock" },
            // Older kernels lack this symbol; the tuner still works with
            // the primary probe alone.
            AttachSpec::KProbe { prog: "reqsk_drop", function: "inet_csk_reqsk_queue_drop" },
        ];
        mux::load(ctx, tuner, &object, specs, &["reqsk_drop"])?;
        mux::attach(ctx, tuner)?;

        tuner.register_tunables(
            vec![TunableDesc::sysctl("net.core.somaxconn", true, 1)],
            vec![Scenario::new(
                "need_backlog_increase",
                "Accept queue overflowed; connections were dropped before accept().",
            )],
            &ctx.sysctl,
        )
    }

    fn fini(&mut self, tuner: &mut Tuner, _ctx: &mut TuneContext) {
        debug!("backlog tuner '{}' finishing", tuner.name());
    }

    fn event_handler(&mut self, tuner: &mut Tuner, ctx: &mut TuneContext, event: &TuneEvent) {
        let cookie = NetnsCookie(event.netns_cookie);
        let ns = match netns::fd_from_cookie(ctx, cookie) {
            Ok(ns) => ns,
            Err(e) => {
                warn!("backlog: cannot resolve {cookie}: {e}");
                return;
            }
        };

        let Some(t) = tuner.tunable(SOMAXCONN) else { return };
        let current = t.current[0];
        let raised = (current.saturating_mul(2)).min(SOMAXCONN_CAP);
        if raised == current {
            debug!("backlog: somaxconn already at cap {current}");
            return;
        }

        let message = format!("Raised somaxconn {current} -> {raised}.");
        if let Err(e) =
            tuner.apply_and_record(&ctx.sysctl, SOMAXCONN, OVERFLOW, &ns, &[raised], &message)
        {
            warn!("backlog: could not raise somaxconn: {e}");
        }
    }
}

//! # kerntuned - Main Entry Point
//!
//! Thin wiring around the core: parse arguments, probe capabilities,
//! register the built-in tuners, discover namespaces, then hand the main
//! thread to the dispatch loop until ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::atomic::Ordering;
use std::time::Duration;

use kerntuned::cli::Args;
use kerntuned::context::{DaemonConfig, TuneContext};
use kerntuned::domain::{SupportLevel, TunerState};
use kerntuned::registry::Registry;
use kerntuned::{dispatch, netns, tuners};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn config_from(args: &Args) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    if let Some(ref dir) = args.bpf_dir {
        config.bpf_dir.clone_from(dir);
    }
    if let Some(ref dir) = args.pin_dir {
        config.pin_dir.clone_from(dir);
    }
    config.force_legacy = args.legacy;
    config.poll_timeout = Duration::from_millis(args.poll_timeout);
    config
}

fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let mut ctx = TuneContext::new(config_from(&args));
    ctx.probe();
    anyhow::ensure!(
        ctx.effective_support() > SupportLevel::None,
        "kernel does not support the BPF features kerntuned needs"
    );

    if !quiet {
        println!("kerntuned v{}", env!("CARGO_PKG_VERSION"));
        println!("bpf support: {}", ctx.effective_support());
    }

    // ── Register built-in tuners ────────────────────────────────────────
    let mut registry = Registry::new();
    for plugin in tuners::builtin() {
        let name = plugin.name();
        match registry.load(&mut ctx, plugin) {
            Ok(id) => info!("loaded tuner '{name}' as {id}"),
            // Fatal only to the one tuner; the daemon keeps going.
            Err(e) => warn!("skipping tuner '{name}': {e}"),
        }
    }
    anyhow::ensure!(registry.active_count() > 0, "no tuners could be loaded");

    // ── Namespace discovery (degrades to global-only without cookies) ───
    netns::init_all(&mut ctx, &mut registry).context("namespace discovery failed")?;

    let ring = ctx
        .shared
        .take_ring()
        .context("no shared ring buffer; no tuner loaded a BPF object")?;

    // ── Ctrl+C raises the stop flag; the loop observes it between polls ─
    let stop = ctx.stop_flag();
    let signal_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    std::thread::spawn(move || {
        signal_rt.block_on(tokio::signal::ctrl_c()).ok();
        stop.store(true, Ordering::SeqCst);
    });

    // ── Dispatch until stopped; namespace switches stay on this thread ──
    let stats = dispatch::run(ring, &mut registry, &mut ctx);

    if !quiet {
        eprintln!(
            "\nstopped: {} events delivered ({} undersized, {} bad tuner id)",
            stats.delivered, stats.dropped_short, stats.dropped_bad_tuner
        );
    }

    registry.teardown_all(&mut ctx, TunerState::Removed);
    Ok(())
}

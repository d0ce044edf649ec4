//! # kerntuned - BPF-driven Kernel Auto-Tuning Daemon
//!
//! kerntuned watches kernel-emitted resource-pressure events and adjusts
//! kernel parameters (sysctls) in response, per network namespace where
//! the parameter allows it. Kernel-side BPF programs detect pressure
//! (queue overflows, memory exhaustion, ...) and emit events into one
//! process-wide shared ring buffer; userspace routes each event to the
//! tuning module it names.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BPF Programs (Kernel)                    │
//! │   one object per tuner; all share tune_events + corr_map    │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ ring buffer events
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   kerntuned (This Crate)                    │
//! │                                                             │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌────────┐  │
//! │  │   Mux    │──▶│ Dispatch │──▶│ Registry  │──▶│ Model  │  │
//! │  │ (shared  │   │  (poll   │   │ (tuners)  │   │(tunable│  │
//! │  │   maps)  │   │   loop)  │   │           │   │ stats) │  │
//! │  └──────────┘   └──────────┘   └───────────┘   └───┬────┘  │
//! │                       │                            │       │
//! │                       ▼                            ▼       │
//! │                 ┌──────────┐                 ┌──────────┐  │
//! │                 │  Netns   │                 │  Sysctl  │  │
//! │                 │ (cookie  │                 │ (/proc/  │  │
//! │                 │  resolve)│                 │   sys)   │  │
//! │                 └──────────┘                 └──────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`mux`]: the two process-wide shared kernel resources (event ring
//!   buffer, correlation map), BPF object loading, capability probing
//! - [`registry`]: tuner lifecycle, the plugin contract, the fixed-size
//!   active-tuner table
//! - [`dispatch`]: the single-threaded blocking-poll event loop
//! - [`netns`]: netns-cookie resolution and per-tuner namespace tracking
//! - [`model`]: tunables, scenario catalogs, occurrence statistics
//! - [`sysctl`]: namespace-scoped `/proc/sys` access with change-detection
//! - [`context`]: the one process-scoped object owning all shared state
//! - [`tuners`]: the compiled-in tuning modules
//! - [`domain`]: core domain types and errors
//!
//! ## Concurrency Model
//!
//! Single-threaded by design: one thread owns the blocking ring buffer
//! poll and calls tuner handlers synchronously from inside it. Load and
//! teardown never overlap the poll loop's lifetime; the core does no
//! internal locking. Namespace switches rebind the calling thread
//! globally, so they stay confined to that one thread.

pub mod cli;
pub mod context;
pub mod dispatch;
pub mod domain;
pub mod model;
pub mod mux;
pub mod netns;
pub mod registry;
pub mod sysctl;
pub mod tuners;

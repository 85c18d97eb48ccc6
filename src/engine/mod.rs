// src/engine/mod.rs

//! Reconciliation engine.
//!
//! The pure cycle logic lives in [`core`]; the async/IO shell that polls
//! the backend and persists results is [`runtime`]. Around them:
//! - [`schedule`]: per-kind poll cadence and poll targeting
//! - [`control`]: operator stop channel
//! - [`pool`]: bounded worker pool running many loops concurrently

pub mod control;
pub mod core;
pub mod pool;
pub mod runtime;
pub mod schedule;

pub use control::{stop_channel, StopHandle, StopSignal};
pub use core::{CycleOutcome, ReconcileCore, Tick};
pub use pool::{DynBackend, ReconcileJob, WorkerPool};
pub use runtime::ReconciliationLoop;
pub use schedule::{FileScheduleStrategy, ScheduleStrategy, ScriptScheduleStrategy};

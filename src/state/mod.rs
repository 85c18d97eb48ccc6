// src/state/mod.rs

//! Mutable reconciliation state owned by one task instance.
//!
//! - [`tracker`] remembers which subtasks finished and succeeded.
//! - [`store`] holds the per-host [`crate::model::AgentTask`] records.

pub mod store;
pub mod tracker;

pub use store::{AgentEntry, AgentTaskStateStore};
pub use tracker::SubtaskCompletionTracker;

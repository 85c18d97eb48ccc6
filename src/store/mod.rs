// src/store/mod.rs

//! Persistence seams for reconciliation output.
//!
//! The loop writes through two traits: a log store for per-host execution
//! logs, and a task store for [`AgentTask`] records and the final verdict.
//! Both are shared between workers, hence `&self` + `Sync`.
//!
//! - [`memory`] provides in-memory implementations used by the CLI and tests.

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::model::{AgentTask, HostLogEntry};
use crate::types::TaskVerdict;

pub mod memory;

pub use memory::{MemoryLogStore, MemoryTaskStore};

/// Future returned by store calls.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Append-only sink for execution logs.
pub trait LogStore: Send + Sync {
    /// Write one cycle's worth of log entries for a task instance.
    fn write_logs(&self, task_instance_id: i64, entries: Vec<HostLogEntry>) -> StoreFuture<'_, ()>;
}

/// Durable home of per-host task records and task verdicts.
pub trait TaskStore: Send + Sync {
    /// Upsert changed agent tasks.
    fn save_agent_tasks(&self, tasks: Vec<AgentTask>) -> StoreFuture<'_, ()>;

    /// Load previously persisted agent tasks (resumption after ownership
    /// moved to another worker).
    fn load_agent_tasks(&self, task_instance_id: i64) -> StoreFuture<'_, Vec<AgentTask>>;

    /// Record the final verdict of a task instance.
    fn save_verdict(&self, task_instance_id: i64, verdict: TaskVerdict) -> StoreFuture<'_, ()>;
}

// src/model/mod.rs

//! Data model of the reconciliation engine.
//!
//! - [`agent_task`]: per-host task records persisted by the task store.
//! - [`fragment`]: atomic result fragments and subtask identity.
//! - [`host`]: host resolution for log keys and display ips.
//! - [`log_entry`]: execution-log records written to the log store.
//! - [`task`]: static description of a dispatched task instance.

pub mod agent_task;
pub mod fragment;
pub mod host;
pub mod log_entry;
pub mod task;

pub use agent_task::AgentTask;
pub use fragment::{FileResultFragment, ScriptResultFragment, SubtaskKey, standardize_path};
pub use host::{HostDirectory, HostInfo};
pub use log_entry::{FileLogLine, HostKey, HostLogEntry};
pub use task::{FileTaskSpec, ScriptTaskSpec, SendFile};

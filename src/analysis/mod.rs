// src/analysis/mod.rs

//! Result analysis: folding polled fragments into agent state and logs.
//!
//! - [`file`]: file-transfer analyzer (uploads + downloads, cascading
//!   failures, legacy agent id repair).
//! - [`script`]: script-execution analyzer (one subtask per agent).
//! - [`logs`]: per-cycle execution-log buffer with progress dedup.
//! - [`aggregate`]: verdict derivation with the upload grace window.
//! - [`format`]: size / speed / progress text helpers.

use crate::backend::ResultBatch;
use crate::errors::Result;
use crate::state::AgentTaskStateStore;
use crate::types::TaskKind;

pub mod aggregate;
pub mod file;
pub mod format;
pub mod logs;
pub mod script;

pub use aggregate::{OverallStatusAggregator, VerdictInputs};
pub use file::FileResultAnalyzer;
pub use logs::{ExecutionLogAssembler, LogContext};
pub use script::ScriptResultAnalyzer;

/// Knobs shared by the analyzers.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Treat a FINISHED fragment reporting less than 100% progress as still
    /// running (multi-chunk transfers can report FINISHED early).
    pub finished_below_full_progress_is_running: bool,
    /// Staging directory of locally uploaded files; paths below it are shown
    /// through their display alias.
    pub local_upload_dir: Option<String>,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            finished_below_full_progress_is_running: true,
            local_upload_dir: None,
        }
    }
}

/// Folds one polled batch into the task's state.
///
/// Implementations are pure state folds: no I/O, safe to call repeatedly
/// with overlapping or repeated batches.
pub trait ResultAnalyzer: Send {
    fn kind(&self) -> TaskKind;

    /// Backend task id to poll.
    fn backend_task_id(&self) -> &str;

    fn log_context(&self) -> LogContext;

    /// Apply a batch. `now_ms` stands in for missing fragment timestamps.
    fn analyze(
        &mut self,
        batch: ResultBatch,
        logs: &mut ExecutionLogAssembler,
        now_ms: i64,
    ) -> Result<()>;

    fn state(&self) -> &AgentTaskStateStore;

    fn state_mut(&mut self) -> &mut AgentTaskStateStore;

    fn verdict_inputs(&self) -> VerdictInputs;
}

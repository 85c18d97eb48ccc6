// src/scenario.rs

//! Scenario files consumed by the CLI.
//!
//! A scenario lists task instances together with the result batches the
//! fleet backend reports for them, poll by poll:
//!
//! ```json
//! {
//!   "tasks": [
//!     {
//!       "kind": "file",
//!       "spec": { "task_instance_id": 1, "gse_task_id": "GSE_1", ... },
//!       "batches": [[{ "mode": 2, "sourceAgentId": "0:10.0.0.1", ... }]],
//!       "honorsStop": true,
//!       "stopAfterMs": 3000
//!     }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::{ReplayBackend, ResultBatch};
use crate::engine::{stop_channel, ReconcileJob, StopHandle};
use crate::errors::Result;
use crate::model::{AgentTask, FileResultFragment, FileTaskSpec, ScriptResultFragment, ScriptTaskSpec};
use crate::types::TaskKind;

/// Empty polls a replayed task may sit through after its recording ends.
const DEFAULT_IDLE_POLLS: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub tasks: Vec<ScenarioTask>,
}

/// Replay settings shared by both task kinds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySettings {
    /// The backend answers stop requests with TERMINATED results.
    #[serde(default)]
    pub honors_stop: bool,
    /// Simulate an operator stop this long after start.
    #[serde(default)]
    pub stop_after_ms: Option<u64>,
    #[serde(default)]
    pub idle_polls: Option<usize>,
    /// Agent tasks persisted by a previous owner of the task instance.
    #[serde(default)]
    pub persisted: Vec<AgentTask>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScenarioTask {
    File {
        spec: FileTaskSpec,
        #[serde(default)]
        batches: Vec<Vec<FileResultFragment>>,
        #[serde(flatten)]
        replay: ReplaySettings,
    },
    Script {
        spec: ScriptTaskSpec,
        #[serde(default)]
        batches: Vec<Vec<ScriptResultFragment>>,
        #[serde(flatten)]
        replay: ReplaySettings,
    },
}

/// A job ready for the worker pool plus what the CLI needs around it.
#[derive(Debug)]
pub struct PreparedTask {
    pub job: ReconcileJob,
    pub stop: StopHandle,
    pub stop_after: Option<Duration>,
    pub persisted: Vec<AgentTask>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn into_prepared(self) -> Vec<PreparedTask> {
        self.tasks.into_iter().map(ScenarioTask::prepare).collect()
    }
}

impl ScenarioTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            ScenarioTask::File { .. } => TaskKind::File,
            ScenarioTask::Script { .. } => TaskKind::Script,
        }
    }

    pub fn task_instance_id(&self) -> i64 {
        match self {
            ScenarioTask::File { spec, .. } => spec.task_instance_id,
            ScenarioTask::Script { spec, .. } => spec.task_instance_id,
        }
    }

    pub fn target_count(&self) -> usize {
        match self {
            ScenarioTask::File { spec, .. } => spec.targets.len(),
            ScenarioTask::Script { spec, .. } => spec.targets.len(),
        }
    }

    pub fn batch_count(&self) -> usize {
        match self {
            ScenarioTask::File { batches, .. } => batches.len(),
            ScenarioTask::Script { batches, .. } => batches.len(),
        }
    }

    fn prepare(self) -> PreparedTask {
        let (stop, signal) = stop_channel();
        let (job, replay) = match self {
            ScenarioTask::File {
                spec,
                batches,
                replay,
            } => {
                let backend = replay_backend(
                    &spec.gse_task_id,
                    TaskKind::File,
                    batches.into_iter().map(ResultBatch::File).collect(),
                    &replay,
                );
                (ReconcileJob::file(spec, backend), replay)
            }
            ScenarioTask::Script {
                spec,
                batches,
                replay,
            } => {
                let backend = replay_backend(
                    &spec.gse_task_id,
                    TaskKind::Script,
                    batches.into_iter().map(ResultBatch::Script).collect(),
                    &replay,
                );
                (ReconcileJob::script(spec, backend), replay)
            }
        };

        PreparedTask {
            job: job.with_stop_signal(signal),
            stop,
            stop_after: replay.stop_after_ms.map(Duration::from_millis),
            persisted: replay.persisted,
        }
    }
}

fn replay_backend(
    task_id: &str,
    kind: TaskKind,
    batches: Vec<ResultBatch>,
    replay: &ReplaySettings,
) -> Box<ReplayBackend> {
    Box::new(
        ReplayBackend::new(task_id, kind, batches)
            .honoring_stop(replay.honors_stop)
            .with_idle_limit(replay.idle_polls.unwrap_or(DEFAULT_IDLE_POLLS)),
    )
}

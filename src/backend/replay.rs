// src/backend/replay.rs

//! Backend that replays pre-recorded result batches.
//!
//! Batches are served in order, one per poll, filtered by the request's
//! agent list. Once exhausted, every poll returns an empty batch. If the
//! backend is configured to honour stops, a stop request causes the next
//! poll to report TERMINATED for every subtask of the stopped agents whose
//! last served fragment was still in flight.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::{debug, info};

use crate::backend::{BackendFuture, FleetBackend, PollRequest, ResultBatch};
use crate::errors::ReconError;
use crate::model::{FileResultFragment, ScriptResultFragment, SubtaskKey};
use crate::types::{AgentId, AtomicErrorCode, TaskKind};

/// A stop request received by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub task_id: String,
    pub agent_ids: Vec<AgentId>,
}

#[derive(Debug)]
pub struct ReplayBackend {
    task_id: String,
    kind: TaskKind,
    batches: VecDeque<ResultBatch>,
    honors_stop: bool,
    /// Empty polls tolerated after the script is exhausted before failing.
    idle_limit: Option<usize>,
    idle_polls: usize,
    polls: usize,
    stop_requests: Vec<StopRequest>,
    /// Agents whose in-flight subtasks are reported TERMINATED on next poll.
    pending_termination: BTreeSet<AgentId>,
    last_file: HashMap<SubtaskKey, FileResultFragment>,
    last_script: HashMap<AgentId, ScriptResultFragment>,
}

impl ReplayBackend {
    pub fn new(task_id: impl Into<String>, kind: TaskKind, batches: Vec<ResultBatch>) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            batches: batches.into(),
            honors_stop: false,
            idle_limit: None,
            idle_polls: 0,
            polls: 0,
            stop_requests: Vec::new(),
            pending_termination: BTreeSet::new(),
            last_file: HashMap::new(),
            last_script: HashMap::new(),
        }
    }

    /// Answer stop requests with TERMINATED fragments.
    pub fn honoring_stop(mut self, honors_stop: bool) -> Self {
        self.honors_stop = honors_stop;
        self
    }

    /// Fail polls once the script has been exhausted for `limit` polls, so
    /// an incomplete recording cannot keep a loop alive forever.
    pub fn with_idle_limit(mut self, limit: usize) -> Self {
        self.idle_limit = Some(limit);
        self
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn stop_requests(&self) -> &[StopRequest] {
        &self.stop_requests
    }

    pub fn remaining_batches(&self) -> usize {
        self.batches.len()
    }

    fn next_batch(&mut self, request: &PollRequest) -> ResultBatch {
        if !self.pending_termination.is_empty() {
            let stopped = std::mem::take(&mut self.pending_termination);
            // Scripted batches recorded after the stop no longer happen.
            self.batches.clear();
            return self.terminations(&stopped);
        }

        let Some(batch) = self.batches.pop_front() else {
            return ResultBatch::empty(self.kind);
        };

        match batch {
            ResultBatch::File(fragments) => {
                let served: Vec<FileResultFragment> = fragments
                    .into_iter()
                    .filter(|f| f.owner_agent().is_some_and(|a| request.covers(a)))
                    .collect();
                for fragment in &served {
                    self.last_file.insert(fragment.subtask_key(), fragment.clone());
                }
                ResultBatch::File(served)
            }
            ResultBatch::Script(fragments) => {
                let served: Vec<ScriptResultFragment> = fragments
                    .into_iter()
                    .filter(|f| request.covers(&f.agent_id))
                    .collect();
                for fragment in &served {
                    self.last_script.insert(fragment.agent_id.clone(), fragment.clone());
                }
                ResultBatch::Script(served)
            }
        }
    }

    fn terminations(&self, stopped: &BTreeSet<AgentId>) -> ResultBatch {
        let in_flight = |f: &FileResultFragment| match AtomicErrorCode::classify(f.error_code) {
            AtomicErrorCode::Running => true,
            AtomicErrorCode::Finished => f.below_full_progress(),
            _ => false,
        };
        match self.kind {
            TaskKind::File => ResultBatch::File(
                self.last_file
                    .values()
                    .filter(|f| f.owner_agent().is_some_and(|a| stopped.contains(a)))
                    .filter(|f| in_flight(f))
                    .map(|f| FileResultFragment {
                        error_code: AtomicErrorCode::TERMINATED,
                        error_msg: Some("task terminated".to_string()),
                        ..f.clone()
                    })
                    .collect(),
            ),
            TaskKind::Script => ResultBatch::Script(
                self.last_script
                    .values()
                    .filter(|f| stopped.contains(&f.agent_id))
                    .filter(|f| AtomicErrorCode::classify(f.error_code) == AtomicErrorCode::Running)
                    .map(|f| ScriptResultFragment {
                        error_code: AtomicErrorCode::TERMINATED,
                        content: None,
                        offset: None,
                        ..f.clone()
                    })
                    .collect(),
            ),
        }
    }
}

impl FleetBackend for ReplayBackend {
    fn poll(&mut self, request: PollRequest) -> BackendFuture<'_, ResultBatch> {
        Box::pin(async move {
            if request.task_id != self.task_id {
                return Err(ReconError::Backend(format!(
                    "unknown task id {} (replaying {})",
                    request.task_id, self.task_id
                )));
            }
            self.polls += 1;
            if self.batches.is_empty() && self.pending_termination.is_empty() {
                self.idle_polls += 1;
                if let Some(limit) = self.idle_limit.filter(|limit| self.idle_polls > *limit) {
                    return Err(ReconError::Backend(format!(
                        "replay for task {} exhausted for more than {limit} polls",
                        self.task_id
                    )));
                }
            }
            let batch = self.next_batch(&request);
            debug!(
                task_id = %self.task_id,
                poll = self.polls,
                fragments = batch.len(),
                remaining = self.batches.len(),
                "replayed result batch"
            );
            Ok(batch)
        })
    }

    fn stop_task(&mut self, task_id: String, agent_ids: Vec<AgentId>) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            info!(task_id = %task_id, agents = agent_ids.len(), "stop requested");
            if self.honors_stop {
                self.pending_termination.extend(agent_ids.iter().cloned());
            }
            self.stop_requests.push(StopRequest { task_id, agent_ids });
            Ok(())
        })
    }
}

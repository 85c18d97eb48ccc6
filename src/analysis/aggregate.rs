// src/analysis/aggregate.rs

//! Derives the task verdict from the state store.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::state::AgentTaskStateStore;
use crate::types::{AgentRole, TaskVerdict};

/// Inputs beyond the state store that influence the verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictInputs {
    /// Hosts were rejected before dispatch.
    pub has_invalid_host: bool,
    /// A TERMINATED fragment was observed.
    pub stop_observed: bool,
}

/// Computes one [`TaskVerdict`] per cycle.
///
/// Decision:
/// 1. any target not terminal -> RUNNING
/// 2. all sources terminal too -> SUCCESS if every target succeeded and no
///    host was invalid, else STOPPED when a clean stop was seen, else FAILED
/// 3. targets terminal, sources pending -> RUNNING until the grace period has
///    elapsed since targets first became terminal, then decide as in 2
///    ignoring the pending sources
#[derive(Debug)]
pub struct OverallStatusAggregator {
    grace_period: Duration,
    targets_terminal_since: Option<Instant>,
}

impl OverallStatusAggregator {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            targets_terminal_since: None,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// When all targets were first observed terminal, if ever.
    pub fn targets_terminal_since(&self) -> Option<Instant> {
        self.targets_terminal_since
    }

    pub fn evaluate(
        &mut self,
        state: &AgentTaskStateStore,
        inputs: VerdictInputs,
        at: Instant,
    ) -> TaskVerdict {
        let task_instance_id = state.task_instance_id();

        if !state.all_terminal(AgentRole::Target) {
            debug!(task_instance_id, "verdict running: targets not finished");
            return TaskVerdict::Running;
        }

        if state.all_terminal(AgentRole::Source) {
            let verdict = Self::decide(state, inputs);
            info!(
                task_instance_id,
                %verdict,
                "all source and target agents have finished"
            );
            return verdict;
        }

        let since = *self.targets_terminal_since.get_or_insert(at);
        let waited = at.saturating_duration_since(since);
        if waited >= self.grace_period {
            let verdict = Self::decide(state, inputs);
            info!(
                task_instance_id,
                %verdict,
                waited_ms = waited.as_millis() as u64,
                "targets finished but sources still pending after grace period; ignoring sources"
            );
            verdict
        } else {
            debug!(
                task_instance_id,
                waited_ms = waited.as_millis() as u64,
                "targets finished; waiting for sources"
            );
            TaskVerdict::Running
        }
    }

    fn decide(state: &AgentTaskStateStore, inputs: VerdictInputs) -> TaskVerdict {
        let all_succeeded =
            state.success_count(AgentRole::Target) == state.total(AgentRole::Target);
        if !inputs.has_invalid_host && all_succeeded {
            TaskVerdict::Success
        } else if inputs.stop_observed {
            TaskVerdict::Stopped
        } else {
            TaskVerdict::Failed
        }
    }
}

// src/state/tracker.rs

//! Per-agent, per-direction completion sets for subtasks.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::model::SubtaskKey;
use crate::types::{AgentId, AgentRole};

#[derive(Debug, Default)]
struct CompletionSets {
    finished: HashMap<AgentId, HashSet<SubtaskKey>>,
    succeeded: HashMap<AgentId, HashSet<SubtaskKey>>,
    /// Finished through an operator stop rather than a failure.
    stopped: HashMap<AgentId, HashSet<SubtaskKey>>,
}

impl CompletionSets {
    fn count(map: &HashMap<AgentId, HashSet<SubtaskKey>>, agent: &AgentId) -> usize {
        map.get(agent).map_or(0, HashSet::len)
    }
}

/// Records which subtasks have finished, and which of those succeeded.
///
/// Target sets hold downloads (or script executions); source sets hold
/// uploads.
///
/// Invariants:
/// - finished sets only grow
/// - succeeded and stopped are subsets of finished
/// - a subtask is folded into the counts at most once
/// - a failure outranks a stop for the same subtask
#[derive(Debug, Default)]
pub struct SubtaskCompletionTracker {
    targets: CompletionSets,
    sources: CompletionSets,
}

impl SubtaskCompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sets(&self, role: AgentRole) -> &CompletionSets {
        match role {
            AgentRole::Target => &self.targets,
            AgentRole::Source => &self.sources,
        }
    }

    fn sets_mut(&mut self, role: AgentRole) -> &mut CompletionSets {
        match role {
            AgentRole::Target => &mut self.targets,
            AgentRole::Source => &mut self.sources,
        }
    }

    /// Record a subtask as finished. Returns `false` if it was already
    /// finished, in which case nothing changes.
    pub fn mark_finished(
        &mut self,
        role: AgentRole,
        agent: &AgentId,
        key: &SubtaskKey,
        succeeded: bool,
    ) -> bool {
        let sets = self.sets_mut(role);
        let newly_added = sets
            .finished
            .entry(agent.clone())
            .or_default()
            .insert(key.clone());

        if newly_added && succeeded {
            sets.succeeded
                .entry(agent.clone())
                .or_default()
                .insert(key.clone());
        }

        trace!(
            agent_id = %agent,
            subtask = %key,
            ?role,
            succeeded,
            newly_added,
            "mark subtask finished"
        );
        newly_added
    }

    /// Record a subtask as finished because the task was stopped.
    pub fn mark_stopped(&mut self, role: AgentRole, agent: &AgentId, key: &SubtaskKey) -> bool {
        let newly_added = self.mark_finished(role, agent, key, false);
        if newly_added {
            self.sets_mut(role)
                .stopped
                .entry(agent.clone())
                .or_default()
                .insert(key.clone());
        }
        newly_added
    }

    /// Record a subtask as failed. A subtask already counted as stopped is
    /// restated as failed; any other finished subtask is left alone.
    pub fn mark_failed(&mut self, role: AgentRole, agent: &AgentId, key: &SubtaskKey) -> bool {
        if self.mark_finished(role, agent, key, false) {
            return true;
        }
        let restated = self
            .sets_mut(role)
            .stopped
            .get_mut(agent)
            .is_some_and(|set| set.remove(key));
        if restated {
            trace!(agent_id = %agent, subtask = %key, ?role, "stopped subtask restated as failed");
        }
        restated
    }

    pub fn is_stopped(&self, role: AgentRole, agent: &AgentId, key: &SubtaskKey) -> bool {
        self.sets(role)
            .stopped
            .get(agent)
            .is_some_and(|set| set.contains(key))
    }

    pub fn is_finished(&self, role: AgentRole, agent: &AgentId, key: &SubtaskKey) -> bool {
        self.sets(role)
            .finished
            .get(agent)
            .is_some_and(|set| set.contains(key))
    }

    pub fn finished_count(&self, role: AgentRole, agent: &AgentId) -> usize {
        CompletionSets::count(&self.sets(role).finished, agent)
    }

    pub fn success_count(&self, role: AgentRole, agent: &AgentId) -> usize {
        CompletionSets::count(&self.sets(role).succeeded, agent)
    }

    pub fn stopped_count(&self, role: AgentRole, agent: &AgentId) -> usize {
        CompletionSets::count(&self.sets(role).stopped, agent)
    }

    /// Subtasks that finished unsuccessfully for a reason other than a stop.
    pub fn failed_count(&self, role: AgentRole, agent: &AgentId) -> usize {
        self.finished_count(role, agent)
            .saturating_sub(self.success_count(role, agent))
            .saturating_sub(self.stopped_count(role, agent))
    }
}

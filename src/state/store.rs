// src/state/store.rs

//! Per-host task records for one task instance, in both roles.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::model::{AgentTask, HostInfo};
use crate::types::{AgentId, AgentRole, AgentTaskStatus};

/// Agent record plus the bookkeeping the analyzer needs.
#[derive(Debug, Clone)]
pub struct AgentEntry {
    pub task: AgentTask,
    /// Number of subtasks this agent owns in its role.
    pub total_subtasks: usize,
    /// No further fragments for this agent need to be analyzed.
    pub analysis_finished: bool,
}

/// Owns every [`AgentTask`] of one task instance.
///
/// Exclusively owned by the worker reconciling the task instance, so no
/// locking is involved. Changes are tracked so the loop can persist them at
/// least once per cycle.
#[derive(Debug)]
pub struct AgentTaskStateStore {
    task_instance_id: i64,
    targets: BTreeMap<AgentId, AgentEntry>,
    sources: BTreeMap<AgentId, AgentEntry>,
    changed: BTreeSet<(AgentRole, AgentId)>,
    observed_fragments: bool,
}

impl AgentTaskStateStore {
    pub fn new(task_instance_id: i64) -> Self {
        Self {
            task_instance_id,
            targets: BTreeMap::new(),
            sources: BTreeMap::new(),
            changed: BTreeSet::new(),
            observed_fragments: false,
        }
    }

    pub fn task_instance_id(&self) -> i64 {
        self.task_instance_id
    }

    fn entries(&self, role: AgentRole) -> &BTreeMap<AgentId, AgentEntry> {
        match role {
            AgentRole::Target => &self.targets,
            AgentRole::Source => &self.sources,
        }
    }

    fn entries_mut(&mut self, role: AgentRole) -> &mut BTreeMap<AgentId, AgentEntry> {
        match role {
            AgentRole::Target => &mut self.targets,
            AgentRole::Source => &mut self.sources,
        }
    }

    /// Register a host in a role. A host with no subtasks is vacuously done.
    pub fn add_agent(&mut self, role: AgentRole, host: &HostInfo, total_subtasks: usize) {
        let mut task = AgentTask::new(
            self.task_instance_id,
            host.agent_id.clone(),
            host.host_id,
            role,
        );
        let analysis_finished = total_subtasks == 0;
        if analysis_finished {
            task.advance(AgentTaskStatus::Success);
            self.changed.insert((role, host.agent_id.clone()));
        }

        self.entries_mut(role).insert(
            host.agent_id.clone(),
            AgentEntry {
                task,
                total_subtasks,
                analysis_finished,
            },
        );
    }

    /// Overlay persisted records onto the freshly built store so a new worker
    /// can resume where the previous owner stopped.
    pub fn restore(&mut self, records: impl IntoIterator<Item = AgentTask>) {
        for record in records {
            let role = record.role;
            let agent_id = record.agent_id.clone();
            if !self.contains(role, &agent_id) {
                warn!(agent_id = %agent_id, ?role, "persisted agent task not part of this task; ignoring");
                continue;
            }
            if record.status != AgentTaskStatus::NotStarted {
                self.observed_fragments = true;
            }
            let Some(entry) = self.entries_mut(role).get_mut(&agent_id) else {
                continue;
            };
            entry.analysis_finished = record.status.is_terminal();
            entry.task = record;
            debug!(
                agent_id = %agent_id,
                ?role,
                status = ?entry.task.status,
                "restored persisted agent task"
            );
        }
    }

    pub fn contains(&self, role: AgentRole, agent: &AgentId) -> bool {
        self.entries(role).contains_key(agent)
    }

    pub fn entry(&self, role: AgentRole, agent: &AgentId) -> Option<&AgentEntry> {
        self.entries(role).get(agent)
    }

    pub fn agent_task(&self, role: AgentRole, agent: &AgentId) -> Option<&AgentTask> {
        self.entry(role, agent).map(|e| &e.task)
    }

    pub fn status_of(&self, role: AgentRole, agent: &AgentId) -> Option<AgentTaskStatus> {
        self.agent_task(role, agent).map(|t| t.status)
    }

    pub fn agent_ids(&self, role: AgentRole) -> impl Iterator<Item = &AgentId> {
        self.entries(role).keys()
    }

    pub fn is_analysis_finished(&self, role: AgentRole, agent: &AgentId) -> bool {
        self.entry(role, agent).is_some_and(|e| e.analysis_finished)
    }

    pub fn total_subtasks(&self, role: AgentRole, agent: &AgentId) -> usize {
        self.entry(role, agent).map_or(0, |e| e.total_subtasks)
    }

    /// First fragment for an agent: stamp start time and remember that the
    /// backend has started reporting.
    pub fn note_fragment(&mut self, role: AgentRole, agent: &AgentId, start_time: i64, error_code: i32) {
        self.observed_fragments = true;
        let Some(entry) = self.entries_mut(role).get_mut(agent) else {
            return;
        };
        if entry.task.is_terminal() {
            return;
        }
        if entry.task.start_time.is_none() {
            entry.task.start_time = Some(start_time);
        }
        entry.task.error_code = error_code;
        self.changed.insert((role, agent.clone()));
    }

    /// Move an agent to RUNNING unless it is already terminal.
    pub fn mark_running(&mut self, role: AgentRole, agent: &AgentId) -> bool {
        let Some(entry) = self.entries_mut(role).get_mut(agent) else {
            return false;
        };
        let advanced = entry.task.advance(AgentTaskStatus::Running);
        if advanced {
            self.changed.insert((role, agent.clone()));
        }
        advanced
    }

    /// Move an agent into a terminal status. No-op once terminal.
    pub fn finish_agent(
        &mut self,
        role: AgentRole,
        agent: &AgentId,
        status: AgentTaskStatus,
        end_time: i64,
    ) -> bool {
        debug_assert!(status.is_terminal());
        let Some(entry) = self.entries_mut(role).get_mut(agent) else {
            return false;
        };
        if !entry.task.advance(status) {
            return false;
        }
        if entry.task.start_time.is_none() {
            entry.task.start_time = Some(end_time);
        }
        entry.task.end_time = Some(end_time);
        entry.task.calculate_total_time();
        entry.analysis_finished = true;
        self.changed.insert((role, agent.clone()));
        true
    }

    /// Restate a STOPPED agent as FAILED once one of its stopped subtasks
    /// turns out to have failed. Any other status is left alone.
    pub fn restate_stopped_as_failed(&mut self, role: AgentRole, agent: &AgentId) -> bool {
        let Some(entry) = self.entries_mut(role).get_mut(agent) else {
            return false;
        };
        if entry.task.status != AgentTaskStatus::Stopped {
            return false;
        }
        entry.task.status = AgentTaskStatus::Failed;
        self.changed.insert((role, agent.clone()));
        true
    }

    /// Attach exit code / output tag to an agent task.
    pub fn set_script_result(&mut self, agent: &AgentId, exit_code: Option<i32>, tag: Option<String>) {
        if let Some(entry) = self.targets.get_mut(agent) {
            if exit_code.is_some() {
                entry.task.exit_code = exit_code;
            }
            if tag.is_some() {
                entry.task.tag = tag;
            }
            self.changed.insert((AgentRole::Target, agent.clone()));
        }
    }

    /// Every agent of the role is in a terminal status.
    pub fn all_terminal(&self, role: AgentRole) -> bool {
        self.entries(role).values().all(|e| e.task.is_terminal())
    }

    pub fn total(&self, role: AgentRole) -> usize {
        self.entries(role).len()
    }

    pub fn success_count(&self, role: AgentRole) -> usize {
        self.entries(role)
            .values()
            .filter(|e| e.task.status == AgentTaskStatus::Success)
            .count()
    }

    /// Agent ids (both roles) that are not yet terminal.
    pub fn non_terminal_agent_ids(&self) -> BTreeSet<AgentId> {
        self.targets
            .values()
            .chain(self.sources.values())
            .filter(|e| !e.task.is_terminal())
            .map(|e| e.task.agent_id.clone())
            .collect()
    }

    /// Every agent id of the task instance, both roles.
    pub fn all_agent_ids(&self) -> BTreeSet<AgentId> {
        self.targets.keys().chain(self.sources.keys()).cloned().collect()
    }

    pub fn has_observed_fragments(&self) -> bool {
        self.observed_fragments
    }

    /// Records changed since the last call.
    pub fn take_changed(&mut self) -> Vec<AgentTask> {
        let changed = std::mem::take(&mut self.changed);
        changed
            .into_iter()
            .filter_map(|(role, agent)| self.agent_task(role, &agent).cloned())
            .collect()
    }
}

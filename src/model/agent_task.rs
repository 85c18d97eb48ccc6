// src/model/agent_task.rs

use serde::{Deserialize, Serialize};

use crate::types::{AgentId, AgentRole, AgentTaskStatus};

/// One host's participation in one task instance, in one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_instance_id: i64,
    pub agent_id: AgentId,
    #[serde(default)]
    pub host_id: Option<i64>,
    pub role: AgentRole,
    pub status: AgentTaskStatus,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub total_time: Option<i64>,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Free-form tag / output summary.
    #[serde(default)]
    pub tag: Option<String>,
}

impl AgentTask {
    pub fn new(task_instance_id: i64, agent_id: AgentId, host_id: Option<i64>, role: AgentRole) -> Self {
        Self {
            task_instance_id,
            agent_id,
            host_id,
            role,
            status: AgentTaskStatus::NotStarted,
            start_time: None,
            end_time: None,
            total_time: None,
            error_code: 0,
            exit_code: None,
            tag: None,
        }
    }

    /// Move to `next` if the transition is forward. Returns whether the status
    /// changed.
    pub fn advance(&mut self, next: AgentTaskStatus) -> bool {
        if self.status == next || !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn calculate_total_time(&mut self) {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end > start {
                self.total_time = Some(end - start);
            }
        }
    }
}

// src/engine/schedule.rs

//! Poll cadence and poll targeting per task kind.
//!
//! Both strategies poll every agent until the backend has reported anything
//! at all, then narrow down to agents that are not terminal yet. Intervals
//! start short, lengthen after a number of polls, and back off exponentially
//! while polls keep failing.

use std::time::Duration;

use crate::backend::PollTarget;
use crate::config::ScheduleTable;
use crate::state::AgentTaskStateStore;

pub trait ScheduleStrategy: Send + std::fmt::Debug {
    /// Which agents the next poll should ask about.
    fn next_poll_target(&self, state: &AgentTaskStateStore) -> PollTarget;

    /// Sleep before the next poll.
    fn next_interval(&self, polls_done: u32, consecutive_failures: u32) -> Duration;
}

fn narrowed_target(state: &AgentTaskStateStore) -> PollTarget {
    if !state.has_observed_fragments() {
        return PollTarget::All;
    }
    PollTarget::Agents(state.non_terminal_agent_ids())
}

fn interval_for(table: &ScheduleTable, polls_done: u32, consecutive_failures: u32) -> Duration {
    if consecutive_failures > 0 {
        let exponent = consecutive_failures.min(16);
        let backoff = table
            .initial_interval
            .saturating_mul(1u32 << exponent);
        return backoff.min(table.failure_backoff_max);
    }
    if polls_done < table.backoff_after_polls {
        table.initial_interval
    } else {
        table.max_interval
    }
}

/// Cadence for file distribution tasks.
#[derive(Debug, Clone)]
pub struct FileScheduleStrategy {
    table: ScheduleTable,
}

impl FileScheduleStrategy {
    pub fn new(table: ScheduleTable) -> Self {
        Self { table }
    }
}

impl Default for FileScheduleStrategy {
    fn default() -> Self {
        Self::new(ScheduleTable::file_defaults())
    }
}

impl ScheduleStrategy for FileScheduleStrategy {
    fn next_poll_target(&self, state: &AgentTaskStateStore) -> PollTarget {
        narrowed_target(state)
    }

    fn next_interval(&self, polls_done: u32, consecutive_failures: u32) -> Duration {
        interval_for(&self.table, polls_done, consecutive_failures)
    }
}

/// Cadence for script execution tasks. Scripts are usually short, so they
/// are polled more eagerly.
#[derive(Debug, Clone)]
pub struct ScriptScheduleStrategy {
    table: ScheduleTable,
}

impl ScriptScheduleStrategy {
    pub fn new(table: ScheduleTable) -> Self {
        Self { table }
    }
}

impl Default for ScriptScheduleStrategy {
    fn default() -> Self {
        Self::new(ScheduleTable::script_defaults())
    }
}

impl ScheduleStrategy for ScriptScheduleStrategy {
    fn next_poll_target(&self, state: &AgentTaskStateStore) -> PollTarget {
        narrowed_target(state)
    }

    fn next_interval(&self, polls_done: u32, consecutive_failures: u32) -> Duration {
        interval_for(&self.table, polls_done, consecutive_failures)
    }
}

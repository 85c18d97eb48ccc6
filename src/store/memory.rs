// src/store/memory.rs

//! In-memory stores. Clones share the same underlying data.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{ReconError, Result};
use crate::model::{AgentTask, HostLogEntry};
use crate::store::{LogStore, StoreFuture, TaskStore};
use crate::types::{AgentId, AgentRole, TaskVerdict};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ReconError::Store("in-memory store lock poisoned".to_string()))
}

/// Keeps every written log entry, in write order.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    entries: Arc<Mutex<Vec<HostLogEntry>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Result<Vec<HostLogEntry>> {
        Ok(lock(&self.entries)?.clone())
    }

    pub fn entries_for(&self, task_instance_id: i64) -> Result<Vec<HostLogEntry>> {
        Ok(lock(&self.entries)?
            .iter()
            .filter(|e| e.task_instance_id == task_instance_id)
            .cloned()
            .collect())
    }
}

impl LogStore for MemoryLogStore {
    fn write_logs(&self, task_instance_id: i64, entries: Vec<HostLogEntry>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            debug!(task_instance_id, count = entries.len(), "writing execution logs");
            lock(&self.entries)?.extend(entries);
            Ok(())
        })
    }
}

type AgentTaskKey = (i64, AgentRole, AgentId);

#[derive(Debug, Default)]
struct TaskTables {
    agent_tasks: BTreeMap<AgentTaskKey, AgentTask>,
    verdicts: HashMap<i64, TaskVerdict>,
    /// Number of upserts, for observing write amplification.
    writes: usize,
}

/// Upserting agent-task table plus verdict table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tables: Arc<Mutex<TaskTables>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records as if a previous worker had persisted them.
    pub fn seed(&self, tasks: impl IntoIterator<Item = AgentTask>) -> Result<()> {
        let mut tables = lock(&self.tables)?;
        for task in tasks {
            tables
                .agent_tasks
                .insert((task.task_instance_id, task.role, task.agent_id.clone()), task);
        }
        Ok(())
    }

    pub fn agent_tasks(&self, task_instance_id: i64) -> Result<Vec<AgentTask>> {
        Ok(lock(&self.tables)?
            .agent_tasks
            .values()
            .filter(|t| t.task_instance_id == task_instance_id)
            .cloned()
            .collect())
    }

    pub fn agent_task(
        &self,
        task_instance_id: i64,
        role: AgentRole,
        agent_id: &AgentId,
    ) -> Result<Option<AgentTask>> {
        Ok(lock(&self.tables)?
            .agent_tasks
            .get(&(task_instance_id, role, agent_id.clone()))
            .cloned())
    }

    pub fn verdict(&self, task_instance_id: i64) -> Result<Option<TaskVerdict>> {
        Ok(lock(&self.tables)?.verdicts.get(&task_instance_id).copied())
    }

    pub fn write_count(&self) -> Result<usize> {
        Ok(lock(&self.tables)?.writes)
    }
}

impl TaskStore for MemoryTaskStore {
    fn save_agent_tasks(&self, tasks: Vec<AgentTask>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = lock(&self.tables)?;
            for task in tasks {
                tables.writes += 1;
                tables
                    .agent_tasks
                    .insert((task.task_instance_id, task.role, task.agent_id.clone()), task);
            }
            Ok(())
        })
    }

    fn load_agent_tasks(&self, task_instance_id: i64) -> StoreFuture<'_, Vec<AgentTask>> {
        Box::pin(async move { self.agent_tasks(task_instance_id) })
    }

    fn save_verdict(&self, task_instance_id: i64, verdict: TaskVerdict) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            lock(&self.tables)?.verdicts.insert(task_instance_id, verdict);
            Ok(())
        })
    }
}

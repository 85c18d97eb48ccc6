// src/backend/mod.rs

//! Fleet backend abstraction.
//!
//! The reconciliation loop talks to a `FleetBackend` instead of a concrete
//! client. This keeps the loop testable with scripted backends while a
//! production client implements the same two calls: pull the atomic results
//! of one task, and request a stop.
//!
//! - [`replay`] provides `ReplayBackend`, which serves pre-recorded batches
//!   (used by the CLI to replay scenarios).

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::{FileResultFragment, ScriptResultFragment};
use crate::types::{AgentId, TaskKind};

pub mod replay;

pub use replay::ReplayBackend;

/// Future returned by backend calls.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Which agents the next poll should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTarget {
    /// Every agent of the task (first poll).
    All,
    /// Only these agents.
    Agents(BTreeSet<AgentId>),
}

/// Request for the current atomic results of one backend task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub task_id: String,
    pub kind: TaskKind,
    /// `None` requests every agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ids: Option<Vec<AgentId>>,
}

impl PollRequest {
    pub fn new(task_id: impl Into<String>, kind: TaskKind, target: PollTarget) -> Self {
        let agent_ids = match target {
            PollTarget::All => None,
            PollTarget::Agents(ids) => Some(ids.into_iter().collect()),
        };
        Self {
            task_id: task_id.into(),
            kind,
            agent_ids,
        }
    }

    /// Whether a given agent is covered by this request.
    pub fn covers(&self, agent: &AgentId) -> bool {
        self.agent_ids
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|id| id == agent))
    }
}

/// One polled batch of fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "results", rename_all = "lowercase")]
pub enum ResultBatch {
    File(Vec<FileResultFragment>),
    Script(Vec<ScriptResultFragment>),
}

impl ResultBatch {
    pub fn empty(kind: TaskKind) -> Self {
        match kind {
            TaskKind::File => ResultBatch::File(Vec::new()),
            TaskKind::Script => ResultBatch::Script(Vec::new()),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            ResultBatch::File(_) => TaskKind::File,
            ResultBatch::Script(_) => TaskKind::Script,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResultBatch::File(f) => f.len(),
            ResultBatch::Script(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait abstracting the fleet backend.
pub trait FleetBackend: Send {
    /// Pull the current atomic results for a task.
    fn poll(&mut self, request: PollRequest) -> BackendFuture<'_, ResultBatch>;

    /// Ask the backend to stop a task on the given agents.
    fn stop_task(&mut self, task_id: String, agent_ids: Vec<AgentId>) -> BackendFuture<'_, ()>;
}

impl<B: FleetBackend + ?Sized> FleetBackend for Box<B> {
    fn poll(&mut self, request: PollRequest) -> BackendFuture<'_, ResultBatch> {
        (**self).poll(request)
    }

    fn stop_task(&mut self, task_id: String, agent_ids: Vec<AgentId>) -> BackendFuture<'_, ()> {
        (**self).stop_task(task_id, agent_ids)
    }
}

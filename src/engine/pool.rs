// src/engine/pool.rs

//! Bounded pool of reconciliation workers.
//!
//! Every job gets its own Tokio task and its own [`ReconciliationLoop`]; a
//! semaphore caps how many loops poll at the same time. A task instance is
//! only ever handled by the worker that owns its job.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::analysis::ResultAnalyzer;
use crate::backend::FleetBackend;
use crate::config::ConfigFile;
use crate::engine::control::StopSignal;
use crate::engine::core::ReconcileCore;
use crate::engine::runtime::ReconciliationLoop;
use crate::errors::{ReconError, Result};
use crate::model::{FileTaskSpec, ScriptTaskSpec};
use crate::store::{LogStore, TaskStore};
use crate::types::TaskVerdict;

/// Boxed backend handed to a worker.
pub type DynBackend = Box<dyn FleetBackend>;

/// One task instance to reconcile.
pub enum ReconcileJob {
    File {
        spec: FileTaskSpec,
        backend: DynBackend,
        stop: Option<StopSignal>,
    },
    Script {
        spec: ScriptTaskSpec,
        backend: DynBackend,
        stop: Option<StopSignal>,
    },
}

impl ReconcileJob {
    pub fn file(spec: FileTaskSpec, backend: DynBackend) -> Self {
        ReconcileJob::File {
            spec,
            backend,
            stop: None,
        }
    }

    pub fn script(spec: ScriptTaskSpec, backend: DynBackend) -> Self {
        ReconcileJob::Script {
            spec,
            backend,
            stop: None,
        }
    }

    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        match &mut self {
            ReconcileJob::File { stop, .. } | ReconcileJob::Script { stop, .. } => {
                *stop = Some(signal);
            }
        }
        self
    }

    pub fn task_instance_id(&self) -> i64 {
        match self {
            ReconcileJob::File { spec, .. } => spec.task_instance_id,
            ReconcileJob::Script { spec, .. } => spec.task_instance_id,
        }
    }
}

impl fmt::Debug for ReconcileJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ReconcileJob::File { .. } => "file",
            ReconcileJob::Script { .. } => "script",
        };
        f.debug_struct("ReconcileJob")
            .field("kind", &kind)
            .field("task_instance_id", &self.task_instance_id())
            .finish_non_exhaustive()
    }
}

pub struct WorkerPool {
    config: Arc<ConfigFile>,
    log_store: Arc<dyn LogStore>,
    task_store: Arc<dyn TaskStore>,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.pool.workers)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        config: Arc<ConfigFile>,
        log_store: Arc<dyn LogStore>,
        task_store: Arc<dyn TaskStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.pool.workers.max(1)));
        Self {
            config,
            log_store,
            task_store,
            permits,
        }
    }

    /// Reconcile every job to completion. Results are ordered by task
    /// instance id.
    pub async fn run_all(&self, jobs: Vec<ReconcileJob>) -> Vec<(i64, Result<TaskVerdict>)> {
        let mut set = JoinSet::new();
        let mut ids = HashMap::new();

        info!(jobs = jobs.len(), workers = self.config.pool.workers, "starting worker pool");
        for job in jobs {
            let task_instance_id = job.task_instance_id();
            let permits = Arc::clone(&self.permits);
            let config = Arc::clone(&self.config);
            let log_store = Arc::clone(&self.log_store);
            let task_store = Arc::clone(&self.task_store);

            let handle = set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| ReconError::Other(e.into()))?;
                debug!(task_instance_id, "worker acquired");
                reconcile_job(job, &config, log_store, task_store).await
            });
            ids.insert(handle.id(), task_instance_id);
        }

        let mut results = Vec::with_capacity(ids.len());
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    let task_instance_id = ids.get(&id).copied().unwrap_or_default();
                    results.push((task_instance_id, result));
                }
                Err(join_error) => {
                    let task_instance_id = ids.get(&join_error.id()).copied().unwrap_or_default();
                    error!(task_instance_id, error = %join_error, "reconciliation worker crashed");
                    results.push((
                        task_instance_id,
                        Err(ReconError::Other(anyhow::anyhow!(
                            "worker for task instance {task_instance_id} crashed: {join_error}"
                        ))),
                    ));
                }
            }
        }

        results.sort_by_key(|(id, _)| *id);
        results
    }
}

async fn reconcile_job(
    job: ReconcileJob,
    config: &ConfigFile,
    log_store: Arc<dyn LogStore>,
    task_store: Arc<dyn TaskStore>,
) -> Result<TaskVerdict> {
    match job {
        ReconcileJob::File {
            spec,
            backend,
            stop,
        } => {
            let core = ReconcileCore::for_file_task(spec, config);
            drive(core, backend, stop, config, log_store, task_store).await
        }
        ReconcileJob::Script {
            spec,
            backend,
            stop,
        } => {
            let core = ReconcileCore::for_script_task(spec, config);
            drive(core, backend, stop, config, log_store, task_store).await
        }
    }
}

async fn drive<A: ResultAnalyzer>(
    core: ReconcileCore<A>,
    backend: DynBackend,
    stop: Option<StopSignal>,
    config: &ConfigFile,
    log_store: Arc<dyn LogStore>,
    task_store: Arc<dyn TaskStore>,
) -> Result<TaskVerdict> {
    let mut reconciliation = ReconciliationLoop::new(
        core,
        backend,
        log_store,
        task_store,
        config.engine.max_consecutive_poll_failures,
    );
    if let Some(stop) = stop {
        reconciliation = reconciliation.with_stop_signal(stop);
    }
    reconciliation.resume_from_store().await?;
    reconciliation.run().await
}

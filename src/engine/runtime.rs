// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::analysis::ResultAnalyzer;
use crate::backend::FleetBackend;
use crate::engine::control::StopSignal;
use crate::engine::core::{CycleOutcome, ReconcileCore, Tick};
use crate::errors::{ReconError, Result};
use crate::store::{LogStore, TaskStore};
use crate::types::{now_millis, TaskVerdict};

/// Drives one task instance to a verdict.
///
/// An IO shell around [`ReconcileCore`]: each cycle it checks for a stop
/// command, polls the backend, feeds the batch to the core, persists the
/// logs and changed agent tasks, and sleeps until the next poll. The loop
/// exclusively owns its core, so no other worker touches this task's state.
pub struct ReconciliationLoop<A: ResultAnalyzer, B: FleetBackend> {
    core: ReconcileCore<A>,
    backend: B,
    log_store: Arc<dyn LogStore>,
    task_store: Arc<dyn TaskStore>,
    stop: StopSignal,
    max_consecutive_poll_failures: u32,
}

impl<A: ResultAnalyzer, B: FleetBackend> fmt::Debug for ReconciliationLoop<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationLoop")
            .field("task_instance_id", &self.core.task_instance_id())
            .field("verdict", &self.core.verdict())
            .field("polls_done", &self.core.polls_done())
            .finish_non_exhaustive()
    }
}

impl<A: ResultAnalyzer, B: FleetBackend> ReconciliationLoop<A, B> {
    pub fn new(
        core: ReconcileCore<A>,
        backend: B,
        log_store: Arc<dyn LogStore>,
        task_store: Arc<dyn TaskStore>,
        max_consecutive_poll_failures: u32,
    ) -> Self {
        Self {
            core,
            backend,
            log_store,
            task_store,
            stop: StopSignal::never(),
            max_consecutive_poll_failures: max_consecutive_poll_failures.max(1),
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn core(&self) -> &ReconcileCore<A> {
        &self.core
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Pick up where a previous owner of this task instance stopped.
    ///
    /// Returns the number of persisted agent tasks found.
    pub async fn resume_from_store(&mut self) -> Result<usize> {
        let task_instance_id = self.core.task_instance_id();
        let records = self.task_store.load_agent_tasks(task_instance_id).await?;
        let count = records.len();
        if count > 0 {
            info!(task_instance_id, records = count, "resuming from persisted agent tasks");
            self.core.restore(records);
        }
        Ok(count)
    }

    /// Run cycles until the verdict is no longer RUNNING.
    pub async fn run(&mut self) -> Result<TaskVerdict> {
        let task_instance_id = self.core.task_instance_id();
        info!(task_instance_id, "reconciliation started");

        loop {
            if self.stop.take_request() {
                self.forward_stop().await;
            }

            let request = self.core.poll_request();
            debug!(task_instance_id, ?request, "polling backend");

            match self.backend.poll(request).await {
                Ok(batch) => {
                    let tick = Tick {
                        at: tokio::time::Instant::now().into_std(),
                        now_ms: now_millis(),
                    };
                    let outcome = self.core.step(batch, tick)?;
                    self.persist(&outcome).await?;

                    if outcome.verdict.is_finished() {
                        self.task_store
                            .save_verdict(task_instance_id, outcome.verdict)
                            .await?;
                        info!(
                            task_instance_id,
                            verdict = %outcome.verdict,
                            polls = self.core.polls_done(),
                            "reconciliation finished"
                        );
                        return Ok(outcome.verdict);
                    }
                }
                Err(e) => {
                    let failures = self.core.record_poll_failure();
                    warn!(
                        task_instance_id,
                        failures,
                        max = self.max_consecutive_poll_failures,
                        error = %e,
                        "polling backend failed"
                    );
                    if failures >= self.max_consecutive_poll_failures {
                        return Err(ReconError::PollRetriesExhausted {
                            attempts: failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }

            let interval = self.core.next_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop.requested() => {
                    debug!(task_instance_id, "stop requested; polling early");
                }
            }
        }
    }

    async fn persist(&mut self, outcome: &CycleOutcome) -> Result<()> {
        let task_instance_id = self.core.task_instance_id();
        let started = Instant::now();

        if !outcome.logs.is_empty() {
            self.log_store
                .write_logs(task_instance_id, outcome.logs.clone())
                .await?;
        }
        if !outcome.changed_agent_tasks.is_empty() {
            self.task_store
                .save_agent_tasks(outcome.changed_agent_tasks.clone())
                .await?;
        }

        let flush_time = started.elapsed();
        let total = outcome.analysis_time + flush_time;
        if total > self.core.slow_analysis_threshold() {
            info!(
                task_instance_id,
                analysis_ms = outcome.analysis_time.as_millis() as u64,
                flush_ms = flush_time.as_millis() as u64,
                log_entries = outcome.logs.len(),
                agent_tasks = outcome.changed_agent_tasks.len(),
                "analysing results is slow"
            );
        }
        Ok(())
    }

    /// Ask the backend to stop every agent that is still working. The
    /// TERMINATED fragments that follow decide the verdict.
    async fn forward_stop(&mut self) {
        let task_instance_id = self.core.task_instance_id();
        if !self.core.note_stop_requested() {
            return;
        }
        let agents: Vec<_> = self
            .core
            .state()
            .non_terminal_agent_ids()
            .into_iter()
            .collect();
        if agents.is_empty() {
            debug!(task_instance_id, "stop requested but every agent is already terminal");
            return;
        }

        let task_id = self.core.analyzer().backend_task_id().to_string();
        info!(task_instance_id, task_id = %task_id, agents = agents.len(), "forwarding stop to backend");
        if let Err(e) = self.backend.stop_task(task_id, agents).await {
            warn!(task_instance_id, error = %e, "backend refused stop; continuing to poll");
        }
    }
}

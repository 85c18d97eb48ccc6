// src/engine/core.rs

//! Pure reconciliation core.
//!
//! `ReconcileCore` owns everything that decides a task instance's fate: the
//! analyzer (and through it the state store and tracker), the poll schedule,
//! the verdict aggregator and the log buffer. It consumes polled batches and
//! returns what the IO shell should persist. No Tokio, channels, or stores
//! are involved, so cycles can be driven deterministically in tests.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::analysis::{
    AnalyzerOptions, ExecutionLogAssembler, FileResultAnalyzer, OverallStatusAggregator,
    ResultAnalyzer, ScriptResultAnalyzer,
};
use crate::backend::{PollRequest, ResultBatch};
use crate::config::ConfigFile;
use crate::engine::schedule::{FileScheduleStrategy, ScheduleStrategy, ScriptScheduleStrategy};
use crate::errors::Result;
use crate::model::{AgentTask, FileTaskSpec, HostLogEntry, ScriptTaskSpec};
use crate::state::AgentTaskStateStore;
use crate::types::{now_millis, TaskVerdict};

/// Clock reading for one cycle. `at` drives the grace window, `now_ms`
/// fills in missing fragment timestamps.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub at: Instant,
    pub now_ms: i64,
}

impl Tick {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            now_ms: now_millis(),
        }
    }
}

/// What one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub verdict: TaskVerdict,
    /// Log entries to append, grouped per host.
    pub logs: Vec<HostLogEntry>,
    /// Agent tasks changed during this cycle.
    pub changed_agent_tasks: Vec<AgentTask>,
    pub analysis_time: Duration,
}

#[derive(Debug)]
pub struct ReconcileCore<A: ResultAnalyzer> {
    analyzer: A,
    schedule: Box<dyn ScheduleStrategy>,
    aggregator: OverallStatusAggregator,
    logs: ExecutionLogAssembler,
    polls_done: u32,
    consecutive_failures: u32,
    slow_analysis_threshold: Duration,
    stop_requested: bool,
    verdict: TaskVerdict,
}

impl<A: ResultAnalyzer> ReconcileCore<A> {
    pub fn new(
        analyzer: A,
        schedule: Box<dyn ScheduleStrategy>,
        grace_period: Duration,
        slow_analysis_threshold: Duration,
    ) -> Self {
        let logs = ExecutionLogAssembler::new(analyzer.log_context());
        Self {
            analyzer,
            schedule,
            aggregator: OverallStatusAggregator::new(grace_period),
            logs,
            polls_done: 0,
            consecutive_failures: 0,
            slow_analysis_threshold,
            stop_requested: false,
            verdict: TaskVerdict::Running,
        }
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn state(&self) -> &AgentTaskStateStore {
        self.analyzer.state()
    }

    /// Overlay persisted agent tasks (see [`AgentTaskStateStore::restore`]).
    pub fn restore(&mut self, records: Vec<AgentTask>) {
        self.analyzer.state_mut().restore(records);
    }

    pub fn task_instance_id(&self) -> i64 {
        self.analyzer.state().task_instance_id()
    }

    pub fn verdict(&self) -> TaskVerdict {
        self.verdict
    }

    /// Cycles slower than this are worth an info line.
    pub fn slow_analysis_threshold(&self) -> Duration {
        self.slow_analysis_threshold
    }

    pub fn polls_done(&self) -> u32 {
        self.polls_done
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Request for the next poll, narrowed by the schedule strategy.
    pub fn poll_request(&self) -> PollRequest {
        let target = self.schedule.next_poll_target(self.analyzer.state());
        PollRequest::new(self.analyzer.backend_task_id(), self.analyzer.kind(), target)
    }

    /// Fold one polled batch into state and derive the verdict.
    pub fn step(&mut self, batch: ResultBatch, tick: Tick) -> Result<CycleOutcome> {
        self.polls_done = self.polls_done.saturating_add(1);
        self.consecutive_failures = 0;

        let fragments = batch.len();
        let started = Instant::now();
        if !self.verdict.is_finished() {
            self.analyzer.analyze(batch, &mut self.logs, tick.now_ms)?;
            self.verdict = self.aggregator.evaluate(
                self.analyzer.state(),
                self.analyzer.verdict_inputs(),
                tick.at,
            );
        }
        let analysis_time = started.elapsed();

        let logs = self.logs.drain();
        let changed_agent_tasks = self.analyzer.state_mut().take_changed();
        debug!(
            task_instance_id = self.task_instance_id(),
            poll = self.polls_done,
            fragments,
            log_entries = logs.len(),
            changed = changed_agent_tasks.len(),
            verdict = %self.verdict,
            "reconciliation cycle"
        );

        Ok(CycleOutcome {
            verdict: self.verdict,
            logs,
            changed_agent_tasks,
            analysis_time,
        })
    }

    /// Count a failed poll. Returns the number of failures in a row.
    pub fn record_poll_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub fn next_interval(&self) -> Duration {
        self.schedule
            .next_interval(self.polls_done, self.consecutive_failures)
    }

    /// Mark that a stop was forwarded to the backend. Returns `false` if one
    /// had already been forwarded.
    pub fn note_stop_requested(&mut self) -> bool {
        !std::mem::replace(&mut self.stop_requested, true)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

impl ReconcileCore<FileResultAnalyzer> {
    pub fn for_file_task(spec: FileTaskSpec, config: &ConfigFile) -> Self {
        let options = AnalyzerOptions {
            finished_below_full_progress_is_running: config
                .engine
                .finished_below_full_progress_is_running,
            local_upload_dir: config.storage.local_upload_dir.clone(),
        };
        Self::new(
            FileResultAnalyzer::new(spec, options),
            Box::new(FileScheduleStrategy::new(config.schedule.file)),
            config.engine.upload_grace_period,
            config.engine.slow_analysis_threshold,
        )
    }
}

impl ReconcileCore<ScriptResultAnalyzer> {
    pub fn for_script_task(spec: ScriptTaskSpec, config: &ConfigFile) -> Self {
        Self::new(
            ScriptResultAnalyzer::new(spec),
            Box::new(ScriptScheduleStrategy::new(config.schedule.script)),
            config.engine.upload_grace_period,
            config.engine.slow_analysis_threshold,
        )
    }
}

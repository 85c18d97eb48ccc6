// src/analysis/script.rs

//! Script-execution result analysis. Every target agent runs the script
//! exactly once, so each agent owns a single subtask.

use tracing::{debug, info, warn};

use crate::analysis::logs::{ExecutionLogAssembler, LogContext};
use crate::analysis::{ResultAnalyzer, VerdictInputs};
use crate::backend::ResultBatch;
use crate::errors::{ReconError, Result};
use crate::model::{HostDirectory, ScriptResultFragment, ScriptTaskSpec, SubtaskKey};
use crate::state::{AgentTaskStateStore, SubtaskCompletionTracker};
use crate::types::{AgentId, AgentRole, AgentTaskStatus, AtomicErrorCode, TaskKind};

const ROLE: AgentRole = AgentRole::Target;

#[derive(Debug)]
pub struct ScriptResultAnalyzer {
    spec: ScriptTaskSpec,
    hosts: HostDirectory,
    state: AgentTaskStateStore,
    tracker: SubtaskCompletionTracker,
    stop_observed: bool,
}

impl ScriptResultAnalyzer {
    pub fn new(spec: ScriptTaskSpec) -> Self {
        let mut state = AgentTaskStateStore::new(spec.task_instance_id);
        for target in &spec.targets {
            state.add_agent(ROLE, target, 1);
        }
        let hosts = HostDirectory::new(spec.targets.iter());

        info!(
            task_instance_id = spec.task_instance_id,
            backend_task_id = %spec.gse_task_id,
            targets = spec.targets.len(),
            "initialised script result analyzer"
        );

        Self {
            spec,
            hosts,
            state,
            tracker: SubtaskCompletionTracker::new(),
            stop_observed: false,
        }
    }

    pub fn spec(&self) -> &ScriptTaskSpec {
        &self.spec
    }

    fn analyse_fragment(
        &mut self,
        fragment: &ScriptResultFragment,
        logs: &mut ExecutionLogAssembler,
        now_ms: i64,
    ) {
        let agent = &fragment.agent_id;
        if !self.state.contains(ROLE, agent) {
            warn!(
                task_instance_id = self.spec.task_instance_id,
                agent_id = %agent,
                "script result for agent outside this task; skipping"
            );
            return;
        }
        if self.state.is_analysis_finished(ROLE, agent) {
            return;
        }
        let key = SubtaskKey::for_script(agent);
        if self.tracker.is_finished(ROLE, agent, &key) {
            return;
        }

        self.state
            .note_fragment(ROLE, agent, fragment.start_time_or(now_ms), fragment.error_code);

        let host = self.hosts.resolve(agent);
        if let Some(content) = fragment.content.as_deref() {
            logs.add_script_output(agent, host.host_id, &host.ip, fragment.offset, content);
        }

        let end_time = fragment.end_time_or(now_ms);
        match AtomicErrorCode::classify(fragment.error_code) {
            AtomicErrorCode::Running => {
                self.state.mark_running(ROLE, agent);
            }
            AtomicErrorCode::Finished => {
                let succeeded = fragment.exit_code.unwrap_or(0) == 0;
                self.state
                    .set_script_result(agent, fragment.exit_code, None);
                self.tracker.mark_finished(ROLE, agent, &key, succeeded);
                self.evaluate_agent(agent, end_time);
            }
            AtomicErrorCode::Terminated => {
                self.tracker.mark_stopped(ROLE, agent, &key);
                self.stop_observed = true;
                self.evaluate_agent(agent, end_time);
            }
            AtomicErrorCode::Failed(error_code) => {
                debug!(
                    task_instance_id = self.spec.task_instance_id,
                    agent_id = %agent,
                    error_code,
                    "script execution failed"
                );
                self.state
                    .set_script_result(agent, fragment.exit_code, fragment.error_msg.clone());
                self.tracker.mark_finished(ROLE, agent, &key, false);
                if let Some(msg) = fragment.error_msg.as_deref().filter(|m| !m.trim().is_empty()) {
                    logs.add_script_note(host.host_id, &host.ip, msg);
                }
                self.evaluate_agent(agent, end_time);
            }
        }
    }

    fn evaluate_agent(&mut self, agent: &AgentId, end_time: i64) {
        let status = if self.tracker.success_count(ROLE, agent) >= 1 {
            AgentTaskStatus::Success
        } else if self.tracker.stopped_count(ROLE, agent) >= 1 {
            AgentTaskStatus::Stopped
        } else {
            AgentTaskStatus::Failed
        };
        if self.state.finish_agent(ROLE, agent, status, end_time) {
            info!(
                task_instance_id = self.spec.task_instance_id,
                agent_id = %agent,
                ?status,
                "script agent finished"
            );
        }
    }
}

impl ResultAnalyzer for ScriptResultAnalyzer {
    fn kind(&self) -> TaskKind {
        TaskKind::Script
    }

    fn backend_task_id(&self) -> &str {
        &self.spec.gse_task_id
    }

    fn log_context(&self) -> LogContext {
        LogContext {
            task_instance_id: self.spec.task_instance_id,
            batch: self.spec.batch,
            execute_count: self.spec.execute_count,
        }
    }

    fn analyze(
        &mut self,
        batch: ResultBatch,
        logs: &mut ExecutionLogAssembler,
        now_ms: i64,
    ) -> Result<()> {
        let ResultBatch::Script(fragments) = batch else {
            return Err(ReconError::UnexpectedBatch {
                expected: TaskKind::Script,
                got: batch.kind(),
            });
        };
        for fragment in &fragments {
            self.analyse_fragment(fragment, logs, now_ms);
        }
        Ok(())
    }

    fn state(&self) -> &AgentTaskStateStore {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentTaskStateStore {
        &mut self.state
    }

    fn verdict_inputs(&self) -> VerdictInputs {
        VerdictInputs {
            has_invalid_host: self.spec.has_invalid_host,
            stop_observed: self.stop_observed,
        }
    }
}

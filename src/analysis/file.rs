// src/analysis/file.rs

//! File-transfer result analysis.
//!
//! Each fragment describes one file in one direction. Downloads belong to
//! the destination (target) agent, uploads to the source agent. An upload
//! failure means no download fragment will ever arrive for that file, so the
//! failure is synthesized on every target.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::analysis::format::{is_directory_path, progress_text, readable_size, speed_text};
use crate::analysis::logs::{ExecutionLogAssembler, LogContext};
use crate::analysis::{AnalyzerOptions, ResultAnalyzer, VerdictInputs};
use crate::backend::ResultBatch;
use crate::errors::{ReconError, Result};
use crate::model::{
    FileLogLine, FileResultFragment, FileTaskSpec, HostDirectory, HostInfo, SubtaskKey,
};
use crate::state::{AgentTaskStateStore, SubtaskCompletionTracker};
use crate::types::{AgentId, AgentRole, AgentTaskStatus, AtomicErrorCode, Direction, FileDistStatus, TaskKind};

/// Analyzer for file distribution tasks.
#[derive(Debug)]
pub struct FileResultAnalyzer {
    spec: FileTaskSpec,
    hosts: HostDirectory,
    options: AnalyzerOptions,
    state: AgentTaskStateStore,
    tracker: SubtaskCompletionTracker,
    target_ids: Vec<AgentId>,
    /// Source ip -> cloud area, for repairing legacy download fragments.
    source_cloud_areas: HashMap<String, i64>,
    stop_observed: bool,
}

impl FileResultAnalyzer {
    pub fn new(spec: FileTaskSpec, options: AnalyzerOptions) -> Self {
        let mut state = AgentTaskStateStore::new(spec.task_instance_id);
        let file_count = spec.files.len();
        for target in &spec.targets {
            state.add_agent(AgentRole::Target, target, file_count);
        }

        let upload_counts = spec.upload_counts();
        let mut source_hosts: Vec<HostInfo> = spec.sources.clone();
        for agent in upload_counts.keys() {
            if !source_hosts.iter().any(|h| &h.agent_id == agent) {
                source_hosts.push(HostInfo::unresolved(agent));
            }
        }
        for source in &source_hosts {
            let count = upload_counts.get(&source.agent_id).copied().unwrap_or(0);
            state.add_agent(AgentRole::Source, source, count);
        }

        let source_cloud_areas = source_hosts
            .iter()
            .filter_map(|h| Some((h.agent_id.ip().to_string(), h.agent_id.cloud_area()?)))
            .collect();

        let hosts = HostDirectory::new(spec.targets.iter().chain(source_hosts.iter()));
        let target_ids = spec.targets.iter().map(|h| h.agent_id.clone()).collect();

        info!(
            task_instance_id = spec.task_instance_id,
            backend_task_id = %spec.gse_task_id,
            files = file_count,
            targets = spec.targets.len(),
            sources = source_hosts.len(),
            ?upload_counts,
            "initialised file result analyzer"
        );

        Self {
            spec,
            hosts,
            options,
            state,
            tracker: SubtaskCompletionTracker::new(),
            target_ids,
            source_cloud_areas,
            stop_observed: false,
        }
    }

    pub fn tracker(&self) -> &SubtaskCompletionTracker {
        &self.tracker
    }

    pub fn spec(&self) -> &FileTaskSpec {
        &self.spec
    }

    /// Legacy agents report download-side source ids without the cloud
    /// area (`:<ip>`). Recover it from the known source agents.
    fn repair_source_agent(&self, fragment: &mut FileResultFragment) {
        if fragment.mode != Direction::Download || !fragment.source_agent_id.is_missing_cloud_area() {
            return;
        }
        let ip = fragment.source_agent_id.ip().to_string();
        match self.source_cloud_areas.get(&ip) {
            Some(cloud_area) => {
                let repaired = AgentId::from_parts(*cloud_area, &ip);
                debug!(
                    task_instance_id = self.spec.task_instance_id,
                    from = %fragment.source_agent_id,
                    to = %repaired,
                    "repaired source agent id missing cloud area"
                );
                fragment.source_agent_id = repaired;
            }
            None => warn!(
                task_instance_id = self.spec.task_instance_id,
                source_agent_id = %fragment.source_agent_id,
                "source agent id missing cloud area and no source host matches its ip"
            ),
        }
    }

    /// Idempotency gate. Returns the owning agent and subtask key when the
    /// fragment still needs analysis.
    fn gate(&self, fragment: &FileResultFragment) -> Option<(AgentId, SubtaskKey)> {
        let Some(owner) = fragment.owner_agent() else {
            warn!(
                task_instance_id = self.spec.task_instance_id,
                source_agent_id = %fragment.source_agent_id,
                "download fragment without destination agent; skipping"
            );
            return None;
        };
        let role = fragment.direction().owner_role();
        if !self.state.contains(role, owner) {
            trace!(agent_id = %owner, ?role, "fragment for agent outside this task; skipping");
            return None;
        }
        let key = fragment.subtask_key();
        // A failure still has to restate a subtask that was counted as stopped.
        let restates_stop = matches!(
            AtomicErrorCode::classify(fragment.error_code),
            AtomicErrorCode::Failed(_)
        ) && self.tracker.is_stopped(role, owner, &key);
        if !restates_stop
            && (self.state.is_analysis_finished(role, owner)
                || self.tracker.is_finished(role, owner, &key))
        {
            return None;
        }
        Some((owner.clone(), key))
    }

    /// A TERMINATED fragment proves the task was stopped, even when its
    /// subtask was already counted through another path.
    fn observe_stop(&mut self, fragment: &FileResultFragment) {
        if AtomicErrorCode::classify(fragment.error_code) != AtomicErrorCode::Terminated {
            return;
        }
        let role = fragment.direction().owner_role();
        if fragment
            .owner_agent()
            .is_some_and(|owner| self.state.contains(role, owner))
        {
            self.stop_observed = true;
        }
    }

    fn analyse_fragment(
        &mut self,
        owner: AgentId,
        key: SubtaskKey,
        fragment: &FileResultFragment,
        logs: &mut ExecutionLogAssembler,
        now_ms: i64,
    ) {
        let role = fragment.direction().owner_role();
        self.state
            .note_fragment(role, &owner, fragment.start_time_or(now_ms), fragment.error_code);

        let code = AtomicErrorCode::classify(fragment.error_code);
        match code {
            AtomicErrorCode::Running => {
                self.log_progress(&key, code, fragment, logs);
                self.state.mark_running(role, &owner);
            }
            AtomicErrorCode::Finished
                if fragment.below_full_progress()
                    && self.options.finished_below_full_progress_is_running =>
            {
                self.log_progress(&key, AtomicErrorCode::Running, fragment, logs);
                self.state.mark_running(role, &owner);
            }
            AtomicErrorCode::Finished => {
                self.log_progress(&key, code, fragment, logs);
                self.tracker.mark_finished(role, &owner, &key, true);
                self.evaluate_agent(role, &owner, fragment.end_time_or(now_ms));
            }
            AtomicErrorCode::Terminated => {
                self.log_progress(&key, code, fragment, logs);
                self.tracker.mark_stopped(role, &owner, &key);
                self.evaluate_agent(role, &owner, fragment.end_time_or(now_ms));
            }
            AtomicErrorCode::Failed(error_code) => {
                debug!(
                    task_instance_id = self.spec.task_instance_id,
                    agent_id = %owner,
                    subtask = %key,
                    error_code,
                    error_msg = fragment.error_msg.as_deref().unwrap_or(""),
                    "file subtask failed"
                );
                match fragment.direction() {
                    Direction::Download => self.fail_download(&owner, &key, fragment, logs, now_ms),
                    Direction::Upload => self.fail_upload(&owner, &key, fragment, logs, now_ms),
                }
            }
        }
    }

    fn fail_download(
        &mut self,
        dest: &AgentId,
        key: &SubtaskKey,
        fragment: &FileResultFragment,
        logs: &mut ExecutionLogAssembler,
        now_ms: i64,
    ) {
        if self.tracker.mark_failed(AgentRole::Target, dest, key) {
            let dest_path = fragment.standard_dest_path();
            let (host, line) = self.download_failure_line(dest, dest_path, fragment);
            logs.add_file_log(host.host_id, &host.ip, line);
        }
        self.evaluate_agent(AgentRole::Target, dest, fragment.end_time_or(now_ms));
    }

    fn fail_upload(
        &mut self,
        source: &AgentId,
        key: &SubtaskKey,
        fragment: &FileResultFragment,
        logs: &mut ExecutionLogAssembler,
        now_ms: i64,
    ) {
        let end_time = fragment.end_time_or(now_ms);
        if self.tracker.mark_failed(AgentRole::Source, source, key) {
            let source_host = self.hosts.resolve(source);
            let source_path = fragment.standard_source_path();
            let line = FileLogLine {
                mode: Direction::Upload,
                dest_host_id: None,
                dest_ip: None,
                dest_path: None,
                src_host_id: source_host.host_id,
                src_ip: Some(source_host.ip.clone()),
                src_display_ip: Some(source_host.display_ip().to_string()),
                display_src_path: Some(self.display_path(&source_path)),
                src_path: Some(source_path),
                size: None,
                status: 0,
                status_name: String::new(),
                speed: None,
                progress: None,
                content: fragment.error_msg.clone(),
            }
            .with_status(FileDistStatus::Failed);
            logs.add_file_log(source_host.host_id, &source_host.ip, line);
        }
        self.evaluate_agent(AgentRole::Source, source, end_time);

        // No download fragment will ever arrive for this file.
        let source_path = fragment.standard_source_path();
        let dest_path = self
            .spec
            .dest_path_for(source, &source_path, self.is_local_upload(&source_path))
            .map(str::to_string)
            .or_else(|| fragment.standard_dest_path());

        let targets = self.target_ids.clone();
        let mut affected = 0usize;
        for target in &targets {
            let cascade_key = SubtaskKey::build(
                Direction::Download,
                source,
                &source_path,
                Some(target),
                dest_path.as_deref(),
            );
            if self.state.is_analysis_finished(AgentRole::Target, target)
                && !self.tracker.is_stopped(AgentRole::Target, target, &cascade_key)
            {
                continue;
            }
            if self.tracker.mark_failed(AgentRole::Target, target, &cascade_key) {
                affected += 1;
                let mut synthesized = fragment.clone();
                synthesized.mode = Direction::Download;
                synthesized.dest_agent_id = Some(target.clone());
                let (host, line) =
                    self.download_failure_line(target, dest_path.clone(), &synthesized);
                logs.add_file_log(host.host_id, &host.ip, line);
            }
            self.evaluate_agent(AgentRole::Target, target, end_time);
        }

        info!(
            task_instance_id = self.spec.task_instance_id,
            source_agent_id = %source,
            source_path = %source_path,
            affected_targets = affected,
            "upload failed; failed the matching download on every target"
        );
    }

    /// Re-evaluate an agent once all its subtasks might be finished.
    fn evaluate_agent(&mut self, role: AgentRole, agent: &AgentId, end_time: i64) {
        let total = self.state.total_subtasks(role, agent);
        let finished = self.tracker.finished_count(role, agent);
        if finished < total {
            self.state.mark_running(role, agent);
            return;
        }

        let succeeded = self.tracker.success_count(role, agent);
        let stopped = self.tracker.stopped_count(role, agent);
        let failed = self.tracker.failed_count(role, agent);
        let status = if succeeded >= total {
            AgentTaskStatus::Success
        } else if stopped > 0 && failed == 0 {
            AgentTaskStatus::Stopped
        } else {
            AgentTaskStatus::Failed
        };

        if self.state.finish_agent(role, agent, status, end_time) {
            info!(
                task_instance_id = self.spec.task_instance_id,
                agent_id = %agent,
                ?role,
                ?status,
                finished,
                succeeded,
                expected = total,
                "agent analysis finished"
            );
        } else if status == AgentTaskStatus::Failed
            && self.state.restate_stopped_as_failed(role, agent)
        {
            info!(
                task_instance_id = self.spec.task_instance_id,
                agent_id = %agent,
                ?role,
                failed,
                "stopped agent restated as failed"
            );
        }
    }

    fn is_local_upload(&self, source_path: &str) -> bool {
        self.options
            .local_upload_dir
            .as_deref()
            .is_some_and(|dir| !dir.is_empty() && source_path.starts_with(dir))
    }

    fn display_path(&self, source_path: &str) -> String {
        self.spec
            .display_path_of(source_path)
            .map(str::to_string)
            .unwrap_or_else(|| source_path.to_string())
    }

    fn log_progress(
        &self,
        key: &SubtaskKey,
        code: AtomicErrorCode,
        fragment: &FileResultFragment,
        logs: &mut ExecutionLogAssembler,
    ) {
        if !logs.should_log_progress(key, code, fragment.progress) {
            return;
        }
        let (host, line) = self.progress_line(code, fragment);
        logs.add_file_log(host.host_id, &host.ip, line);
    }

    fn progress_status(code: AtomicErrorCode, fragment: &FileResultFragment) -> FileDistStatus {
        match code {
            AtomicErrorCode::Running => FileDistStatus::in_flight(fragment.mode),
            AtomicErrorCode::Finished if fragment.below_full_progress() => {
                FileDistStatus::in_flight(fragment.mode)
            }
            AtomicErrorCode::Finished => FileDistStatus::Finished,
            _ => FileDistStatus::Failed,
        }
    }

    /// Build a progress/finished line for the host owning the fragment.
    fn progress_line(&self, code: AtomicErrorCode, fragment: &FileResultFragment) -> (HostInfo, FileLogLine) {
        let source_host = self.hosts.resolve(&fragment.source_agent_id);
        let source_path = fragment.standard_source_path();
        let display_source_path = self.display_path(&source_path);
        let is_download = fragment.mode == Direction::Download;

        let shown_path = if is_download {
            fragment.standard_dest_path().unwrap_or_default()
        } else {
            display_source_path.clone()
        };

        let size = fragment
            .size
            .filter(|s| *s > 0)
            .map(readable_size)
            .unwrap_or_else(|| "--".to_string());
        let speed = fragment.speed.map(speed_text);
        let progress = fragment.progress.map(progress_text);

        let mut content = String::new();
        content.push_str(if is_directory_path(&shown_path) {
            "Directory: "
        } else {
            "FileName: "
        });
        content.push_str(&shown_path);
        if fragment.size.is_some_and(|s| s > 0) {
            content.push_str(" FileSize: ");
            content.push_str(&size);
        }
        if let Some(status) = fragment.status {
            content.push_str(&format!(" Status: {status}"));
        }
        if let Some(info) = fragment.status_info.as_deref().filter(|s| !s.is_empty()) {
            content.push_str(" StatusDesc: ");
            content.push_str(info);
        }
        if let Some(speed) = &speed {
            content.push_str(" Speed: ");
            content.push_str(speed);
        }
        if let Some(progress) = &progress {
            content.push_str(" Progress: ");
            content.push_str(progress);
        }
        if let Some(msg) = fragment.error_msg.as_deref().filter(|m| !m.trim().is_empty()) {
            content.push_str(" Detail: ");
            content.push_str(msg);
        }

        let status = Self::progress_status(code, fragment);
        if is_download {
            let dest_host = fragment
                .dest_agent_id
                .as_ref()
                .map(|a| self.hosts.resolve(a))
                .unwrap_or_else(|| source_host.clone());
            let line = FileLogLine {
                mode: Direction::Download,
                dest_host_id: dest_host.host_id,
                dest_ip: Some(dest_host.ip.clone()),
                dest_path: fragment.standard_dest_path(),
                src_host_id: source_host.host_id,
                src_ip: Some(source_host.ip.clone()),
                src_display_ip: Some(source_host.display_ip().to_string()),
                src_path: Some(source_path),
                display_src_path: Some(display_source_path),
                size: Some(size),
                status: 0,
                status_name: String::new(),
                speed,
                progress,
                content: Some(content),
            }
            .with_status(status);
            (dest_host, line)
        } else {
            let line = FileLogLine {
                mode: Direction::Upload,
                dest_host_id: None,
                dest_ip: None,
                dest_path: None,
                src_host_id: source_host.host_id,
                src_ip: Some(source_host.ip.clone()),
                src_display_ip: Some(source_host.display_ip().to_string()),
                src_path: Some(source_path),
                display_src_path: Some(display_source_path),
                size: Some(size),
                status: 0,
                status_name: String::new(),
                speed,
                progress,
                content: Some(content),
            }
            .with_status(status);
            (source_host, line)
        }
    }

    fn download_failure_line(
        &self,
        dest: &AgentId,
        dest_path: Option<String>,
        fragment: &FileResultFragment,
    ) -> (HostInfo, FileLogLine) {
        let dest_host = self.hosts.resolve(dest);
        let source_host = self.hosts.resolve(&fragment.source_agent_id);
        let source_path = fragment.standard_source_path();
        let line = FileLogLine {
            mode: Direction::Download,
            dest_host_id: dest_host.host_id,
            dest_ip: Some(dest_host.ip.clone()),
            dest_path,
            src_host_id: source_host.host_id,
            src_ip: Some(source_host.ip.clone()),
            src_display_ip: Some(source_host.display_ip().to_string()),
            display_src_path: Some(self.display_path(&source_path)),
            src_path: Some(source_path),
            size: None,
            status: 0,
            status_name: String::new(),
            speed: None,
            progress: None,
            content: fragment.error_msg.clone(),
        }
        .with_status(FileDistStatus::Failed);
        (dest_host, line)
    }
}

impl ResultAnalyzer for FileResultAnalyzer {
    fn kind(&self) -> TaskKind {
        TaskKind::File
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
        let ResultBatch::File(fragments) = batch else {
            return Err(ReconError::UnexpectedBatch {
                expected: TaskKind::File,
                got: batch.kind(),
            });
        };

        let started = Instant::now();
        let received = fragments.len();
        let mut analysed = 0usize;
        for mut fragment in fragments {
            self.repair_source_agent(&mut fragment);
            self.observe_stop(&fragment);
            let Some((owner, key)) = self.gate(&fragment) else {
                continue;
            };
            analysed += 1;
            self.analyse_fragment(owner, key, &fragment, logs, now_ms);
        }

        debug!(
            task_instance_id = self.spec.task_instance_id,
            received,
            analysed,
            running_or_pending = ?self.state.non_terminal_agent_ids(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysed file result batch"
        );
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

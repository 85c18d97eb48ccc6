#![allow(dead_code)]

use jobrecon::config::model::{RawEngineSection, RawScheduleTable};
use jobrecon::config::{ConfigFile, RawConfigFile};
use jobrecon::model::{
    FileResultFragment, FileTaskSpec, HostInfo, ScriptResultFragment, ScriptTaskSpec, SendFile,
    standardize_path,
};
use jobrecon::types::{AgentId, AtomicErrorCode, Direction};

/// `<cloud>:<ip>` agent id.
pub fn agent(cloud: i64, ip: &str) -> AgentId {
    AgentId::from_parts(cloud, ip)
}

/// Resolved host with a numeric host id.
pub fn host(cloud: i64, ip: &str, host_id: i64) -> HostInfo {
    HostInfo {
        agent_id: agent(cloud, ip),
        host_id: Some(host_id),
        ip: format!("{cloud}:{ip}"),
        display_ip: Some(ip.to_string()),
    }
}

/// Builder for `ConfigFile`, going through the same validation as a file.
pub struct ConfigBuilder {
    raw: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawConfigFile::default(),
        }
    }

    pub fn grace_period(mut self, value: &str) -> Self {
        self.raw.engine.upload_grace_period = Some(value.to_string());
        self
    }

    pub fn finished_below_full_progress_is_running(mut self, value: bool) -> Self {
        self.raw.engine.finished_below_full_progress_is_running = Some(value);
        self
    }

    pub fn max_poll_failures(mut self, value: u32) -> Self {
        self.raw.engine.max_consecutive_poll_failures = Some(value);
        self
    }

    pub fn engine(mut self, engine: RawEngineSection) -> Self {
        self.raw.engine = engine;
        self
    }

    pub fn file_schedule(mut self, initial: &str, backoff_after_polls: u32, max: &str) -> Self {
        self.raw.schedule.file = RawScheduleTable {
            initial_interval: Some(initial.to_string()),
            backoff_after_polls: Some(backoff_after_polls),
            max_interval: Some(max.to_string()),
            failure_backoff_max: None,
        };
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.raw.pool.workers = Some(workers);
        self
    }

    pub fn local_upload_dir(mut self, dir: &str) -> Self {
        self.raw.storage.local_upload_dir = Some(dir.to_string());
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `FileTaskSpec`.
pub struct FileTaskBuilder {
    spec: FileTaskSpec,
}

impl FileTaskBuilder {
    pub fn new(task_instance_id: i64) -> Self {
        Self {
            spec: FileTaskSpec {
                task_instance_id,
                gse_task_id: format!("GSE_{task_instance_id}"),
                batch: 0,
                execute_count: 1,
                targets: Vec::new(),
                sources: Vec::new(),
                files: Vec::new(),
                dest_paths: Default::default(),
                has_invalid_host: false,
            },
        }
    }

    pub fn target(mut self, host: HostInfo) -> Self {
        self.spec.targets.push(host);
        self
    }

    pub fn source(mut self, host: HostInfo) -> Self {
        self.spec.sources.push(host);
        self
    }

    /// Add a file and the full path it lands at on the targets.
    pub fn file(mut self, source: &AgentId, path: &str, dest_path: &str) -> Self {
        self.spec.files.push(SendFile {
            source_agent_id: source.clone(),
            path: path.to_string(),
            display_path: None,
        });
        self.spec.dest_paths.insert(
            format!("{}:{}", source, standardize_path(path)),
            dest_path.to_string(),
        );
        self
    }

    /// Add a locally staged file shown as `display_path`.
    pub fn local_file(
        mut self,
        source: &AgentId,
        staged_path: &str,
        display_path: &str,
        dest_path: &str,
    ) -> Self {
        self.spec.files.push(SendFile {
            source_agent_id: source.clone(),
            path: staged_path.to_string(),
            display_path: Some(display_path.to_string()),
        });
        self.spec
            .dest_paths
            .insert(display_path.to_string(), dest_path.to_string());
        self
    }

    pub fn invalid_host(mut self) -> Self {
        self.spec.has_invalid_host = true;
        self
    }

    pub fn build(self) -> FileTaskSpec {
        self.spec
    }
}

/// Builder for `ScriptTaskSpec`.
pub struct ScriptTaskBuilder {
    spec: ScriptTaskSpec,
}

impl ScriptTaskBuilder {
    pub fn new(task_instance_id: i64) -> Self {
        Self {
            spec: ScriptTaskSpec {
                task_instance_id,
                gse_task_id: format!("GSE_{task_instance_id}"),
                batch: 0,
                execute_count: 1,
                targets: Vec::new(),
                has_invalid_host: false,
            },
        }
    }

    pub fn target(mut self, host: HostInfo) -> Self {
        self.spec.targets.push(host);
        self
    }

    pub fn invalid_host(mut self) -> Self {
        self.spec.has_invalid_host = true;
        self
    }

    pub fn build(self) -> ScriptTaskSpec {
        self.spec
    }
}

/// Builder for `FileResultFragment`. Starts as a RUNNING fragment at 0%.
#[derive(Clone)]
pub struct FileFragmentBuilder {
    fragment: FileResultFragment,
}

impl FileFragmentBuilder {
    pub fn download(source: &AgentId, source_path: &str, dest: &AgentId, dest_path: &str) -> Self {
        Self {
            fragment: FileResultFragment {
                mode: Direction::Download,
                source_agent_id: source.clone(),
                dest_agent_id: Some(dest.clone()),
                source_file_path: source_path.to_string(),
                dest_file_path: Some(dest_path.to_string()),
                task_id: None,
                progress: Some(0),
                speed: None,
                size: None,
                status: None,
                status_info: None,
                error_code: AtomicErrorCode::RUNNING,
                error_msg: None,
                start_time: None,
                end_time: None,
            },
        }
    }

    pub fn upload(source: &AgentId, source_path: &str) -> Self {
        Self {
            fragment: FileResultFragment {
                mode: Direction::Upload,
                source_agent_id: source.clone(),
                dest_agent_id: None,
                source_file_path: source_path.to_string(),
                dest_file_path: None,
                task_id: None,
                progress: Some(0),
                speed: None,
                size: None,
                status: None,
                status_info: None,
                error_code: AtomicErrorCode::RUNNING,
                error_msg: None,
                start_time: None,
                end_time: None,
            },
        }
    }

    pub fn running(mut self, progress: u8) -> Self {
        self.fragment.error_code = AtomicErrorCode::RUNNING;
        self.fragment.progress = Some(progress);
        self
    }

    pub fn finished(mut self) -> Self {
        self.fragment.error_code = AtomicErrorCode::FINISHED;
        self.fragment.progress = Some(100);
        self
    }

    /// FINISHED code but with less than full progress.
    pub fn finished_at(mut self, progress: u8) -> Self {
        self.fragment.error_code = AtomicErrorCode::FINISHED;
        self.fragment.progress = Some(progress);
        self
    }

    pub fn failed(mut self, error_code: i32, msg: &str) -> Self {
        self.fragment.error_code = error_code;
        self.fragment.error_msg = Some(msg.to_string());
        self
    }

    pub fn terminated(mut self) -> Self {
        self.fragment.error_code = AtomicErrorCode::TERMINATED;
        self
    }

    pub fn size(mut self, bytes: u64) -> Self {
        self.fragment.size = Some(bytes);
        self
    }

    pub fn speed(mut self, kb_per_sec: u64) -> Self {
        self.fragment.speed = Some(kb_per_sec);
        self
    }

    pub fn times(mut self, start: i64, end: i64) -> Self {
        self.fragment.start_time = Some(start);
        self.fragment.end_time = Some(end);
        self
    }

    pub fn task_id(mut self, task_id: &str) -> Self {
        self.fragment.task_id = Some(task_id.to_string());
        self
    }

    pub fn build(self) -> FileResultFragment {
        self.fragment
    }
}

/// Builder for `ScriptResultFragment`. Starts as RUNNING without output.
#[derive(Clone)]
pub struct ScriptFragmentBuilder {
    fragment: ScriptResultFragment,
}

impl ScriptFragmentBuilder {
    pub fn new(agent: &AgentId) -> Self {
        Self {
            fragment: ScriptResultFragment {
                agent_id: agent.clone(),
                error_code: AtomicErrorCode::RUNNING,
                exit_code: None,
                error_msg: None,
                content: None,
                offset: None,
                start_time: None,
                end_time: None,
            },
        }
    }

    pub fn output(mut self, offset: u64, content: &str) -> Self {
        self.fragment.offset = Some(offset);
        self.fragment.content = Some(content.to_string());
        self
    }

    pub fn finished(mut self, exit_code: i32) -> Self {
        self.fragment.error_code = AtomicErrorCode::FINISHED;
        self.fragment.exit_code = Some(exit_code);
        self
    }

    pub fn failed(mut self, error_code: i32, msg: &str) -> Self {
        self.fragment.error_code = error_code;
        self.fragment.error_msg = Some(msg.to_string());
        self
    }

    pub fn terminated(mut self) -> Self {
        self.fragment.error_code = AtomicErrorCode::TERMINATED;
        self
    }

    pub fn build(self) -> ScriptResultFragment {
        self.fragment
    }
}

// src/model/task.rs

//! Static description of a dispatched task instance, as handed to the engine
//! by the dispatcher.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::fragment::standardize_path;
use crate::model::host::HostInfo;
use crate::types::AgentId;

fn default_execute_count() -> u32 {
    1
}

/// One source file to distribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFile {
    pub source_agent_id: AgentId,
    pub path: String,
    /// Alias shown to users instead of the real (staged) path.
    #[serde(default)]
    pub display_path: Option<String>,
}

/// A file distribution task instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTaskSpec {
    pub task_instance_id: i64,
    pub gse_task_id: String,
    #[serde(default)]
    pub batch: u32,
    #[serde(default = "default_execute_count")]
    pub execute_count: u32,
    pub targets: Vec<HostInfo>,
    #[serde(default)]
    pub sources: Vec<HostInfo>,
    pub files: Vec<SendFile>,
    /// Full destination file path of each source file on the targets.
    ///
    /// Keyed by `<sourceAgentId>:<sourcePath>`, or by display path for
    /// locally staged uploads.
    #[serde(default)]
    pub dest_paths: HashMap<String, String>,
    /// Hosts were rejected before dispatch (unreachable, no agent, ...).
    #[serde(default)]
    pub has_invalid_host: bool,
}

impl FileTaskSpec {
    /// Number of upload subtasks per source agent.
    pub fn upload_counts(&self) -> BTreeMap<AgentId, usize> {
        let mut counts = BTreeMap::new();
        for file in &self.files {
            *counts.entry(file.source_agent_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Display alias of a source path, if any.
    pub fn display_path_of(&self, source_path: &str) -> Option<&str> {
        let standard = standardize_path(source_path);
        self.files
            .iter()
            .find(|f| standardize_path(&f.path) == standard)
            .and_then(|f| f.display_path.as_deref())
    }

    /// Destination path of a source file on every target.
    pub fn dest_path_for(
        &self,
        source_agent: &AgentId,
        source_path: &str,
        is_local_upload: bool,
    ) -> Option<&str> {
        let key = if is_local_upload {
            self.display_path_of(source_path)?.to_string()
        } else {
            format!("{}:{}", source_agent, standardize_path(source_path))
        };
        self.dest_paths.get(&key).map(String::as_str)
    }
}

/// A script execution task instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptTaskSpec {
    pub task_instance_id: i64,
    pub gse_task_id: String,
    #[serde(default)]
    pub batch: u32,
    #[serde(default = "default_execute_count")]
    pub execute_count: u32,
    pub targets: Vec<HostInfo>,
    #[serde(default)]
    pub has_invalid_host: bool,
}

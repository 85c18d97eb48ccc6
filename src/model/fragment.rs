// src/model/fragment.rs

//! Atomic result fragments as reported by the fleet backend.
//!
//! Fragments are ephemeral: the analyzer folds them into agent/subtask state
//! and execution-log lines, then drops them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AgentId, Direction};

/// Stable identity of one file subtask.
///
/// Derived from `(direction, source agent, source path, dest agent, dest
/// path)` so that a download fragment and an upload-side cascade compute the
/// same key for the same transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubtaskKey(String);

impl SubtaskKey {
    pub fn build(
        direction: Direction,
        source_agent: &AgentId,
        source_path: &str,
        dest_agent: Option<&AgentId>,
        dest_path: Option<&str>,
    ) -> Self {
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            direction.mode(),
            source_agent,
            standardize_path(source_path),
            dest_agent.map(AgentId::as_str).unwrap_or(""),
            dest_path.map(standardize_path).unwrap_or_default(),
        );
        Self(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }

    /// Script subtasks have exactly one subtask per agent.
    pub fn for_script(agent: &AgentId) -> Self {
        let canonical = format!("script|{agent}");
        Self(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubtaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell subtasks apart in logs.
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Normalize a file path the way the backend reports it: trimmed, with
/// repeated `/` collapsed.
pub fn standardize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut prev_slash = false;
    for c in trimmed.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// One incremental update for one file subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResultFragment {
    pub mode: Direction,
    pub source_agent_id: AgentId,
    #[serde(default)]
    pub dest_agent_id: Option<AgentId>,
    pub source_file_path: String,
    #[serde(default)]
    pub dest_file_path: Option<String>,
    /// Backend's own subtask id; informational only.
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
    /// KB/s.
    #[serde(default)]
    pub speed: Option<u64>,
    /// Bytes.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub status_info: Option<String>,
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

impl FileResultFragment {
    pub fn direction(&self) -> Direction {
        self.mode
    }

    /// Agent responsible for this fragment: destination for downloads,
    /// source for uploads.
    pub fn owner_agent(&self) -> Option<&AgentId> {
        match self.mode {
            Direction::Download => self.dest_agent_id.as_ref(),
            Direction::Upload => Some(&self.source_agent_id),
        }
    }

    pub fn standard_source_path(&self) -> String {
        standardize_path(&self.source_file_path)
    }

    pub fn standard_dest_path(&self) -> Option<String> {
        self.dest_file_path.as_deref().map(standardize_path)
    }

    pub fn subtask_key(&self) -> SubtaskKey {
        SubtaskKey::build(
            self.mode,
            &self.source_agent_id,
            &self.source_file_path,
            self.dest_agent_id.as_ref(),
            self.dest_file_path.as_deref(),
        )
    }

    /// A known progress value below 100%. Unknown progress counts as complete.
    pub fn below_full_progress(&self) -> bool {
        self.progress.is_some_and(|p| p < 100)
    }

    pub fn start_time_or(&self, now_ms: i64) -> i64 {
        positive_or(self.start_time, now_ms)
    }

    pub fn end_time_or(&self, now_ms: i64) -> i64 {
        positive_or(self.end_time, now_ms)
    }
}

/// One incremental update for a script execution on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResultFragment {
    pub agent_id: AgentId,
    pub error_code: i32,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error_msg: Option<String>,
    /// Output chunk starting at `offset` bytes into the full script output.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

impl ScriptResultFragment {
    pub fn start_time_or(&self, now_ms: i64) -> i64 {
        positive_or(self.start_time, now_ms)
    }

    pub fn end_time_or(&self, now_ms: i64) -> i64 {
        positive_or(self.end_time, now_ms)
    }
}

fn positive_or(value: Option<i64>, fallback: i64) -> i64 {
    match value {
        Some(v) if v > 0 => v,
        _ => fallback,
    }
}

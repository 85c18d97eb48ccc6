// src/types.rs

//! Small shared vocabulary types used across the engine.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ReconError;

/// Identifier of a host agent within one network zone: `<cloudAreaId>:<ip>`.
///
/// Legacy agents sometimes report the source side of a transfer as `:<ip>`
/// (no cloud area). Such ids parse successfully so the analyzer can repair
/// them; `cloud_area()` returns `None` for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

fn agent_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<cloud>\d*):(?P<ip>[0-9A-Za-z.:\[\]_-]+)$").expect("static regex")
    })
}

impl AgentId {
    pub fn parse(raw: &str) -> Result<Self, ReconError> {
        let raw = raw.trim();
        if agent_id_regex().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ReconError::InvalidAgentId(raw.to_string()))
        }
    }

    pub fn from_parts(cloud_area: i64, ip: &str) -> Self {
        Self(format!("{cloud_area}:{ip}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cloud area id, or `None` when the prefix is missing.
    pub fn cloud_area(&self) -> Option<i64> {
        let (cloud, _) = self.0.split_once(':')?;
        cloud.parse().ok()
    }

    pub fn ip(&self) -> &str {
        self.0.split_once(':').map(|(_, ip)| ip).unwrap_or(&self.0)
    }

    pub fn is_missing_cloud_area(&self) -> bool {
        self.0.starts_with(':')
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = ReconError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AgentId::parse(&value)
    }
}

impl From<AgentId> for String {
    fn from(value: AgentId) -> Self {
        value.0
    }
}

impl FromStr for AgentId {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentId::parse(s)
    }
}

/// Direction of a single file subtask. Serialized as the backend's numeric mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn mode(self) -> u8 {
        match self {
            Direction::Upload => 1,
            Direction::Download => 2,
        }
    }

    /// The role whose agent owns a subtask in this direction.
    pub fn owner_role(self) -> AgentRole {
        match self {
            Direction::Upload => AgentRole::Source,
            Direction::Download => AgentRole::Target,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Upload),
            2 => Ok(Direction::Download),
            other => Err(format!("invalid file transfer mode {other} (expected 1 or 2)")),
        }
    }
}

impl From<Direction> for u8 {
    fn from(value: Direction) -> Self {
        value.mode()
    }
}

/// Role of a host inside one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Downloads files or executes the script.
    Target,
    /// Uploads files.
    Source,
}

/// Status of one host's participation in a task instance.
///
/// Transitions only move forward: `NotStarted -> Running -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    NotStarted,
    Running,
    Success,
    Failed,
    Stopped,
}

impl AgentTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentTaskStatus::Success | AgentTaskStatus::Failed | AgentTaskStatus::Stopped
        )
    }

    fn rank(self) -> u8 {
        match self {
            AgentTaskStatus::NotStarted => 0,
            AgentTaskStatus::Running => 1,
            AgentTaskStatus::Success | AgentTaskStatus::Failed | AgentTaskStatus::Stopped => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_advance_to(self, next: AgentTaskStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// Classification of the backend's per-subtask error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicErrorCode {
    Finished,
    Running,
    Terminated,
    Failed(i32),
}

impl AtomicErrorCode {
    pub const FINISHED: i32 = 0;
    pub const RUNNING: i32 = 115;
    pub const TERMINATED: i32 = 116;

    pub fn classify(code: i32) -> Self {
        match code {
            Self::FINISHED => AtomicErrorCode::Finished,
            Self::RUNNING => AtomicErrorCode::Running,
            Self::TERMINATED => AtomicErrorCode::Terminated,
            other => AtomicErrorCode::Failed(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            AtomicErrorCode::Finished => Self::FINISHED,
            AtomicErrorCode::Running => Self::RUNNING,
            AtomicErrorCode::Terminated => Self::TERMINATED,
            AtomicErrorCode::Failed(code) => code,
        }
    }
}

/// Per-file status shown in execution logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileDistStatus {
    Waiting,
    Uploading,
    Downloading,
    Finished,
    Failed,
}

impl FileDistStatus {
    pub fn code(self) -> u8 {
        match self {
            FileDistStatus::Waiting => 1,
            FileDistStatus::Uploading => 2,
            FileDistStatus::Downloading => 3,
            FileDistStatus::Finished => 4,
            FileDistStatus::Failed => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileDistStatus::Waiting => "Waiting",
            FileDistStatus::Uploading => "Uploading",
            FileDistStatus::Downloading => "Downloading",
            FileDistStatus::Finished => "Finished",
            FileDistStatus::Failed => "Failed",
        }
    }

    /// In-flight status for the given direction.
    pub fn in_flight(direction: Direction) -> Self {
        match direction {
            Direction::Upload => FileDistStatus::Uploading,
            Direction::Download => FileDistStatus::Downloading,
        }
    }
}

/// Task-instance level outcome. Always derived, never stored as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVerdict {
    Running,
    Success,
    Failed,
    Stopped,
}

impl TaskVerdict {
    pub fn is_finished(self) -> bool {
        self != TaskVerdict::Running
    }
}

impl fmt::Display for TaskVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskVerdict::Running => "RUNNING",
            TaskVerdict::Success => "SUCCESS",
            TaskVerdict::Failed => "FAILED",
            TaskVerdict::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Kind of dispatched task; selects analyzer and schedule strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    File,
    Script,
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// src/model/log_entry.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Direction, FileDistStatus};

/// Key grouping log lines per host. Prefers the numeric host id and falls
/// back to the ip while host resolution is still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HostKey {
    HostId(i64),
    Ip(String),
}

impl HostKey {
    pub fn new(host_id: Option<i64>, ip: &str) -> Self {
        match host_id {
            Some(id) => HostKey::HostId(id),
            None => HostKey::Ip(ip.to_string()),
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKey::HostId(id) => write!(f, "HOST_ID_{id}"),
            HostKey::Ip(ip) => write!(f, "HOST_IP_{ip}"),
        }
    }
}

/// One per-file log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogLine {
    pub mode: Direction,
    pub dest_host_id: Option<i64>,
    pub dest_ip: Option<String>,
    pub dest_path: Option<String>,
    pub src_host_id: Option<i64>,
    pub src_ip: Option<String>,
    pub src_display_ip: Option<String>,
    pub src_path: Option<String>,
    /// Path shown to users; aliased for locally staged uploads.
    pub display_src_path: Option<String>,
    /// Human-readable size, `None` when unknown.
    pub size: Option<String>,
    pub status: u8,
    pub status_name: String,
    pub speed: Option<String>,
    pub progress: Option<String>,
    pub content: Option<String>,
}

impl FileLogLine {
    pub fn with_status(mut self, status: FileDistStatus) -> Self {
        self.status = status.code();
        self.status_name = status.name().to_string();
        self
    }
}

/// Durable per-host execution log record, written in batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLogEntry {
    pub task_instance_id: i64,
    pub batch: u32,
    pub execute_count: u32,
    pub host_id: Option<i64>,
    pub ip: String,
    #[serde(default)]
    pub file_logs: Vec<FileLogLine>,
    #[serde(default)]
    pub script_output: String,
}

impl HostLogEntry {
    pub fn key(&self) -> HostKey {
        HostKey::new(self.host_id, &self.ip)
    }
}

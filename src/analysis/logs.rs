// src/analysis/logs.rs

//! Buffers execution-log lines for one cycle, grouped by host.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::model::{FileLogLine, HostKey, HostLogEntry, SubtaskKey};
use crate::types::{AgentId, AtomicErrorCode};

/// Identifies which execution of which task the log lines belong to.
#[derive(Debug, Clone, Copy)]
pub struct LogContext {
    pub task_instance_id: i64,
    pub batch: u32,
    pub execute_count: u32,
}

/// Collects per-host log entries during a cycle; the loop drains and flushes
/// them to the log store after analysis.
///
/// Dedup state (last progress per subtask, consumed script output per agent)
/// survives `drain` so redelivered fragments stay suppressed across cycles.
#[derive(Debug)]
pub struct ExecutionLogAssembler {
    context: LogContext,
    entries: BTreeMap<HostKey, HostLogEntry>,
    last_progress: HashMap<SubtaskKey, Option<u8>>,
    script_offsets: HashMap<AgentId, u64>,
}

impl ExecutionLogAssembler {
    pub fn new(context: LogContext) -> Self {
        Self {
            context,
            entries: BTreeMap::new(),
            last_progress: HashMap::new(),
            script_offsets: HashMap::new(),
        }
    }

    /// Decide whether a fragment deserves a progress line.
    ///
    /// A RUNNING fragment repeating the last seen progress of its subtask is
    /// suppressed; anything else is logged and becomes the new last value.
    pub fn should_log_progress(
        &mut self,
        key: &SubtaskKey,
        code: AtomicErrorCode,
        progress: Option<u8>,
    ) -> bool {
        if code == AtomicErrorCode::Running
            && self.last_progress.get(key).is_some_and(|last| *last == progress)
        {
            trace!(subtask = %key, ?progress, "suppressing duplicate progress line");
            return false;
        }
        self.last_progress.insert(key.clone(), progress);
        true
    }

    fn entry_for(&mut self, host_id: Option<i64>, ip: &str) -> &mut HostLogEntry {
        let context = self.context;
        self.entries
            .entry(HostKey::new(host_id, ip))
            .or_insert_with(|| HostLogEntry {
                task_instance_id: context.task_instance_id,
                batch: context.batch,
                execute_count: context.execute_count,
                host_id,
                ip: ip.to_string(),
                file_logs: Vec::new(),
                script_output: String::new(),
            })
    }

    /// Append a file log line to the host owning it (destination host for
    /// downloads, source host for uploads).
    pub fn add_file_log(&mut self, host_id: Option<i64>, ip: &str, line: FileLogLine) {
        self.entry_for(host_id, ip).file_logs.push(line);
    }

    /// Append a script output chunk, skipping bytes already consumed.
    ///
    /// Returns whether anything new was appended.
    pub fn add_script_output(
        &mut self,
        agent: &AgentId,
        host_id: Option<i64>,
        ip: &str,
        offset: Option<u64>,
        content: &str,
    ) -> bool {
        if content.is_empty() {
            return false;
        }
        let consumed = self.script_offsets.get(agent).copied().unwrap_or(0);
        let offset = offset.unwrap_or(consumed);
        let end = offset.saturating_add(content.len() as u64);
        if end <= consumed {
            return false;
        }

        let fresh = if offset >= consumed {
            content
        } else {
            match content.get((consumed - offset) as usize..) {
                Some(rest) => rest,
                None => return false,
            }
        };

        self.entry_for(host_id, ip).script_output.push_str(fresh);
        self.script_offsets.insert(agent.clone(), end.max(consumed));
        true
    }

    /// Append a free-form line to a host's script output (e.g. an error
    /// message from the backend).
    pub fn add_script_note(&mut self, host_id: Option<i64>, ip: &str, note: &str) {
        let entry = self.entry_for(host_id, ip);
        if !entry.script_output.is_empty() && !entry.script_output.ends_with('\n') {
            entry.script_output.push('\n');
        }
        entry.script_output.push_str(note);
        entry.script_output.push('\n');
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every buffered entry, leaving dedup state intact.
    pub fn drain(&mut self) -> Vec<HostLogEntry> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

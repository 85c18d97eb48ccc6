#![allow(dead_code, unused_imports)]

pub use jobrecon_test_utils::{builders, fakes, init_tracing, with_timeout};

use jobrecon::analysis::{ExecutionLogAssembler, LogContext};
use jobrecon::model::{FileLogLine, HostLogEntry};

/// Log buffer for driving an analyzer by hand.
pub fn log_buffer(task_instance_id: i64) -> ExecutionLogAssembler {
    ExecutionLogAssembler::new(LogContext {
        task_instance_id,
        batch: 0,
        execute_count: 1,
    })
}

/// Every file log line across the given host entries.
pub fn file_lines(entries: &[HostLogEntry]) -> Vec<&FileLogLine> {
    entries.iter().flat_map(|e| e.file_logs.iter()).collect()
}

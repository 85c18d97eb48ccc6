// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Configuration exactly as read from TOML.
///
/// ```toml
/// [engine]
/// upload_grace_period = "15s"
/// finished_below_full_progress_is_running = true
///
/// [schedule.file]
/// initial_interval = "1s"
/// backoff_after_polls = 10
/// max_interval = "2s"
///
/// [pool]
/// workers = 8
/// ```
///
/// Every section and key is optional. Durations stay strings here and are
/// parsed when converting into [`ConfigFile`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: RawEngineSection,
    #[serde(default)]
    pub schedule: RawScheduleSection,
    #[serde(default)]
    pub pool: RawPoolSection,
    #[serde(default)]
    pub storage: RawStorageSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineSection {
    pub upload_grace_period: Option<String>,
    pub finished_below_full_progress_is_running: Option<bool>,
    pub max_consecutive_poll_failures: Option<u32>,
    pub slow_analysis_threshold: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScheduleSection {
    #[serde(default)]
    pub file: RawScheduleTable,
    #[serde(default)]
    pub script: RawScheduleTable,
}

/// `[schedule.file]` / `[schedule.script]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScheduleTable {
    pub initial_interval: Option<String>,
    pub backoff_after_polls: Option<u32>,
    pub max_interval: Option<String>,
    pub failure_backoff_max: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPoolSection {
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStorageSection {
    pub local_upload_dir: Option<String>,
}

/// Validated configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    pub pool: PoolConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long to wait for sources once every target is terminal.
    pub upload_grace_period: Duration,
    pub finished_below_full_progress_is_running: bool,
    /// Poll failures in a row before the loop gives up.
    pub max_consecutive_poll_failures: u32,
    /// Analysis slower than this is logged at info.
    pub slow_analysis_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_grace_period: Duration::from_secs(15),
            finished_below_full_progress_is_running: true,
            max_consecutive_poll_failures: 5,
            slow_analysis_threshold: Duration::from_secs(1),
        }
    }
}

/// Polling cadence of one task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTable {
    pub initial_interval: Duration,
    /// Polls at `initial_interval` before switching to `max_interval`.
    pub backoff_after_polls: u32,
    pub max_interval: Duration,
    /// Upper bound of the exponential backoff applied after poll failures.
    pub failure_backoff_max: Duration,
}

impl ScheduleTable {
    pub fn file_defaults() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_after_polls: 10,
            max_interval: Duration::from_secs(2),
            failure_backoff_max: Duration::from_secs(30),
        }
    }

    pub fn script_defaults() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            backoff_after_polls: 20,
            max_interval: Duration::from_secs(1),
            failure_backoff_max: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub file: ScheduleTable,
    pub script: ScheduleTable,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            file: ScheduleTable::file_defaults(),
            script: ScheduleTable::script_defaults(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// Staging directory for files uploaded from the operator's machine.
    pub local_upload_dir: Option<String>,
}

// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    ConfigFile, EngineConfig, PoolConfig, RawConfigFile, RawEngineSection, RawScheduleTable,
    ScheduleConfig, ScheduleTable, StorageConfig,
};
use crate::errors::{ReconError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ReconError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let engine = validate_engine(&raw.engine)?;
        let schedule = ScheduleConfig {
            file: validate_schedule("file", &raw.schedule.file, ScheduleTable::file_defaults())?,
            script: validate_schedule(
                "script",
                &raw.schedule.script,
                ScheduleTable::script_defaults(),
            )?,
        };

        let workers = raw.pool.workers.unwrap_or(PoolConfig::default().workers);
        if workers == 0 {
            return Err(ReconError::ConfigError(
                "[pool].workers must be >= 1 (got 0)".to_string(),
            ));
        }

        let local_upload_dir = raw
            .storage
            .local_upload_dir
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty());

        Ok(ConfigFile {
            engine,
            schedule,
            pool: PoolConfig { workers },
            storage: StorageConfig { local_upload_dir },
        })
    }
}

fn validate_engine(raw: &RawEngineSection) -> Result<EngineConfig> {
    let defaults = EngineConfig::default();

    let upload_grace_period = optional_duration(
        "[engine].upload_grace_period",
        raw.upload_grace_period.as_deref(),
        defaults.upload_grace_period,
    )?;
    let slow_analysis_threshold = optional_duration(
        "[engine].slow_analysis_threshold",
        raw.slow_analysis_threshold.as_deref(),
        defaults.slow_analysis_threshold,
    )?;

    let max_consecutive_poll_failures = raw
        .max_consecutive_poll_failures
        .unwrap_or(defaults.max_consecutive_poll_failures);
    if max_consecutive_poll_failures == 0 {
        return Err(ReconError::ConfigError(
            "[engine].max_consecutive_poll_failures must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(EngineConfig {
        upload_grace_period,
        finished_below_full_progress_is_running: raw
            .finished_below_full_progress_is_running
            .unwrap_or(defaults.finished_below_full_progress_is_running),
        max_consecutive_poll_failures,
        slow_analysis_threshold,
    })
}

fn validate_schedule(
    name: &str,
    raw: &RawScheduleTable,
    defaults: ScheduleTable,
) -> Result<ScheduleTable> {
    let initial_interval = optional_duration(
        &format!("[schedule.{name}].initial_interval"),
        raw.initial_interval.as_deref(),
        defaults.initial_interval,
    )?;
    let max_interval = optional_duration(
        &format!("[schedule.{name}].max_interval"),
        raw.max_interval.as_deref(),
        defaults.max_interval,
    )?;
    let failure_backoff_max = optional_duration(
        &format!("[schedule.{name}].failure_backoff_max"),
        raw.failure_backoff_max.as_deref(),
        defaults.failure_backoff_max,
    )?;

    if initial_interval.is_zero() {
        return Err(ReconError::ConfigError(format!(
            "[schedule.{name}].initial_interval must be greater than zero"
        )));
    }
    if max_interval < initial_interval {
        return Err(ReconError::ConfigError(format!(
            "[schedule.{name}].max_interval ({max_interval:?}) must be >= initial_interval ({initial_interval:?})"
        )));
    }
    if failure_backoff_max < initial_interval {
        return Err(ReconError::ConfigError(format!(
            "[schedule.{name}].failure_backoff_max ({failure_backoff_max:?}) must be >= initial_interval ({initial_interval:?})"
        )));
    }

    Ok(ScheduleTable {
        initial_interval,
        backoff_after_polls: raw.backoff_after_polls.unwrap_or(defaults.backoff_after_polls),
        max_interval,
        failure_backoff_max,
    })
}

fn optional_duration(key: &str, value: Option<&str>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(s) => parse_duration(s)
            .map_err(|e| ReconError::ConfigError(format!("{key}: {e}"))),
    }
}

/// Parse a simple duration string like `"15s"`, `"500ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;
    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

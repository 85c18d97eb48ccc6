// tests/config_loading.rs

mod common;
use crate::common::builders::ConfigBuilder;

use std::error::Error;
use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use jobrecon::config::{load_and_validate, load_from_path, parse_duration, ConfigFile};
use jobrecon::errors::ReconError;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> Result<NamedTempFile, Box<dyn Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn config_error(contents: &str) -> Result<String, Box<dyn Error>> {
    let file = write_config(contents)?;
    match load_and_validate(file.path()) {
        Err(ReconError::ConfigError(msg)) => Ok(msg),
        Err(other) => Err(format!("expected a config error, got {other}").into()),
        Ok(config) => Err(format!("expected a config error, got {config:?}").into()),
    }
}

#[test]
fn full_config_is_loaded() -> TestResult {
    let file = write_config(
        r#"
[engine]
upload_grace_period = "30s"
finished_below_full_progress_is_running = false
max_consecutive_poll_failures = 3
slow_analysis_threshold = "250ms"

[schedule.file]
initial_interval = "2s"
backoff_after_polls = 4
max_interval = "10s"
failure_backoff_max = "1m"

[schedule.script]
initial_interval = "100ms"

[pool]
workers = 2

[storage]
local_upload_dir = " /data/local/upload "
"#,
    )?;

    let config = load_and_validate(file.path())?;
    assert_eq!(config.engine.upload_grace_period, Duration::from_secs(30));
    assert!(!config.engine.finished_below_full_progress_is_running);
    assert_eq!(config.engine.max_consecutive_poll_failures, 3);
    assert_eq!(config.engine.slow_analysis_threshold, Duration::from_millis(250));
    assert_eq!(config.schedule.file.initial_interval, Duration::from_secs(2));
    assert_eq!(config.schedule.file.backoff_after_polls, 4);
    assert_eq!(config.schedule.file.max_interval, Duration::from_secs(10));
    assert_eq!(config.schedule.file.failure_backoff_max, Duration::from_secs(60));
    assert_eq!(config.schedule.script.initial_interval, Duration::from_millis(100));
    assert_eq!(config.schedule.script.max_interval, Duration::from_secs(1));
    assert_eq!(config.pool.workers, 2);
    assert_eq!(
        config.storage.local_upload_dir.as_deref(),
        Some("/data/local/upload")
    );
    Ok(())
}

#[test]
fn empty_config_uses_defaults() -> TestResult {
    let file = write_config("")?;
    let config = load_and_validate(file.path())?;
    assert_eq!(config, ConfigFile::default());
    assert_eq!(config.engine.upload_grace_period, Duration::from_secs(15));
    assert!(config.engine.finished_below_full_progress_is_running);
    assert_eq!(config.pool.workers, 8);
    assert_eq!(config.storage.local_upload_dir, None);
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() -> TestResult {
    let file = write_config("[engine]\ngrace = \"5s\"\n")?;
    let err = load_from_path(file.path()).err().ok_or("expected an error")?;
    assert!(matches!(err, ReconError::TomlError(_)), "got {err}");
    Ok(())
}

#[test]
fn missing_explicit_file_is_an_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let err = load_and_validate(dir.path().join("nope.toml"))
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, ReconError::IoError(_)), "got {err}");
    Ok(())
}

#[test]
fn zero_workers_is_rejected() -> TestResult {
    let msg = config_error("[pool]\nworkers = 0\n")?;
    assert!(msg.contains("[pool].workers"), "{msg}");
    Ok(())
}

#[test]
fn zero_poll_failures_is_rejected() -> TestResult {
    let msg = config_error("[engine]\nmax_consecutive_poll_failures = 0\n")?;
    assert!(msg.contains("max_consecutive_poll_failures"), "{msg}");
    Ok(())
}

#[test]
fn bad_duration_names_the_key() -> TestResult {
    let msg = config_error("[engine]\nupload_grace_period = \"15\"\n")?;
    assert!(msg.starts_with("[engine].upload_grace_period"), "{msg}");
    assert!(msg.contains("missing a unit suffix"), "{msg}");
    Ok(())
}

#[test]
fn inverted_intervals_are_rejected() -> TestResult {
    let msg = config_error("[schedule.file]\ninitial_interval = \"5s\"\nmax_interval = \"1s\"\n")?;
    assert!(msg.contains("[schedule.file].max_interval"), "{msg}");

    let msg = config_error("[schedule.script]\ninitial_interval = \"0ms\"\n")?;
    assert!(msg.contains("greater than zero"), "{msg}");

    let msg = config_error(
        "[schedule.script]\ninitial_interval = \"1s\"\nfailure_backoff_max = \"500ms\"\n",
    )?;
    assert!(msg.contains("failure_backoff_max"), "{msg}");
    Ok(())
}

#[test]
fn durations_parse_with_units() -> TestResult {
    assert_eq!(parse_duration("500ms")?, Duration::from_millis(500));
    assert_eq!(parse_duration("15s")?, Duration::from_secs(15));
    assert_eq!(parse_duration(" 2m ")?, Duration::from_secs(120));
    assert_eq!(parse_duration("1h")?, Duration::from_secs(3600));
    assert_eq!(parse_duration("10S")?, Duration::from_secs(10));

    assert!(parse_duration("").is_err());
    assert!(parse_duration("15").is_err());
    assert!(parse_duration("s").is_err());
    assert!(parse_duration("3d").is_err());
    Ok(())
}

#[test]
fn builder_goes_through_validation() -> TestResult {
    let config = ConfigBuilder::new()
        .grace_period("1s")
        .workers(3)
        .file_schedule("100ms", 2, "400ms")
        .local_upload_dir("/srv/upload")
        .build();
    assert_eq!(config.engine.upload_grace_period, Duration::from_secs(1));
    assert_eq!(config.pool.workers, 3);
    assert_eq!(config.schedule.file.max_interval, Duration::from_millis(400));
    assert_eq!(config.storage.local_upload_dir.as_deref(), Some("/srv/upload"));
    Ok(())
}

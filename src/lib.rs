// src/lib.rs

pub mod analysis;
pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod model;
pub mod scenario;
pub mod state;
pub mod store;
pub mod transfer;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, ConfigFile};
use crate::engine::{StopHandle, WorkerPool};
use crate::model::AgentTask;
use crate::scenario::Scenario;
use crate::store::{MemoryLogStore, MemoryTaskStore};
use crate::types::TaskVerdict;

/// High-level entry point used by `main.rs`.
///
/// Loads config and scenario, runs one reconciliation loop per scenario
/// task on the worker pool, and prints a JSON report per task to stdout.
/// Ctrl-C stops every task that is still running.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;

    let scenario = match &args.scenario {
        Some(path) => Some(
            Scenario::load(path).with_context(|| format!("loading scenario from {path}"))?,
        ),
        None => None,
    };

    if args.dry_run {
        print_dry_run(&cfg, scenario.as_ref());
        return Ok(());
    }

    let Some(scenario) = scenario else {
        bail!("--scenario is required unless --dry-run is given");
    };

    let log_store = MemoryLogStore::new();
    let task_store = MemoryTaskStore::new();

    let mut jobs = Vec::new();
    let mut stops = Vec::new();
    for prepared in scenario.into_prepared() {
        task_store.seed(prepared.persisted)?;
        stops.push(ScheduledStop {
            after: prepared.stop_after,
            handle: prepared.stop,
        });
        jobs.push(prepared.job);
    }
    let task_ids: Vec<i64> = jobs.iter().map(|j| j.task_instance_id()).collect();

    let operator = tokio::spawn(operator_stops(stops));

    let pool = WorkerPool::new(
        Arc::new(cfg),
        Arc::new(log_store.clone()),
        Arc::new(task_store.clone()),
    );
    let results = pool.run_all(jobs).await;
    operator.abort();

    let mut failures = 0usize;
    for (task_instance_id, result) in results {
        let report = TaskReport {
            task_instance_id,
            verdict: result.as_ref().ok().copied(),
            error: result.as_ref().err().map(|e| e.to_string()),
            agent_tasks: task_store.agent_tasks(task_instance_id)?,
            log_entries: log_store.entries_for(task_instance_id)?.len(),
        };
        if report.error.is_some() {
            failures += 1;
        }
        println!("{}", serde_json::to_string(&report)?);
    }

    info!(tasks = task_ids.len(), failures, "reconciliation run complete");
    if failures > 0 {
        bail!("{failures} of {} task instances could not be reconciled", task_ids.len());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskReport {
    task_instance_id: i64,
    verdict: Option<TaskVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    agent_tasks: Vec<AgentTask>,
    log_entries: usize,
}

struct ScheduledStop {
    after: Option<Duration>,
    handle: StopHandle,
}

/// Deliver scheduled operator stops, and stop everything on Ctrl-C.
async fn operator_stops(mut stops: Vec<ScheduledStop>) {
    stops.sort_by_key(|s| s.after.unwrap_or(Duration::MAX));
    let started = tokio::time::Instant::now();
    let mut next = 0;

    loop {
        let deadline = stops.get(next).and_then(|s| s.after).map(|d| started + d);
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                info!("Ctrl+C received; stopping every task instance");
                for stop in &mut stops {
                    stop.handle.stop();
                }
                return;
            }
            _ = sleep_until(deadline) => {
                if let Some(stop) = stops.get_mut(next) {
                    info!(after = ?stop.after, "delivering scheduled operator stop");
                    stop.handle.stop();
                }
                next += 1;
            }
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn print_dry_run(cfg: &ConfigFile, scenario: Option<&Scenario>) {
    println!("jobrecon dry-run");
    println!("  engine.upload_grace_period = {:?}", cfg.engine.upload_grace_period);
    println!(
        "  engine.finished_below_full_progress_is_running = {}",
        cfg.engine.finished_below_full_progress_is_running
    );
    println!(
        "  engine.max_consecutive_poll_failures = {}",
        cfg.engine.max_consecutive_poll_failures
    );
    println!("  schedule.file = {:?}", cfg.schedule.file);
    println!("  schedule.script = {:?}", cfg.schedule.script);
    println!("  pool.workers = {}", cfg.pool.workers);
    if let Some(dir) = &cfg.storage.local_upload_dir {
        println!("  storage.local_upload_dir = {dir}");
    }

    let Some(scenario) = scenario else {
        return;
    };
    println!();
    println!("tasks ({}):", scenario.tasks.len());
    for task in &scenario.tasks {
        println!(
            "  - {} ({:?}): {} targets, {} recorded batches",
            task.task_instance_id(),
            task.kind(),
            task.target_count(),
            task.batch_count()
        );
    }
}

// tests/worker_pool.rs

mod common;
use crate::common::builders::{
    agent, host, ConfigBuilder, FileFragmentBuilder, FileTaskBuilder, ScriptFragmentBuilder,
    ScriptTaskBuilder,
};
use crate::common::fakes::ScriptedBackend;
use crate::common::init_tracing;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use jobrecon::engine::{stop_channel, ReconcileJob, WorkerPool};
use jobrecon::errors::ReconError;
use jobrecon::store::{MemoryLogStore, MemoryTaskStore};
use jobrecon::types::{TaskKind, TaskVerdict};

type TestResult = Result<(), Box<dyn Error>>;

fn script_job(task_instance_id: i64, exit_code: i32) -> ReconcileJob {
    let target = agent(0, "10.0.0.2");
    let spec = ScriptTaskBuilder::new(task_instance_id)
        .target(host(0, "10.0.0.2", 2))
        .build();
    let backend = ScriptedBackend::new(TaskKind::Script)
        .script_batch(vec![ScriptFragmentBuilder::new(&target).output(0, "working\n").build()])
        .script_batch(vec![ScriptFragmentBuilder::new(&target).finished(exit_code).build()]);
    ReconcileJob::script(spec, Box::new(backend))
}

fn file_job(task_instance_id: i64) -> ReconcileJob {
    let source = agent(0, "10.0.0.1");
    let target = agent(0, "10.0.0.2");
    let spec = FileTaskBuilder::new(task_instance_id)
        .source(host(0, "10.0.0.1", 1))
        .target(host(0, "10.0.0.2", 2))
        .file(&source, "/data/a.txt", "/tmp/a.txt")
        .build();
    let backend = ScriptedBackend::new(TaskKind::File).file_batch(vec![
        FileFragmentBuilder::upload(&source, "/data/a.txt")
            .finished()
            .build(),
        FileFragmentBuilder::download(&source, "/data/a.txt", &target, "/tmp/a.txt")
            .finished()
            .build(),
    ]);
    ReconcileJob::file(spec, Box::new(backend))
}

#[tokio::test(start_paused = true)]
async fn every_job_gets_a_verdict() -> TestResult {
    init_tracing();
    let config = Arc::new(ConfigBuilder::new().workers(2).max_poll_failures(2).build());
    let logs = MemoryLogStore::new();
    let tasks = MemoryTaskStore::new();
    let pool = WorkerPool::new(config, Arc::new(logs.clone()), Arc::new(tasks.clone()));

    let broken = ReconcileJob::file(
        FileTaskBuilder::new(4)
            .target(host(0, "10.0.0.2", 2))
            .build(),
        Box::new(
            ScriptedBackend::new(TaskKind::File)
                .poll_error("unreachable")
                .poll_error("unreachable"),
        ),
    );
    let jobs = vec![script_job(3, 1), file_job(1), broken, script_job(2, 0)];

    let results = pool.run_all(jobs).await;
    let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    assert_eq!(results[0].1.as_ref().ok(), Some(&TaskVerdict::Success));
    assert_eq!(results[1].1.as_ref().ok(), Some(&TaskVerdict::Success));
    assert_eq!(results[2].1.as_ref().ok(), Some(&TaskVerdict::Failed));
    assert!(matches!(
        results[3].1,
        Err(ReconError::PollRetriesExhausted { attempts: 2, .. })
    ));

    assert_eq!(tasks.verdict(1)?, Some(TaskVerdict::Success));
    assert_eq!(tasks.verdict(3)?, Some(TaskVerdict::Failed));
    assert_eq!(tasks.verdict(4)?, None);
    assert_eq!(logs.entries_for(2)?[0].script_output, "working\n");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn single_worker_runs_jobs_one_at_a_time() -> TestResult {
    let config = Arc::new(ConfigBuilder::new().workers(1).build());
    let pool = WorkerPool::new(
        config,
        Arc::new(MemoryLogStore::new()),
        Arc::new(MemoryTaskStore::new()),
    );

    let started = tokio::time::Instant::now();
    let results = pool
        .run_all(vec![script_job(10, 0), script_job(11, 0), script_job(12, 0)])
        .await;

    assert!(results.iter().all(|(_, r)| matches!(r, Ok(TaskVerdict::Success))));
    // Each script job sleeps one 500ms interval between its two polls.
    assert!(started.elapsed() >= Duration::from_millis(1_500));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_signal_reaches_the_worker() -> TestResult {
    let target = agent(0, "10.0.0.2");
    let spec = ScriptTaskBuilder::new(20)
        .target(host(0, "10.0.0.2", 2))
        .build();
    let backend = ScriptedBackend::new(TaskKind::Script)
        .script_batch(vec![ScriptFragmentBuilder::new(&target).output(0, "sleep 600\n").build()])
        .empty_batches(3)
        .script_batch(vec![ScriptFragmentBuilder::new(&target).terminated().build()]);
    let calls = backend.calls();

    let (mut handle, signal) = stop_channel();
    let job = ReconcileJob::script(spec, Box::new(backend)).with_stop_signal(signal);
    let pool = WorkerPool::new(
        Arc::new(ConfigBuilder::new().build()),
        Arc::new(MemoryLogStore::new()),
        Arc::new(MemoryTaskStore::new()),
    );

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        handle.stop()
    });
    let results = pool.run_all(vec![job]).await;

    assert!(stopper.await?);
    assert!(matches!(results[0].1, Ok(TaskVerdict::Stopped)));
    assert_eq!(calls.lock().map_err(|_| "poisoned")?.stops.len(), 1);
    Ok(())
}

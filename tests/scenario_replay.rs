// tests/scenario_replay.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use jobrecon::config::ConfigFile;
use jobrecon::engine::WorkerPool;
use jobrecon::scenario::{Scenario, ScenarioTask};
use jobrecon::store::{MemoryLogStore, MemoryTaskStore};
use jobrecon::types::{AgentRole, AgentTaskStatus, TaskKind, TaskVerdict};

type TestResult = Result<(), Box<dyn Error>>;

const SCENARIO: &str = r#"
{
  "tasks": [
    {
      "kind": "file",
      "spec": {
        "task_instance_id": 1,
        "gse_task_id": "GSE_1",
        "targets": [{ "agent_id": "0:10.0.0.2", "host_id": 2, "ip": "0:10.0.0.2" }],
        "sources": [{ "agent_id": "0:10.0.0.1", "host_id": 1, "ip": "0:10.0.0.1" }],
        "files": [{ "source_agent_id": "0:10.0.0.1", "path": "/data/a.txt" }],
        "dest_paths": { "0:10.0.0.1:/data/a.txt": "/tmp/a.txt" }
      },
      "batches": [
        [
          { "mode": 1, "sourceAgentId": "0:10.0.0.1", "sourceFilePath": "/data/a.txt",
            "progress": 100, "errorCode": 0 },
          { "mode": 2, "sourceAgentId": ":10.0.0.1", "sourceFilePath": "/data/a.txt",
            "destAgentId": "0:10.0.0.2", "destFilePath": "/tmp/a.txt", "progress": 60,
            "size": 1048576, "speed": 2048, "errorCode": 115 }
        ],
        [
          { "mode": 2, "sourceAgentId": "0:10.0.0.1", "sourceFilePath": "/data/a.txt",
            "destAgentId": "0:10.0.0.2", "destFilePath": "/tmp/a.txt", "progress": 100,
            "errorCode": 0 }
        ]
      ]
    },
    {
      "kind": "script",
      "spec": {
        "task_instance_id": 2,
        "gse_task_id": "GSE_2",
        "targets": [{ "agent_id": "0:10.0.0.3", "host_id": 3, "ip": "0:10.0.0.3" }]
      },
      "batches": [
        [{ "agentId": "0:10.0.0.3", "errorCode": 115, "content": "tick\n", "offset": 0 }],
        [{ "agentId": "0:10.0.0.3", "errorCode": 115, "content": "tick\ntick\n", "offset": 0 }]
      ],
      "honorsStop": true,
      "stopAfterMs": 1200,
      "idlePolls": 5
    },
    {
      "kind": "script",
      "spec": {
        "task_instance_id": 3,
        "gse_task_id": "GSE_3",
        "targets": [
          { "agent_id": "0:10.0.0.4", "host_id": 4, "ip": "0:10.0.0.4" },
          { "agent_id": "0:10.0.0.5", "host_id": 5, "ip": "0:10.0.0.5" }
        ]
      },
      "batches": [
        [{ "agentId": "0:10.0.0.5", "errorCode": 0, "exitCode": 0 }]
      ],
      "persisted": [
        { "task_instance_id": 3, "agent_id": "0:10.0.0.4", "host_id": 4,
          "role": "target", "status": "success", "exit_code": 0 }
      ]
    }
  ]
}
"#;

#[test]
fn scenario_file_is_parsed() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(SCENARIO.as_bytes())?;
    let scenario = Scenario::load(file.path())?;

    assert_eq!(scenario.tasks.len(), 3);
    let kinds: Vec<TaskKind> = scenario.tasks.iter().map(ScenarioTask::kind).collect();
    assert_eq!(kinds, vec![TaskKind::File, TaskKind::Script, TaskKind::Script]);
    assert_eq!(scenario.tasks[0].batch_count(), 2);
    assert_eq!(scenario.tasks[2].target_count(), 2);

    match &scenario.tasks[1] {
        ScenarioTask::Script { replay, .. } => {
            assert!(replay.honors_stop);
            assert_eq!(replay.stop_after_ms, Some(1200));
            assert_eq!(replay.idle_polls, Some(5));
        }
        other => return Err(format!("unexpected task {other:?}").into()),
    }
    match &scenario.tasks[0] {
        ScenarioTask::File { spec, .. } => {
            assert_eq!(spec.execute_count, 1);
            let source = "0:10.0.0.1".parse()?;
            assert_eq!(spec.dest_path_for(&source, "/data//a.txt", false), Some("/tmp/a.txt"));
        }
        other => return Err(format!("unexpected task {other:?}").into()),
    }
    Ok(())
}

#[test]
fn malformed_scenario_is_rejected() -> TestResult {
    let err = Scenario::from_json(r#"{ "tasks": [{ "kind": "ftp", "spec": {} }] }"#)
        .err()
        .ok_or("expected an error")?;
    assert!(err.to_string().contains("JSON"), "{err}");

    let bad_agent = SCENARIO.replace("\"0:10.0.0.3\", \"host_id\"", "\"not-an-agent\", \"host_id\"");
    assert!(Scenario::from_json(&bad_agent).is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scenario_replays_to_verdicts() -> TestResult {
    init_tracing();
    let scenario = Scenario::from_json(SCENARIO)?;

    let logs = MemoryLogStore::new();
    let tasks = MemoryTaskStore::new();
    let mut jobs = Vec::new();
    let mut stoppers = Vec::new();
    for prepared in scenario.into_prepared() {
        tasks.seed(prepared.persisted)?;
        if let Some(after) = prepared.stop_after {
            let mut handle = prepared.stop;
            stoppers.push(tokio::spawn(async move {
                tokio::time::sleep(after).await;
                handle.stop()
            }));
        }
        jobs.push(prepared.job);
    }

    let pool = WorkerPool::new(
        Arc::new(ConfigFile::default()),
        Arc::new(logs.clone()),
        Arc::new(tasks.clone()),
    );
    let started = tokio::time::Instant::now();
    let results = pool.run_all(jobs).await;

    let verdicts: Vec<Option<TaskVerdict>> =
        results.iter().map(|(_, r)| r.as_ref().ok().copied()).collect();
    assert_eq!(
        verdicts,
        vec![
            Some(TaskVerdict::Success),
            Some(TaskVerdict::Stopped),
            Some(TaskVerdict::Success),
        ]
    );
    assert!(started.elapsed() >= Duration::from_millis(1200));
    for stopper in stoppers {
        assert!(stopper.await?);
    }

    let script_output: String = logs
        .entries_for(2)?
        .iter()
        .map(|e| e.script_output.as_str())
        .collect();
    assert_eq!(script_output, "tick\ntick\n");

    let stopped = tasks
        .agent_task(2, AgentRole::Target, &"0:10.0.0.3".parse()?)?
        .ok_or("agent task not persisted")?;
    assert_eq!(stopped.status, AgentTaskStatus::Stopped);

    // The repaired legacy source id fed the same subtask.
    let file_lines: usize = logs.entries_for(1)?.iter().map(|e| e.file_logs.len()).sum();
    assert!(file_lines >= 3, "{file_lines}");
    Ok(())
}

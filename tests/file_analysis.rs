// tests/file_analysis.rs

mod common;
use crate::common::builders::{agent, host, FileFragmentBuilder, FileTaskBuilder};
use crate::common::{file_lines, init_tracing, log_buffer};

use std::error::Error;

use jobrecon::analysis::{AnalyzerOptions, FileResultAnalyzer, ResultAnalyzer};
use jobrecon::backend::ResultBatch;
use jobrecon::errors::ReconError;
use jobrecon::types::{AgentId, AgentRole, AgentTaskStatus, Direction, FileDistStatus};

type TestResult = Result<(), Box<dyn Error>>;

fn source() -> AgentId {
    agent(0, "10.0.0.1")
}

fn target() -> AgentId {
    agent(0, "10.0.0.2")
}

/// One source, one target, one file.
fn single_file_analyzer(options: AnalyzerOptions) -> FileResultAnalyzer {
    let spec = FileTaskBuilder::new(100)
        .source(host(0, "10.0.0.1", 1))
        .target(host(0, "10.0.0.2", 2))
        .file(&source(), "/data/a.txt", "/tmp/a.txt")
        .build();
    FileResultAnalyzer::new(spec, options)
}

#[test]
fn completed_transfer_succeeds_with_progress_lines() -> TestResult {
    init_tracing();
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    let upload = FileFragmentBuilder::upload(&source(), "/data/a.txt").size(2048);
    let download =
        FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
            .size(2048)
            .speed(1234);

    analyzer.analyze(
        ResultBatch::File(vec![
            upload.clone().finished().build(),
            download.clone().running(50).build(),
        ]),
        &mut logs,
        1_000,
    )?;
    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Running)
    );
    assert_eq!(
        analyzer.state().status_of(AgentRole::Source, &source()),
        Some(AgentTaskStatus::Success)
    );

    // Same progress again: no new line.
    analyzer.analyze(
        ResultBatch::File(vec![download.clone().running(50).build()]),
        &mut logs,
        1_500,
    )?;
    analyzer.analyze(
        ResultBatch::File(vec![download.clone().finished().build()]),
        &mut logs,
        2_000,
    )?;

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Success)
    );

    let entries = logs.drain();
    let target_entry = entries
        .iter()
        .find(|e| e.host_id == Some(2))
        .ok_or("no log entry for target host")?;
    let statuses: Vec<&str> = target_entry
        .file_logs
        .iter()
        .map(|l| l.status_name.as_str())
        .collect();
    assert_eq!(statuses, vec!["Downloading", "Finished"]);

    let running = &target_entry.file_logs[0];
    assert_eq!(running.mode, Direction::Download);
    assert_eq!(running.size.as_deref(), Some("2.00 KB"));
    assert_eq!(running.speed.as_deref(), Some("1,234 KB/s"));
    assert_eq!(running.progress.as_deref(), Some("50%"));
    assert_eq!(running.src_host_id, Some(1));
    let content = running.content.as_deref().unwrap_or_default();
    assert!(content.starts_with("FileName: /tmp/a.txt"), "content: {content}");
    assert!(content.contains("Progress: 50%"), "content: {content}");

    let source_entry = entries
        .iter()
        .find(|e| e.host_id == Some(1))
        .ok_or("no log entry for source host")?;
    assert_eq!(source_entry.file_logs.len(), 1);
    assert_eq!(source_entry.file_logs[0].mode, Direction::Upload);
    Ok(())
}

#[test]
fn upload_failure_fails_every_target() -> TestResult {
    init_tracing();
    let spec = FileTaskBuilder::new(101)
        .source(host(0, "10.0.0.1", 1))
        .target(host(0, "10.0.0.2", 2))
        .target(host(0, "10.0.0.3", 3))
        .file(&source(), "/data/a.txt", "/tmp/a.txt")
        .build();
    let mut analyzer = FileResultAnalyzer::new(spec, AnalyzerOptions::default());
    let mut logs = log_buffer(101);

    let failed = FileFragmentBuilder::upload(&source(), "/data/a.txt")
        .failed(-2, "source file not found")
        .build();
    analyzer.analyze(ResultBatch::File(vec![failed.clone()]), &mut logs, 1_000)?;

    assert_eq!(
        analyzer.state().status_of(AgentRole::Source, &source()),
        Some(AgentTaskStatus::Failed)
    );
    for t in [agent(0, "10.0.0.2"), agent(0, "10.0.0.3")] {
        assert_eq!(
            analyzer.state().status_of(AgentRole::Target, &t),
            Some(AgentTaskStatus::Failed),
            "target {t}"
        );
        assert_eq!(analyzer.tracker().failed_count(AgentRole::Target, &t), 1);
    }

    let entries = logs.drain();
    let lines = file_lines(&entries);
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.status == FileDistStatus::Failed.code()));
    let downloads: Vec<_> = lines
        .iter()
        .filter(|l| l.mode == Direction::Download)
        .collect();
    assert_eq!(downloads.len(), 2);
    assert!(downloads.iter().all(|l| l.dest_path.as_deref() == Some("/tmp/a.txt")));
    assert!(downloads
        .iter()
        .all(|l| l.content.as_deref() == Some("source file not found")));

    // Redelivery of the failed upload adds nothing.
    analyzer.analyze(ResultBatch::File(vec![failed]), &mut logs, 2_000)?;
    assert!(logs.is_empty());
    Ok(())
}

#[test]
fn cascaded_failure_matches_later_download_fragment() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    analyzer.analyze(
        ResultBatch::File(vec![FileFragmentBuilder::upload(&source(), "/data/a.txt")
            .failed(-2, "boom")
            .build()]),
        &mut logs,
        1_000,
    )?;
    logs.drain();

    // The backend may still report the download with the task's dest path.
    analyzer.analyze(
        ResultBatch::File(vec![FileFragmentBuilder::download(
            &source(),
            "/data/a.txt",
            &target(),
            "/tmp/a.txt",
        )
        .failed(-2, "boom")
        .build()]),
        &mut logs,
        2_000,
    )?;
    assert!(logs.is_empty());
    assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 1);
    Ok(())
}

#[test]
fn legacy_source_id_is_repaired_from_source_hosts() -> TestResult {
    init_tracing();
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);
    let legacy_source = AgentId::parse(":10.0.0.1")?;
    assert!(legacy_source.is_missing_cloud_area());

    let running = FileFragmentBuilder::download(&legacy_source, "/data/a.txt", &target(), "/tmp/a.txt")
        .running(10)
        .build();
    let finished = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .finished()
        .build();
    analyzer.analyze(ResultBatch::File(vec![running]), &mut logs, 1_000)?;
    analyzer.analyze(ResultBatch::File(vec![finished]), &mut logs, 2_000)?;

    // Both fragments map onto one subtask, so the single file completes it.
    assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 1);
    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Success)
    );

    let entries = logs.drain();
    let lines = file_lines(&entries);
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.src_host_id == Some(1)));
    Ok(())
}

#[test]
fn local_upload_shows_display_path() -> TestResult {
    let staged = "/data/local/upload/1001/report.csv";
    let spec = FileTaskBuilder::new(102)
        .source(host(0, "127.0.0.1", 9))
        .target(host(0, "10.0.0.2", 2))
        .local_file(&agent(0, "127.0.0.1"), staged, "report.csv", "/opt/reports/report.csv")
        .build();
    let options = AnalyzerOptions {
        local_upload_dir: Some("/data/local/upload".to_string()),
        ..AnalyzerOptions::default()
    };
    let mut analyzer = FileResultAnalyzer::new(spec, options);
    let mut logs = log_buffer(102);

    analyzer.analyze(
        ResultBatch::File(vec![
            FileFragmentBuilder::upload(&agent(0, "127.0.0.1"), staged)
                .running(30)
                .build(),
        ]),
        &mut logs,
        1_000,
    )?;
    let entries = logs.drain();
    let lines = file_lines(&entries);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].display_src_path.as_deref(), Some("report.csv"));
    assert_eq!(lines[0].src_path.as_deref(), Some(staged));
    assert_eq!(lines[0].status_name, "Uploading");
    assert!(lines[0]
        .content
        .as_deref()
        .is_some_and(|c| c.starts_with("FileName: report.csv")));

    analyzer.analyze(
        ResultBatch::File(vec![FileFragmentBuilder::upload(&agent(0, "127.0.0.1"), staged)
            .failed(-5, "upload interrupted")
            .build()]),
        &mut logs,
        2_000,
    )?;
    let entries = logs.drain();
    let cascaded = file_lines(&entries)
        .into_iter()
        .find(|l| l.mode == Direction::Download)
        .ok_or("no cascaded download line")?
        .clone();
    assert_eq!(cascaded.dest_path.as_deref(), Some("/opt/reports/report.csv"));
    assert_eq!(cascaded.display_src_path.as_deref(), Some("report.csv"));
    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &agent(0, "10.0.0.2")),
        Some(AgentTaskStatus::Failed)
    );
    Ok(())
}

#[test]
fn finished_below_full_progress_keeps_running_by_default() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    let early = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .finished_at(80)
        .build();
    analyzer.analyze(ResultBatch::File(vec![early]), &mut logs, 1_000)?;

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Running)
    );
    assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 0);
    Ok(())
}

#[test]
fn finished_below_full_progress_can_count_as_finished() -> TestResult {
    let options = AnalyzerOptions {
        finished_below_full_progress_is_running: false,
        ..AnalyzerOptions::default()
    };
    let mut analyzer = single_file_analyzer(options);
    let mut logs = log_buffer(100);

    let early = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .finished_at(80)
        .build();
    analyzer.analyze(ResultBatch::File(vec![early]), &mut logs, 1_000)?;

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Success)
    );
    Ok(())
}

#[test]
fn finished_without_progress_completes_once() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    let mut finished = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .finished()
        .build();
    finished.progress = None;
    for now_ms in [1_000, 2_000, 3_000] {
        analyzer.analyze(ResultBatch::File(vec![finished.clone()]), &mut logs, now_ms)?;
    }

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Success)
    );
    assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 1);
    let entries = logs.drain();
    let statuses: Vec<&str> = file_lines(&entries)
        .iter()
        .map(|l| l.status_name.as_str())
        .collect();
    assert_eq!(statuses, vec!["Finished"]);
    Ok(())
}

#[test]
fn redelivered_early_finish_logs_progress_once() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    let early = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .finished_at(80)
        .build();
    for now_ms in [1_000, 2_000, 3_000, 4_000] {
        analyzer.analyze(ResultBatch::File(vec![early.clone()]), &mut logs, now_ms)?;
    }

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Running)
    );
    let entries = logs.drain();
    let statuses: Vec<&str> = file_lines(&entries)
        .iter()
        .map(|l| l.status_name.as_str())
        .collect();
    assert_eq!(statuses, vec!["Downloading"]);
    Ok(())
}

#[test]
fn directory_transfers_are_labelled() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    analyzer.analyze(
        ResultBatch::File(vec![FileFragmentBuilder::download(
            &source(),
            "/data/a.txt",
            &target(),
            "/tmp/dir/",
        )
        .running(5)
        .build()]),
        &mut logs,
        1_000,
    )?;
    let entries = logs.drain();
    let lines = file_lines(&entries);
    assert!(lines[0]
        .content
        .as_deref()
        .is_some_and(|c| c.starts_with("Directory: /tmp/dir/")));
    Ok(())
}

#[test]
fn terminated_download_stops_target() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    analyzer.analyze(
        ResultBatch::File(vec![FileFragmentBuilder::download(
            &source(),
            "/data/a.txt",
            &target(),
            "/tmp/a.txt",
        )
        .terminated()
        .build()]),
        &mut logs,
        1_000,
    )?;

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Stopped)
    );
    assert!(analyzer.verdict_inputs().stop_observed);
    Ok(())
}

#[test]
fn failure_outranks_stop_in_either_order() -> TestResult {
    init_tracing();
    let upload_failed = FileFragmentBuilder::upload(&source(), "/data/a.txt")
        .failed(-2, "source file not found")
        .build();
    let terminated = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .terminated()
        .build();

    for upload_first in [true, false] {
        let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
        let mut logs = log_buffer(100);
        let order = if upload_first {
            [upload_failed.clone(), terminated.clone()]
        } else {
            [terminated.clone(), upload_failed.clone()]
        };
        for (i, fragment) in order.into_iter().enumerate() {
            analyzer.analyze(ResultBatch::File(vec![fragment]), &mut logs, 1_000 * (i as i64 + 1))?;
        }

        assert_eq!(
            analyzer.state().status_of(AgentRole::Target, &target()),
            Some(AgentTaskStatus::Failed),
            "upload_first={upload_first}"
        );
        assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 1);
        assert_eq!(analyzer.tracker().failed_count(AgentRole::Target, &target()), 1);
        assert_eq!(analyzer.tracker().stopped_count(AgentRole::Target, &target()), 0);
        assert!(analyzer.verdict_inputs().stop_observed, "upload_first={upload_first}");
    }
    Ok(())
}

#[test]
fn download_failure_after_stop_fails_target() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);
    let download = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt");

    analyzer.analyze(ResultBatch::File(vec![download.clone().terminated().build()]), &mut logs, 1_000)?;
    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Stopped)
    );

    let failed = download.failed(-3, "disk full").build();
    analyzer.analyze(ResultBatch::File(vec![failed.clone()]), &mut logs, 2_000)?;
    analyzer.analyze(ResultBatch::File(vec![failed]), &mut logs, 3_000)?;

    assert_eq!(
        analyzer.state().status_of(AgentRole::Target, &target()),
        Some(AgentTaskStatus::Failed)
    );
    let entries = logs.drain();
    let failures = file_lines(&entries)
        .iter()
        .filter(|l| l.status == FileDistStatus::Failed.code() && l.content.as_deref() == Some("disk full"))
        .count();
    assert_eq!(failures, 1);
    Ok(())
}

#[test]
fn cascade_and_download_failure_share_one_subtask_in_either_order() -> TestResult {
    let b_finished = FileFragmentBuilder::download(&source(), "/data/b.txt", &target(), "/tmp/b.txt")
        .finished()
        .build();
    let upload_failed = FileFragmentBuilder::upload(&source(), "/data/a.txt")
        .failed(-2, "boom")
        .build();
    let download_failed = FileFragmentBuilder::download(&source(), "/data/a.txt", &target(), "/tmp/a.txt")
        .failed(-2, "boom")
        .build();

    for upload_first in [true, false] {
        let spec = FileTaskBuilder::new(104)
            .source(host(0, "10.0.0.1", 1))
            .target(host(0, "10.0.0.2", 2))
            .file(&source(), "/data/a.txt", "/tmp/a.txt")
            .file(&source(), "/data/b.txt", "/tmp/b.txt")
            .build();
        let mut analyzer = FileResultAnalyzer::new(spec, AnalyzerOptions::default());
        let mut logs = log_buffer(104);
        let order = if upload_first {
            [upload_failed.clone(), download_failed.clone()]
        } else {
            [download_failed.clone(), upload_failed.clone()]
        };
        for (i, fragment) in order.into_iter().enumerate() {
            analyzer.analyze(ResultBatch::File(vec![fragment]), &mut logs, 1_000 * (i as i64 + 1))?;
        }

        // b.txt is still outstanding, so the target keeps running.
        assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 1);
        assert_eq!(
            analyzer.state().status_of(AgentRole::Target, &target()),
            Some(AgentTaskStatus::Running),
            "upload_first={upload_first}"
        );

        analyzer.analyze(ResultBatch::File(vec![b_finished.clone()]), &mut logs, 5_000)?;
        assert_eq!(analyzer.tracker().finished_count(AgentRole::Target, &target()), 2);
        assert_eq!(
            analyzer.state().status_of(AgentRole::Target, &target()),
            Some(AgentTaskStatus::Failed),
            "upload_first={upload_first}"
        );
    }
    Ok(())
}

#[test]
fn fragments_for_unknown_agents_are_ignored() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    analyzer.analyze(
        ResultBatch::File(vec![FileFragmentBuilder::download(
            &source(),
            "/data/a.txt",
            &agent(0, "10.9.9.9"),
            "/tmp/a.txt",
        )
        .finished()
        .build()]),
        &mut logs,
        1_000,
    )?;

    assert!(logs.is_empty());
    assert!(!analyzer.state().has_observed_fragments());
    Ok(())
}

#[test]
fn script_batch_is_rejected() -> TestResult {
    let mut analyzer = single_file_analyzer(AnalyzerOptions::default());
    let mut logs = log_buffer(100);

    let err = analyzer
        .analyze(ResultBatch::Script(Vec::new()), &mut logs, 1_000)
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, ReconError::UnexpectedBatch { .. }));
    Ok(())
}

#[test]
fn sources_without_files_are_vacuously_done() -> TestResult {
    let spec = FileTaskBuilder::new(103)
        .source(host(0, "10.0.0.1", 1))
        .source(host(0, "10.0.0.5", 5))
        .target(host(0, "10.0.0.2", 2))
        .file(&source(), "/data/a.txt", "/tmp/a.txt")
        .build();
    let analyzer = FileResultAnalyzer::new(spec, AnalyzerOptions::default());

    assert_eq!(
        analyzer.state().status_of(AgentRole::Source, &agent(0, "10.0.0.5")),
        Some(AgentTaskStatus::Success)
    );
    assert_eq!(analyzer.state().total_subtasks(AgentRole::Source, &source()), 1);
    assert_eq!(analyzer.state().total_subtasks(AgentRole::Target, &target()), 1);
    Ok(())
}

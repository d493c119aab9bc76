use chrono::Utc;
use harness_core::config::{MonitorConfig, PassCriteria};
use harness_core::fault::entity::{FaultKind, SimulatedException};
use harness_core::replay::entity::{PushState, PushStats};
use harness_core::report::entity::{ReportData, SimulationMetrics, StopReason};
use harness_core::strategy::entity::{WorkerStats, WorkerStatus};
use harness_monitor::report::{evaluate, render_markdown};
use harness_monitor::{Monitor, ReportGenerator, RunTotals};
use serde_json::json;

fn push_stats(total: usize, pushed: u64) -> PushStats {
    PushStats {
        state: PushState::Completed,
        total,
        pushed,
        cursor: total,
        progress_percent: 100.0,
        corrupted: 1,
        delayed: 0,
        consumer_errors: 0,
        avg_latency_ms: 0.4,
        push_rate: 50.0,
        speed: 100.0,
        started_at: Some(Utc::now()),
        stopped_at: Some(Utc::now()),
    }
}

fn metrics(total: usize, pushed: u64, workers: WorkerStats) -> SimulationMetrics {
    Monitor::new(MonitorConfig::default()).finalize(RunTotals {
        started_at: Utc::now(),
        ended_at: Utc::now(),
        push: Some(push_stats(total, pushed)),
        workers,
        faults: None,
    })
}

fn report_data(metrics: SimulationMetrics, stop_reason: StopReason, error: Option<&str>) -> ReportData {
    let verdict = evaluate(&metrics, &PassCriteria::default(), stop_reason, error);
    let mut exception = SimulatedException::new(FaultKind::Disconnect, "link | down", 250);
    exception.mark_recovered();
    ReportData {
        run_id: "run-42".to_string(),
        name: "smoke".to_string(),
        generated_at: Utc::now(),
        mode: "standalone".to_string(),
        stop_reason,
        terminal_error: error.map(str::to_string),
        config: json!({"replay": {"speed": 100.0}}),
        metrics,
        workers: vec![WorkerStatus::new("w1", "builtin.noop.Idle")],
        positions: Vec::new(),
        exceptions: vec![exception],
        verdict,
    }
}

#[test]
fn test_completed_run_passes() {
    let m = metrics(100, 100, WorkerStats::default());
    let verdict = evaluate(&m, &PassCriteria::default(), StopReason::Completed, None);
    assert!(verdict.passed, "{:?}", verdict.reasons);
    assert!(verdict.reasons.is_empty());
}

#[test]
fn test_each_failed_criterion_is_reported() {
    let workers = WorkerStats {
        messages_processed: 10,
        messages_delivered: 10,
        errors: 5,
        ..WorkerStats::default()
    };
    let m = metrics(100, 40, workers);
    let verdict = evaluate(
        &m,
        &PassCriteria::default(),
        StopReason::ClientFailed,
        Some("engine unreachable"),
    );
    assert!(!verdict.passed);
    assert_eq!(verdict.reasons.len(), 4);
    assert!(verdict.reasons[0].contains("engine unreachable"));
    assert!(verdict.reasons[1].contains("client_failed"));
    assert!(verdict.reasons[2].contains("error rate"));
    assert!(verdict.reasons[3].contains("40/100"));
}

#[test]
fn test_worker_that_fails_every_message_fails_the_run() {
    let mut status = WorkerStatus::new("w1", "tests.AlwaysFails");
    status.messages_failed = 50;
    status.error_count = 50;
    let workers = WorkerStats::from_statuses([&status]);
    assert_eq!(workers.messages_processed, 0);
    assert_eq!(workers.messages_delivered, 50);

    let m = metrics(100, 100, workers);
    assert!((m.worker_error_rate - 1.0).abs() < 1e-9);
    let verdict = evaluate(&m, &PassCriteria::default(), StopReason::Completed, None);
    assert!(!verdict.passed);
    assert!(verdict.reasons[0].contains("error rate"));
}

#[test]
fn test_skipped_messages_dilute_error_rate() {
    let mut status = WorkerStatus::new("w1", "tests.Flaky");
    status.messages_processed = 6;
    status.messages_failed = 2;
    status.messages_skipped = 2;
    status.error_count = 2;
    let m = metrics(10, 10, WorkerStats::from_statuses([&status]));
    assert!((m.worker_error_rate - 0.2).abs() < 1e-9);
}

#[test]
fn test_relaxed_criteria_and_empty_run() {
    let criteria = PassCriteria {
        require_completion: false,
        min_push_ratio: 0.0,
        ..PassCriteria::default()
    };
    let m = metrics(0, 0, WorkerStats::default());
    assert!(evaluate(&m, &criteria, StopReason::MaxDuration, None).passed);
    assert!(!evaluate(&m, &PassCriteria::default(), StopReason::Completed, None).passed);
}

#[test]
fn test_markdown_has_all_sections() {
    let data = report_data(metrics(10, 10, WorkerStats::default()), StopReason::Completed, None);
    let md = render_markdown(&data);
    assert!(md.contains("link \\| down"));
    for heading in [
        "# Simulation Report: smoke",
        "## Summary",
        "## Verdict",
        "## Replay",
        "## Signals & Orders",
        "## PnL",
        "## Latency",
        "## Faults",
        "## Workers",
    ] {
        assert!(md.contains(heading), "missing {heading}");
    }
    assert!(md.contains("**PASSED**"));
    assert!(md.contains("- Corrupted records: 1"));
    assert!(md.contains("| w1 | builtin.noop.Idle |"));
}

#[tokio::test]
async fn test_generate_writes_both_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let generator = ReportGenerator::new(dir.path().join("nested"));
    let data = report_data(
        metrics(10, 3, WorkerStats::default()),
        StopReason::StopRequested,
        None,
    );

    let files = generator.generate(&data).await?;
    assert!(files.json.ends_with("report_run-42.json"));
    assert!(files.markdown.ends_with("report_run-42.md"));

    let json: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&files.json).await?)?;
    assert_eq!(json["run_id"], "run-42");
    assert_eq!(json["stop_reason"], "stop_requested");
    assert_eq!(json["verdict"]["passed"], false);
    assert_eq!(json["exceptions"][0]["kind"], "disconnect");
    assert_eq!(json["metrics"]["records_pushed"], 3);

    let md = tokio::fs::read_to_string(&files.markdown).await?;
    assert!(md.contains("**FAILED**"));
    Ok(())
}

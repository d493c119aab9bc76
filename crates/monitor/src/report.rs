use harness_core::common::num::{count_to_f64, len_to_f64};
use harness_core::config::PassCriteria;
use harness_core::report::entity::{ReportData, SimulationMetrics, StopReason, Verdict};
use harness_core::report::error::ReportError;
use std::path::{Path, PathBuf};
use tracing::info;

/// 一次报告生成写出的文件
#[derive(Debug, Clone, PartialEq)]
pub struct ReportFiles {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

/// # Summary
/// 测试报告生成器，把一份 `ReportData` 写成 JSON 与 Markdown 两个文件。
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// # Summary
    /// 写出 `report_<run_id>.json` 与 `report_<run_id>.md`。
    ///
    /// # Returns
    /// 目录不可创建或文件不可写时返回 `ReportError::Io`。
    pub async fn generate(&self, data: &ReportData) -> Result<ReportFiles, ReportError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let json = self.output_dir.join(format!("report_{}.json", data.run_id));
        tokio::fs::write(&json, serde_json::to_string_pretty(data)?).await?;

        let markdown = self.output_dir.join(format!("report_{}.md", data.run_id));
        tokio::fs::write(&markdown, render_markdown(data)).await?;

        info!(
            "Report written: {} / {} (passed: {})",
            json.display(),
            markdown.display(),
            data.verdict.passed
        );
        Ok(ReportFiles { json, markdown })
    }
}

/// # Summary
/// 按判定条件给出通过/失败结论。
///
/// # Logic
/// 1. 存在终止错误即失败。
/// 2. 要求完整推送时，停止原因必须为 `Completed`。
/// 3. Worker 错误率、p99 延迟与推送比例分别对照上限/下限。
pub fn evaluate(
    metrics: &SimulationMetrics,
    criteria: &PassCriteria,
    stop_reason: StopReason,
    terminal_error: Option<&str>,
) -> Verdict {
    let mut reasons = Vec::new();

    if let Some(error) = terminal_error {
        reasons.push(format!("terminated with error: {error}"));
    }
    if criteria.require_completion && stop_reason != StopReason::Completed {
        reasons.push(format!(
            "replay did not complete (stop reason: {})",
            stop_reason_label(stop_reason)
        ));
    }
    if metrics.worker_error_rate > criteria.max_worker_error_rate {
        reasons.push(format!(
            "worker error rate {:.4} exceeds {:.4}",
            metrics.worker_error_rate, criteria.max_worker_error_rate
        ));
    }
    if let Some(limit) = criteria.max_p99_latency_ms
        && metrics.latency.samples > 0
        && metrics.latency.p99_ms > limit
    {
        reasons.push(format!(
            "p99 latency {:.3}ms exceeds {:.3}ms",
            metrics.latency.p99_ms, limit
        ));
    }
    if metrics.total_records == 0 {
        if criteria.min_push_ratio > 0.0 {
            reasons.push("no records were loaded".to_string());
        }
    } else {
        let ratio = count_to_f64(metrics.records_pushed) / len_to_f64(metrics.total_records);
        if ratio < criteria.min_push_ratio {
            reasons.push(format!(
                "pushed {}/{} records ({:.1}%), below required {:.1}%",
                metrics.records_pushed,
                metrics.total_records,
                ratio * 100.0,
                criteria.min_push_ratio * 100.0
            ));
        }
    }

    Verdict {
        passed: reasons.is_empty(),
        reasons,
    }
}

fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Completed => "completed",
        StopReason::MaxDuration => "max_duration",
        StopReason::StopRequested => "stop_requested",
        StopReason::ClientFailed => "client_failed",
        StopReason::PusherError => "pusher_error",
        StopReason::StartupFailed => "startup_failed",
    }
}

// 表格单元格内的竖线需要转义
fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}

/// # Summary
/// 渲染 Markdown 报告，各段落标题固定，便于人工对比多次运行。
pub fn render_markdown(data: &ReportData) -> String {
    let m = &data.metrics;
    let mut out: Vec<String> = Vec::new();

    out.push(format!("# Simulation Report: {}", data.name));
    out.push(String::new());
    out.push("## Summary".to_string());
    out.push(String::new());
    out.push(format!("- Run ID: `{}`", data.run_id));
    out.push(format!("- Generated: {}", data.generated_at.to_rfc3339()));
    out.push(format!("- Mode: {}", data.mode));
    out.push(format!("- Started: {}", m.started_at.to_rfc3339()));
    out.push(format!("- Ended: {}", m.ended_at.to_rfc3339()));
    out.push(format!("- Duration: {:.3}s", count_to_f64(m.duration_ms) / 1000.0));
    out.push(format!("- Stop reason: {}", stop_reason_label(data.stop_reason)));
    if let Some(error) = &data.terminal_error {
        out.push(format!("- Terminal error: {error}"));
    }
    out.push(String::new());

    out.push("## Verdict".to_string());
    out.push(String::new());
    out.push(format!(
        "**{}**",
        if data.verdict.passed { "PASSED" } else { "FAILED" }
    ));
    for reason in &data.verdict.reasons {
        out.push(format!("- {reason}"));
    }
    out.push(String::new());

    out.push("## Replay".to_string());
    out.push(String::new());
    out.push(format!("- Records loaded: {}", m.total_records));
    out.push(format!("- Records pushed: {}", m.records_pushed));
    out.push(format!("- Progress: {:.1}%", m.progress_percent));
    out.push(format!("- Push rate: {:.2} records/s", m.push_rate));
    out.push(format!("- Corrupted records: {}", m.corrupted_records));
    out.push(format!("- Delayed records: {}", m.delayed_records));
    out.push(format!("- Consumer errors: {}", m.consumer_errors));
    out.push(format!(
        "- Messages observed: {} ({} invalid)",
        m.messages_observed, m.invalid_messages
    ));
    out.push(String::new());

    out.push("## Signals & Orders".to_string());
    out.push(String::new());
    out.push(format!("- Signals: {}", m.signals_total));
    for (kind, count) in &m.signals_by_kind {
        out.push(format!("  - {kind}: {count}"));
    }
    out.push(format!("- Orders: {}", m.orders_total));
    for (status, count) in &m.orders_by_status {
        out.push(format!("  - {status}: {count}"));
    }
    out.push(format!("- Fills: {}", m.fills));
    out.push(String::new());

    out.push("## PnL".to_string());
    out.push(String::new());
    out.push(format!("- Realized: {}", m.realized_pnl));
    out.push(format!("- Unrealized: {}", m.unrealized_pnl));
    out.push(format!("- Commission: {}", m.commission));
    out.push(format!("- Total (net of commission): {}", m.total_pnl));
    if !data.positions.is_empty() {
        out.push(String::new());
        out.push("| Worker | Symbol | Quantity | Avg Price | Last Price | Realized | Unrealized |".to_string());
        out.push("|---|---|---|---|---|---|---|".to_string());
        for p in &data.positions {
            out.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} |",
                p.worker_id,
                p.position.symbol,
                p.position.quantity,
                p.position.avg_price,
                p.position.current_price,
                p.position.realized_pnl,
                p.unrealized_pnl
            ));
        }
    }
    out.push(String::new());

    out.push("## Latency".to_string());
    out.push(String::new());
    let l = &m.latency;
    out.push(format!("- Samples: {}", l.samples));
    out.push(format!("- Mean: {:.3}ms", l.mean_ms));
    out.push(format!("- p50: {:.3}ms", l.p50_ms));
    out.push(format!("- p95: {:.3}ms", l.p95_ms));
    out.push(format!("- p99: {:.3}ms", l.p99_ms));
    out.push(format!("- Max: {:.3}ms", l.max_ms));
    out.push(format!("- Pusher EMA: {:.3}ms", l.pusher_ema_ms));
    out.push(String::new());

    out.push("## Faults".to_string());
    out.push(String::new());
    let f = &m.faults;
    out.push(format!("- Network delay: {}", f.network_delay));
    out.push(format!("- Disconnect: {}", f.disconnect));
    out.push(format!("- Data corruption: {}", f.data_corruption));
    out.push(format!("- Strategy error: {}", f.strategy_error));
    out.push(format!("- Recovered: {}", f.recovered));
    if !data.exceptions.is_empty() {
        out.push(String::new());
        out.push("| Time | Kind | Duration (ms) | Recovered | Description |".to_string());
        out.push("|---|---|---|---|---|".to_string());
        for e in &data.exceptions {
            out.push(format!(
                "| {} | {} | {} | {} | {} |",
                e.timestamp.to_rfc3339(),
                e.kind,
                e.duration_ms,
                if e.recovered { "yes" } else { "no" },
                cell(&e.description)
            ));
        }
    }
    out.push(String::new());

    out.push("## Workers".to_string());
    out.push(String::new());
    let w = &m.workers;
    out.push(format!(
        "- Total: {} (running {}, faulted {}, errored {}, stopped {})",
        w.total, w.running, w.faulted, w.errored, w.stopped
    ));
    out.push(format!(
        "- Error rate: {:.4} ({} errors over {} delivered messages)",
        m.worker_error_rate, w.errors, w.messages_delivered
    ));
    if !data.workers.is_empty() {
        out.push(String::new());
        out.push("| Worker | Strategy | State | Processed | Failed | Skipped | Signals | Orders | Errors | Last Error |".to_string());
        out.push("|---|---|---|---|---|---|---|---|---|---|".to_string());
        for s in &data.workers {
            out.push(format!(
                "| {} | {} | {:?} | {} | {} | {} | {} | {} | {} | {} |",
                s.worker_id,
                s.strategy_id,
                s.state,
                s.messages_processed,
                s.messages_failed,
                s.messages_skipped,
                s.signals_emitted,
                s.orders_placed,
                s.error_count,
                s.last_error.as_deref().map_or_else(|| "-".to_string(), cell)
            ));
        }
    }
    out.push(String::new());

    out.join("\n")
}

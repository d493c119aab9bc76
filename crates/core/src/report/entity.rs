use crate::fault::entity::{FaultCounts, FaultKind, SimulatedException};
use crate::replay::entity::PushStats;
use crate::strategy::entity::{PositionInfo, WorkerStats, WorkerStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// # Summary
/// 延迟分布统计（毫秒）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    // 推送器自身的扇出延迟 EMA
    pub pusher_ema_ms: f64,
}

/// # Summary
/// 全程运行指标，运行开始时创建，结束时定稿。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,

    // 推送
    pub total_records: usize,
    pub records_pushed: u64,
    pub progress_percent: f64,
    pub push_rate: f64,
    pub corrupted_records: u64,
    pub delayed_records: u64,
    pub consumer_errors: u64,
    pub messages_observed: u64,
    pub invalid_messages: u64,

    // 信号与订单
    pub signals_total: u64,
    pub signals_by_kind: BTreeMap<String, u64>,
    pub orders_total: u64,
    pub orders_by_status: BTreeMap<String, u64>,
    pub fills: u64,

    // 盈亏
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    // 已实现 + 未实现 - 手续费
    pub total_pnl: Decimal,
    pub commission: Decimal,

    pub latency: LatencyStats,
    pub faults: FaultCounts,
    pub workers: WorkerStats,
    // 错误数 / 处理消息数
    pub worker_error_rate: f64,
}

/// # Summary
/// 带 Worker 归属与读取时计算的未实现盈亏的持仓视图。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub worker_id: String,
    #[serde(flatten)]
    pub position: PositionInfo,
    pub unrealized_pnl: Decimal,
}

impl PositionReport {
    pub fn new(worker_id: &str, position: &PositionInfo) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            position: position.clone(),
            unrealized_pnl: position.unrealized_pnl(),
        }
    }
}

/// # Summary
/// 通过/失败判定结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    // 每条未满足的判定条件一行
    pub reasons: Vec<String>,
}

/// # Summary
/// 一次运行结束的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxDuration,
    StopRequested,
    ClientFailed,
    PusherError,
    // 组件启动失败，未进入回放
    StartupFailed,
}

/// # Summary
/// 报告生成器的唯一输入，JSON 与 Markdown 两种格式均由此派生。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub run_id: String,
    pub name: String,
    pub generated_at: DateTime<Utc>,
    // connected / standalone
    pub mode: String,
    pub stop_reason: StopReason,
    pub terminal_error: Option<String>,
    pub config: serde_json::Value,
    pub metrics: SimulationMetrics,
    pub workers: Vec<WorkerStatus>,
    pub positions: Vec<PositionReport>,
    pub exceptions: Vec<SimulatedException>,
    pub verdict: Verdict,
}

/// # Summary
/// 监控器从快照源读取的一次原始读数。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReading {
    pub market_time: Option<DateTime<Utc>>,
    pub pusher: Option<PushStats>,
    pub workers: Option<WorkerStats>,
    pub active_faults: Vec<FaultKind>,
    pub connection: Option<String>,
}

/// # Summary
/// 周期性监控快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub taken_at: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: ProbeReading,
    pub messages_observed: u64,
    pub signals_total: u64,
    pub orders_total: u64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

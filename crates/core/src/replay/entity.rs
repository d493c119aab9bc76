use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 推送节奏模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    // 按相邻记录的真实时间差 ÷ 倍速等待
    #[default]
    RealTime,
    // 按固定批间隔 ÷ 倍速等待，每批发送 batch_size 条
    FixedInterval,
}

/// # Summary
/// 推送器状态机。
///
/// # Invariants
/// - `Idle → Running ⇄ Paused → Stopping → Stopped | Completed | Error`。
/// - `Completed` 仅在游标耗尽序列时到达。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Completed,
    Error,
}

impl PushState {
    /// 是否为终止态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PushState::Stopped | PushState::Completed | PushState::Error
        )
    }

    /// 循环是否处于活动期（运行或暂停）
    pub fn is_active(&self) -> bool {
        matches!(self, PushState::Running | PushState::Paused)
    }
}

/// # Summary
/// 推送器运行统计快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStats {
    pub state: PushState,
    // 已加载记录总数
    pub total: usize,
    // 已成功构造并扇出的记录数
    pub pushed: u64,
    // 当前游标
    pub cursor: usize,
    // 进度百分比 [0, 100]
    pub progress_percent: f64,
    // 被注入损坏的记录数
    pub corrupted: u64,
    // 被注入网络延迟的记录数
    pub delayed: u64,
    // 消费者返回错误的次数
    pub consumer_errors: u64,
    // 扇出延迟的指数移动平均（毫秒）
    pub avg_latency_ms: f64,
    // 平均推送速率（条/秒）
    pub push_rate: f64,
    pub speed: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

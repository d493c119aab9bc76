use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 注入的故障类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    NetworkDelay,
    Disconnect,
    DataCorruption,
    StrategyError,
}

impl FaultKind {
    pub const ALL: [FaultKind; 4] = [
        FaultKind::NetworkDelay,
        FaultKind::Disconnect,
        FaultKind::DataCorruption,
        FaultKind::StrategyError,
    ];

    /// 是否为持续型故障（持续时间非零）
    pub fn is_timed(&self) -> bool {
        matches!(self, FaultKind::NetworkDelay | FaultKind::Disconnect)
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::NetworkDelay => "network_delay",
            FaultKind::Disconnect => "disconnect",
            FaultKind::DataCorruption => "data_corruption",
            FaultKind::StrategyError => "strategy_error",
        };
        write!(f, "{}", s)
    }
}

/// # Summary
/// 一次故障注入记录。
///
/// # Invariants
/// - 历史只追加；`recovered` 在效果结束时翻转为 true。
/// - 瞬时故障（数据损坏、策略错误）的 `duration_ms` 为 0，持续型故障非 0。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedException {
    pub id: String,
    pub kind: FaultKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub duration_ms: u64,
    pub recovered: bool,
    pub recovered_at: Option<DateTime<Utc>>,
}

impl SimulatedException {
    /// 创建故障记录，瞬时故障的持续时间被强制为 0
    pub fn new(kind: FaultKind, description: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            description: description.into(),
            duration_ms: if kind.is_timed() { duration_ms.max(1) } else { 0 },
            recovered: false,
            recovered_at: None,
        }
    }

    pub fn mark_recovered(&mut self) {
        if !self.recovered {
            self.recovered = true;
            self.recovered_at = Some(Utc::now());
        }
    }
}

/// # Summary
/// 对单条行情载荷施加的损坏方式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    // close = 0
    ZeroPrice,
    // close < 0
    NegativePrice,
    // volume = 0
    ZeroVolume,
    // timestamp = -1
    InvalidTimestamp,
    // 删除一个 OHLCV 字段
    MissingField(String),
}

/// # Summary
/// 各类故障的累计触发次数。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultCounts {
    pub network_delay: u64,
    pub disconnect: u64,
    pub data_corruption: u64,
    pub strategy_error: u64,
    // 实际被篡改的记录数
    pub corrupted_records: u64,
    pub recovered: u64,
}

impl FaultCounts {
    pub fn record(&mut self, kind: FaultKind) {
        match kind {
            FaultKind::NetworkDelay => self.network_delay += 1,
            FaultKind::Disconnect => self.disconnect += 1,
            FaultKind::DataCorruption => self.data_corruption += 1,
            FaultKind::StrategyError => self.strategy_error += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.network_delay + self.disconnect + self.data_corruption + self.strategy_error
    }
}

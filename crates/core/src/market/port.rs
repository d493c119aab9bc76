use crate::common::TimeFrame;
use crate::market::entity::{Bar, MarketDataMessage};
use crate::market::error::DataError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 历史行情数据源接口。
///
/// # Invariants
/// - 返回的序列必须按时间戳非递减排序（稳定排序）。
/// - 单条坏记录应被跳过并告警，而不是使整次加载失败。
#[async_trait]
pub trait DataSource: Send + Sync {
    /// # Summary
    /// 加载特定证券在指定周期与时间范围内的 K 线。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码。
    /// * `interval`: K 线周期。
    /// * `start`: 可选的开始时间（包含）。
    /// * `end`: 可选的结束时间（包含）。
    ///
    /// # Returns
    /// 成功返回有序的 Bar 列表，数据源不存在或不可读时返回 `DataError`。
    async fn load_data(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, DataError>;

    /// # Summary
    /// 检查数据源是否可用（路径存在、数据库可连接等）。
    async fn validate(&self) -> bool;
}

/// # Summary
/// 行情消息消费者接口，由推送器按注册顺序逐个调用。
///
/// # Invariants
/// - 单个消费者返回错误只会被记录与计数，不会中断推送循环。
#[async_trait]
pub trait MarketDataConsumer: Send + Sync {
    /// 消费者名称，用于日志
    fn name(&self) -> &str;

    /// 处理一条行情消息
    async fn on_market_data(&self, message: &MarketDataMessage) -> Result<(), DataError>;
}

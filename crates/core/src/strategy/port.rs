use crate::market::entity::MarketDataMessage;
use crate::strategy::entity::{OrderInfo, StrategyContext, StrategyOutput, TradeSignal};
use crate::strategy::error::StrategyError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// # Summary
/// 可插拔的策略实现契约。
///
/// # Invariants
/// - 同一实例只会被一个 Worker 协程顺序调用，因此只要求 `Send`。
/// - `on_data` 返回错误或 panic 只影响所属 Worker。
#[async_trait]
pub trait Strategy: Send {
    /// # Summary
    /// 启动时调用一次的初始化钩子。
    ///
    /// # Arguments
    /// * `ctx`: Worker 标识、参数与回放时钟。
    async fn initialize(&mut self, _ctx: &StrategyContext) -> Result<(), StrategyError> {
        Ok(())
    }

    /// # Summary
    /// 处理一条行情消息。
    ///
    /// # Returns
    /// 信号、订单、二者的批次或空。
    async fn on_data(&mut self, data: &MarketDataMessage) -> Result<StrategyOutput, StrategyError>;

    /// 停止时的可选清理钩子
    async fn shutdown(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// # Summary
/// 策略构造函数，按参数实例化一个策略。
pub type StrategyConstructor =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Strategy>, StrategyError> + Send + Sync>;

/// # Summary
/// 信号处理能力接口。任何需要响应 Worker 信号的组件都实现此接口并注册到管理器。
#[async_trait]
pub trait SignalHandler: Send + Sync {
    /// 该处理器是否关心此信号，默认全部接收
    fn matches(&self, _signal: &TradeSignal) -> bool {
        true
    }

    /// # Summary
    /// 处理一条已通过校验的信号。
    ///
    /// # Returns
    /// 失败返回 `StrategyError::Handler`，由管理器记录后继续。
    async fn handle_signal(&self, worker_id: &str, signal: &TradeSignal) -> Result<(), StrategyError>;
}

/// # Summary
/// 订单处理能力接口。
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn handle_order(&self, worker_id: &str, order: &OrderInfo) -> Result<(), StrategyError>;
}

/// 以同步闭包实现的信号处理器
pub struct FnSignalHandler<F>(pub F);

#[async_trait]
impl<F> SignalHandler for FnSignalHandler<F>
where
    F: Fn(&str, &TradeSignal) -> Result<(), StrategyError> + Send + Sync,
{
    async fn handle_signal(&self, worker_id: &str, signal: &TradeSignal) -> Result<(), StrategyError> {
        (self.0)(worker_id, signal)
    }
}

/// 以同步闭包实现的订单处理器
pub struct FnOrderHandler<F>(pub F);

#[async_trait]
impl<F> OrderHandler for FnOrderHandler<F>
where
    F: Fn(&str, &OrderInfo) -> Result<(), StrategyError> + Send + Sync,
{
    async fn handle_order(&self, worker_id: &str, order: &OrderInfo) -> Result<(), StrategyError> {
        (self.0)(worker_id, order)
    }
}

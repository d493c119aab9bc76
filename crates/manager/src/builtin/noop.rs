use async_trait::async_trait;
use harness_core::market::entity::MarketDataMessage;
use harness_core::strategy::entity::StrategyOutput;
use harness_core::strategy::error::StrategyError;
use harness_core::strategy::port::Strategy;
use serde_json::{Map, Value};

/// 接收行情但从不产出任何信号的空策略
pub struct IdleStrategy;

impl IdleStrategy {
    pub fn create(_params: &Map<String, Value>) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(IdleStrategy))
    }
}

#[async_trait]
impl Strategy for IdleStrategy {
    async fn on_data(&mut self, _data: &MarketDataMessage) -> Result<StrategyOutput, StrategyError> {
        Ok(StrategyOutput::None)
    }
}

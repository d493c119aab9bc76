use async_trait::async_trait;
use harness_core::common::num::len_to_f64;
use harness_core::market::entity::MarketDataMessage;
use harness_core::strategy::entity::{
    OrderInfo, OrderSide, SignalKind, StrategyContext, StrategyOutput, TradeSignal,
};
use harness_core::strategy::error::StrategyError;
use harness_core::strategy::port::Strategy;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

const DEFAULT_FAST: usize = 5;
const DEFAULT_SLOW: usize = 20;

#[derive(Default)]
struct SymbolState {
    closes: VecDeque<f64>,
    // 上一根 K 线的 (快线, 慢线)
    previous: Option<(f64, f64)>,
    in_position: bool,
}

/// # Summary
/// 快慢均线交叉策略。
///
/// # Invariants
/// - 每个证券独立维护窗口与持仓标记。
/// - 慢线窗口填满后才开始比较；金叉且空仓时买入，死叉且持仓时卖出。
///
/// # Arguments
/// 参数 `fast`、`slow` 为窗口长度（要求 `fast < slow`），
/// 可选 `quantity` 设置后同时下市价单。
pub struct MovingAverageCross {
    fast: usize,
    slow: usize,
    quantity: Option<Decimal>,
    worker_id: String,
    symbols: HashMap<String, SymbolState>,
}

impl MovingAverageCross {
    pub fn new(fast: usize, slow: usize) -> Result<Self, StrategyError> {
        if fast == 0 || fast >= slow {
            return Err(StrategyError::InvalidParams(format!(
                "fast window ({fast}) must be positive and below slow window ({slow})"
            )));
        }
        Ok(Self {
            fast,
            slow,
            quantity: None,
            worker_id: String::new(),
            symbols: HashMap::new(),
        })
    }

    pub fn create(params: &Map<String, Value>) -> Result<Box<dyn Strategy>, StrategyError> {
        let fast = window_param(params, "fast", DEFAULT_FAST)?;
        let slow = window_param(params, "slow", DEFAULT_SLOW)?;
        let mut strategy = Self::new(fast, slow)?;

        if let Some(raw) = params.get("quantity") {
            let quantity = raw
                .as_f64()
                .filter(|q| q.is_finite() && *q > 0.0)
                .and_then(Decimal::from_f64_retain)
                .ok_or_else(|| StrategyError::InvalidParams(format!("quantity: {raw}")))?;
            strategy.quantity = Some(quantity);
        }
        Ok(Box::new(strategy))
    }

    /// # Summary
    /// 输入一个收盘价，返回本次是否触发买卖。
    fn observe(&mut self, symbol: &str, close: f64) -> Option<SignalKind> {
        let (fast, slow) = (self.fast, self.slow);
        let state = self.symbols.entry(symbol.to_string()).or_default();

        state.closes.push_back(close);
        if state.closes.len() > slow {
            state.closes.pop_front();
        }
        if state.closes.len() < slow {
            return None;
        }

        let slow_ma = state.closes.iter().sum::<f64>() / len_to_f64(slow);
        let fast_ma = state.closes.iter().rev().take(fast).sum::<f64>() / len_to_f64(fast);
        let previous = state.previous.replace((fast_ma, slow_ma));
        let (prev_fast, prev_slow) = previous?;

        if prev_fast <= prev_slow && fast_ma > slow_ma && !state.in_position {
            state.in_position = true;
            return Some(SignalKind::Buy);
        }
        if prev_fast >= prev_slow && fast_ma < slow_ma && state.in_position {
            state.in_position = false;
            return Some(SignalKind::Sell);
        }
        None
    }
}

fn window_param(params: &Map<String, Value>, key: &str, default: usize) -> Result<usize, StrategyError> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| StrategyError::InvalidParams(format!("{key}: {v}"))),
    }
}

#[async_trait]
impl Strategy for MovingAverageCross {
    async fn initialize(&mut self, ctx: &StrategyContext) -> Result<(), StrategyError> {
        self.worker_id = ctx.worker_id.clone();
        debug!(
            "[{}] MovingAverageCross initialized (fast {}, slow {})",
            self.worker_id, self.fast, self.slow
        );
        Ok(())
    }

    async fn on_data(&mut self, data: &MarketDataMessage) -> Result<StrategyOutput, StrategyError> {
        let bar = data.to_bar()?;
        let Some(kind) = self.observe(&bar.symbol, bar.close) else {
            return Ok(StrategyOutput::None);
        };

        let strength = if kind == SignalKind::Buy { 1.0 } else { -1.0 };
        let volume = self
            .quantity
            .and_then(|q| q.to_f64())
            .unwrap_or(1.0);
        let mut signal = TradeSignal::new(&bar.symbol, kind, strength, bar.close, volume);
        signal.timestamp = bar.timestamp;
        debug!("[{}] {} crossover on {} at {}", self.worker_id, kind, bar.symbol, bar.close);

        let Some(quantity) = self.quantity else {
            return Ok(StrategyOutput::Signal(signal));
        };
        let side = if kind == SignalKind::Buy {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let order = OrderInfo::market(&bar.symbol, side, quantity);
        Ok(StrategyOutput::Batch(vec![
            StrategyOutput::Signal(signal),
            StrategyOutput::Order(order),
        ]))
    }
}

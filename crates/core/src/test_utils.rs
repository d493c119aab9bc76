//! 跨 crate 测试共享的夹具与记录型处理器。

use crate::common::TimeFrame;
use crate::common::num::len_to_f64;
use crate::market::entity::{Bar, MarketDataMessage};
use crate::market::error::DataError;
use crate::market::port::MarketDataConsumer;
use crate::strategy::entity::{OrderInfo, TradeSignal};
use crate::strategy::error::StrategyError;
use crate::strategy::port::{OrderHandler, SignalHandler};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// # Summary
/// 生成从 `start` 开始、间隔 `interval` 的连续 K 线，收盘价按 `base_price + i` 递增。
pub fn bars(symbol: &str, start: DateTime<Utc>, interval: TimeFrame, count: usize, base_price: f64) -> Vec<Bar> {
    let step = interval.duration();
    (0..count)
        .map(|i| {
            let price = base_price + len_to_f64(i);
            Bar {
                symbol: symbol.to_string(),
                timestamp: start + step * i32::try_from(i).unwrap_or(i32::MAX),
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price + 0.5,
                volume: 10.0 + len_to_f64(i),
                interval,
            }
        })
        .collect()
}

/// 一分钟 K 线的快捷构造
pub fn minute_bars(symbol: &str, start: DateTime<Utc>, count: usize) -> Vec<Bar> {
    bars(symbol, start, TimeFrame::Minute1, count, 100.0)
}

/// 按给定收盘价序列生成一分钟 K 线
pub fn bars_from_closes(symbol: &str, start: DateTime<Utc>, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| Bar {
            symbol: symbol.to_string(),
            timestamp: start + Duration::minutes(i64::try_from(i).unwrap_or(i64::MAX)),
            open: *close,
            high: close + 1.0,
            low: close - 1.0,
            close: *close,
            volume: 1.0,
            interval: TimeFrame::Minute1,
        })
        .collect()
}

/// # Summary
/// 记录所有收到的行情消息，可选地在每条消息上返回错误。
pub struct RecordingConsumer {
    name: String,
    fail: bool,
    received: Mutex<Vec<MarketDataMessage>>,
}

impl RecordingConsumer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            received: Mutex::new(Vec::new()),
        }
    }

    /// 每条消息都返回错误的消费者
    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn messages(&self) -> Vec<MarketDataMessage> {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl MarketDataConsumer for RecordingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_market_data(&self, message: &MarketDataMessage) -> Result<(), DataError> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        if self.fail {
            return Err(DataError::Delivery(format!("{} rejects everything", self.name)));
        }
        Ok(())
    }
}

/// # Summary
/// 记录信号与订单的处理器。
#[derive(Default)]
pub struct RecordingHandler {
    signals: Mutex<Vec<(String, TradeSignal)>>,
    orders: Mutex<Vec<(String, OrderInfo)>>,
}

impl RecordingHandler {
    pub fn signals(&self) -> Vec<(String, TradeSignal)> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn orders(&self) -> Vec<(String, OrderInfo)> {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SignalHandler for RecordingHandler {
    async fn handle_signal(&self, worker_id: &str, signal: &TradeSignal) -> Result<(), StrategyError> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((worker_id.to_string(), signal.clone()));
        Ok(())
    }
}

#[async_trait]
impl OrderHandler for RecordingHandler {
    async fn handle_order(&self, worker_id: &str, order: &OrderInfo) -> Result<(), StrategyError> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((worker_id.to_string(), order.clone()));
        Ok(())
    }
}

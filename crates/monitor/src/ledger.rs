use harness_core::market::entity::Bar;
use harness_core::report::entity::PositionReport;
use harness_core::strategy::entity::{OrderInfo, OrderSide, OrderStatus, OrderType, PositionInfo};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// # Summary
/// 一笔纸面成交。
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    pub worker_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
}

/// # Summary
/// 监控器内部的纸面撮合账本，按行情回放价格模拟 Worker 订单的成交与持仓。
///
/// # Invariants
/// - 每个 (Worker, 证券) 只维护一个 `PositionInfo`。
/// - 市价单以该证券最近一次的收盘价全量成交；尚无价格时挂起到下一根 K 线。
/// - 限价单只在之后的 K 线穿越限价时以限价成交。
/// - 手续费按成交额乘以费率单边收取。
/// - 只保留未终结的订单，终结的订单只留下按状态的计数。
pub struct PaperLedger {
    commission_rate: Decimal,
    last_prices: HashMap<String, Decimal>,
    positions: HashMap<(String, String), PositionInfo>,
    // 等待成交的订单，按提交顺序
    resting: Vec<OrderInfo>,
    settled: BTreeMap<String, u64>,
    commission: Decimal,
    fills: u64,
}

impl Default for PaperLedger {
    fn default() -> Self {
        // 万一
        Self::new(Decimal::new(1, 4))
    }
}

impl PaperLedger {
    pub fn new(commission_rate: Decimal) -> Self {
        Self {
            commission_rate,
            last_prices: HashMap::new(),
            positions: HashMap::new(),
            resting: Vec::new(),
            settled: BTreeMap::new(),
            commission: Decimal::ZERO,
            fills: 0,
        }
    }

    /// # Summary
    /// 接收一张 Worker 订单。
    ///
    /// # Logic
    /// 1. 数量非正或限价非正的订单直接拒绝。
    /// 2. 市价单在已有价格时立即成交。
    /// 3. 其余订单进入挂单队列，等待后续 K 线。
    ///
    /// # Returns
    /// 立即成交时返回成交记录。
    pub fn submit(&mut self, worker_id: &str, mut order: OrderInfo) -> Option<Fill> {
        order.ensure_id();
        if order.worker_id.is_empty() {
            order.worker_id = worker_id.to_string();
        }

        let bad_price = order.order_type == OrderType::Limit
            && order.price.is_none_or(|p| p <= Decimal::ZERO);
        if order.quantity <= Decimal::ZERO || bad_price {
            warn!(
                "Rejecting order {} from {}: quantity {} price {:?}",
                order.id, order.worker_id, order.quantity, order.price
            );
            if let Err(e) = order.transition(OrderStatus::Rejected) {
                warn!("Order {} could not be rejected: {e}", order.id);
            }
            self.settle(&order);
            return None;
        }

        let immediate = match order.order_type {
            OrderType::Market => self.last_prices.get(&order.symbol).copied(),
            OrderType::Limit => None,
        };
        match immediate {
            Some(price) => {
                let fill = self.fill(&mut order, price);
                self.settle(&order);
                fill
            }
            None => {
                self.resting.push(order);
                None
            }
        }
    }

    /// # Summary
    /// 用一根 K 线刷新价格并撮合挂单。
    ///
    /// # Logic
    /// 1. 记录收盘价为该证券的最新价，并刷新相关持仓的现价。
    /// 2. 挂起的市价单以收盘价成交。
    /// 3. 买入限价单在最低价不高于限价时成交，卖出限价单在最高价不低于限价时成交。
    /// 4. 挂单队列只重建一次，未成交的订单保持原有顺序。
    pub fn on_bar(&mut self, bar: &Bar) -> Vec<Fill> {
        let (Some(close), Some(high), Some(low)) = (
            to_decimal(bar.close),
            to_decimal(bar.high),
            to_decimal(bar.low),
        ) else {
            return Vec::new();
        };

        self.last_prices.insert(bar.symbol.clone(), close);
        for ((_, symbol), position) in self.positions.iter_mut() {
            if *symbol == bar.symbol {
                position.update_price(close);
            }
        }

        let mut fills = Vec::new();
        let pending = std::mem::take(&mut self.resting);
        for mut order in pending {
            let price = if order.symbol == bar.symbol {
                crossing_price(&order, close, high, low)
            } else {
                None
            };
            match price {
                Some(price) => {
                    if let Some(fill) = self.fill(&mut order, price) {
                        fills.push(fill);
                    }
                    self.settle(&order);
                }
                None => self.resting.push(order),
            }
        }
        fills
    }

    fn fill(&mut self, order: &mut OrderInfo, price: Decimal) -> Option<Fill> {
        let quantity = order.remaining();
        if let Err(e) = order.apply_fill(quantity, price) {
            warn!("Paper fill for order {} failed: {e}", order.id);
            return None;
        }

        let commission = price * quantity * self.commission_rate;
        let position = self
            .positions
            .entry((order.worker_id.clone(), order.symbol.clone()))
            .or_insert_with(|| PositionInfo::new(&order.symbol));
        let realized = position.apply_fill(order.side, quantity, price);

        self.commission += commission;
        self.fills += 1;
        debug!(
            "Paper fill {} {:?} {} {} @ {} (realized {})",
            order.worker_id, order.side, quantity, order.symbol, price, realized
        );

        Some(Fill {
            order_id: order.id.clone(),
            worker_id: order.worker_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            price,
            commission,
        })
    }

    fn settle(&mut self, order: &OrderInfo) {
        *self.settled.entry(order.status.to_string()).or_insert(0) += 1;
    }

    /// 运行结束时把仍未成交的挂单标记为过期
    pub fn expire_resting(&mut self) -> usize {
        let mut expired = 0;
        for mut order in std::mem::take(&mut self.resting) {
            match order.transition(OrderStatus::Expired) {
                Ok(()) => expired += 1,
                Err(e) => warn!("Order {} could not be expired: {e}", order.id),
            }
            self.settle(&order);
        }
        expired
    }

    /// 按 (Worker, 证券) 排序的持仓视图
    pub fn positions(&self) -> Vec<PositionReport> {
        let mut reports: Vec<PositionReport> = self
            .positions
            .iter()
            .map(|((worker, _), position)| PositionReport::new(worker, position))
            .collect();
        reports.sort_by(|a, b| {
            (a.worker_id.as_str(), a.position.symbol.as_str())
                .cmp(&(b.worker_id.as_str(), b.position.symbol.as_str()))
        });
        reports
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// 读取时按最新价计算
    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(PositionInfo::unrealized_pnl).sum()
    }

    pub fn commission(&self) -> Decimal {
        self.commission
    }

    /// 已实现 + 未实现 - 手续费
    pub fn net_pnl(&self) -> Decimal {
        self.realized_pnl() + self.unrealized_pnl() - self.commission
    }

    pub fn fills(&self) -> u64 {
        self.fills
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).copied()
    }

    /// 仍在挂单队列中的订单
    pub fn resting_order(&self, id: &str) -> Option<&OrderInfo> {
        self.resting.iter().find(|o| o.id == id)
    }

    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    /// 按订单当前状态计数，包含已终结与仍在挂单的订单
    pub fn order_status_counts(&self) -> BTreeMap<String, u64> {
        let mut counts = self.settled.clone();
        for order in &self.resting {
            *counts.entry(order.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

fn crossing_price(order: &OrderInfo, close: Decimal, high: Decimal, low: Decimal) -> Option<Decimal> {
    match (order.order_type, order.side, order.price) {
        (OrderType::Market, _, _) => Some(close),
        (OrderType::Limit, OrderSide::Buy, Some(limit)) if low <= limit => Some(limit),
        (OrderType::Limit, OrderSide::Sell, Some(limit)) if high >= limit => Some(limit),
        _ => None,
    }
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::try_from(value)
        .ok()
        .map(|d| d.round_dp(8))
        .filter(|d| *d > Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use harness_core::common::TimeFrame;
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, low: f64, close: f64, high: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            interval: TimeFrame::Minute1,
        }
    }

    #[test]
    fn test_market_order_fills_at_last_close() {
        let mut ledger = PaperLedger::default();
        ledger.on_bar(&bar("BTCUSDT", 99.0, 100.0, 101.0));

        let fill = ledger
            .submit("w1", OrderInfo::market("BTCUSDT", OrderSide::Buy, dec!(2)))
            .unwrap();
        assert_eq!(fill.price, dec!(100));
        assert_eq!(fill.commission, dec!(0.02));
        assert_eq!(ledger.order_status_counts().get("filled"), Some(&1));
        assert_eq!(ledger.resting_count(), 0);

        ledger.on_bar(&bar("BTCUSDT", 109.0, 110.0, 111.0));
        assert_eq!(ledger.unrealized_pnl(), dec!(20));

        ledger
            .submit("w1", OrderInfo::market("BTCUSDT", OrderSide::Sell, dec!(2)))
            .unwrap();
        assert_eq!(ledger.realized_pnl(), dec!(20));
        assert_eq!(ledger.unrealized_pnl(), Decimal::ZERO);
        assert_eq!(ledger.fills(), 2);
        // 0.02 + 0.022
        assert_eq!(ledger.commission(), dec!(0.042));
        assert_eq!(ledger.net_pnl(), dec!(19.958));
    }

    #[test]
    fn test_market_order_waits_for_first_price() {
        let mut ledger = PaperLedger::default();
        assert!(
            ledger
                .submit("w1", OrderInfo::market("ETHUSDT", OrderSide::Buy, dec!(1)))
                .is_none()
        );
        assert_eq!(ledger.resting_count(), 1);

        let fills = ledger.on_bar(&bar("ETHUSDT", 49.0, 50.0, 51.0));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(50));
        assert_eq!(ledger.resting_count(), 0);
    }

    #[test]
    fn test_limit_order_fills_only_when_crossed() {
        let mut ledger = PaperLedger::default();
        ledger.on_bar(&bar("BTCUSDT", 99.0, 100.0, 101.0));
        let order = OrderInfo::limit("BTCUSDT", OrderSide::Buy, dec!(1), dec!(95));
        let id = order.id.clone();
        assert!(ledger.submit("w1", order).is_none());

        assert!(ledger.on_bar(&bar("BTCUSDT", 96.0, 97.0, 98.0)).is_empty());
        assert_eq!(ledger.resting_order(&id).unwrap().status, OrderStatus::Pending);
        let fills = ledger.on_bar(&bar("BTCUSDT", 94.0, 96.0, 97.0));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, id);
        assert_eq!(fills[0].price, dec!(95));
        assert!(ledger.resting_order(&id).is_none());
        assert_eq!(ledger.order_status_counts().get("filled"), Some(&1));
    }

    #[test]
    fn test_positions_are_kept_per_worker() {
        let mut ledger = PaperLedger::default();
        ledger.on_bar(&bar("BTCUSDT", 99.0, 100.0, 101.0));
        ledger.submit("w2", OrderInfo::market("BTCUSDT", OrderSide::Sell, dec!(1)));
        ledger.submit("w1", OrderInfo::market("BTCUSDT", OrderSide::Buy, dec!(3)));

        let positions = ledger.positions();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].worker_id, "w1");
        assert_eq!(positions[0].position.quantity, dec!(3));
        assert_eq!(positions[1].position.quantity, dec!(-1));
    }

    #[test]
    fn test_invalid_orders_are_rejected_and_resting_expire() {
        let mut ledger = PaperLedger::default();
        ledger.submit("w1", OrderInfo::market("BTCUSDT", OrderSide::Buy, dec!(0)));
        ledger.submit("w1", OrderInfo::limit("BTCUSDT", OrderSide::Sell, dec!(1), dec!(500)));
        assert_eq!(ledger.expire_resting(), 1);

        let counts = ledger.order_status_counts();
        assert_eq!(counts.get("rejected"), Some(&1));
        assert_eq!(counts.get("expired"), Some(&1));
        assert_eq!(ledger.fills(), 0);
    }

    #[test]
    fn test_settled_orders_are_not_retained() {
        let mut ledger = PaperLedger::default();
        for i in 0..1_000 {
            let limit = if i % 2 == 0 { dec!(90) } else { dec!(200) };
            ledger.submit("w1", OrderInfo::limit("BTCUSDT", OrderSide::Buy, dec!(1), limit));
        }
        ledger.submit("w1", OrderInfo::market("ETHUSDT", OrderSide::Buy, dec!(1)));
        assert_eq!(ledger.resting_count(), 1_001);

        // 只穿越 200 的限价，90 的限价单和其他证券的市价单保持挂单
        let fills = ledger.on_bar(&bar("BTCUSDT", 150.0, 160.0, 170.0));
        assert_eq!(fills.len(), 500);
        assert_eq!(ledger.resting_count(), 501);
        assert!(ledger.resting.iter().all(|o| o.symbol == "ETHUSDT" || o.price == Some(dec!(90))));

        let counts = ledger.order_status_counts();
        assert_eq!(counts.get("filled"), Some(&500));
        assert_eq!(counts.get("pending"), Some(&501));
        assert_eq!(ledger.expire_resting(), 501);
        assert_eq!(ledger.resting_count(), 0);
        assert_eq!(ledger.order_status_counts().get("expired"), Some(&501));
    }
}

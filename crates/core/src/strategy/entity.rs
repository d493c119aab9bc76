use crate::common::time::TimeProvider;
use crate::strategy::error::{OrderError, StrategyError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// # Summary
/// 交易信号方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
    Close,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "buy"),
            SignalKind::Sell => write!(f, "sell"),
            SignalKind::Hold => write!(f, "hold"),
            SignalKind::Close => write!(f, "close"),
        }
    }
}

/// # Summary
/// Worker 在处理行情时表达的交易意图，区别于真实订单。
///
/// # Invariants
/// - `strength` 必须位于 [-1, 1]，超出范围视为校验错误。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: String,
    pub symbol: String,
    pub kind: SignalKind,
    // 信号强度 [-1, 1]
    pub strength: f64,
    // 触发信号时的参考价格
    pub price: f64,
    // 建议数量
    pub volume: f64,
    // 产出信号的策略标识，由管理器在分发前补齐
    #[serde(default)]
    pub strategy_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl TradeSignal {
    pub fn new(symbol: &str, kind: SignalKind, strength: f64, price: f64, volume: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            kind,
            strength,
            price,
            volume,
            strategy_id: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// # Summary
    /// 校验信号字段。
    ///
    /// # Returns
    /// 强度越界、价格或数量非有限值时返回 `StrategyError::InvalidSignal`。
    pub fn validate(&self) -> Result<(), StrategyError> {
        if !self.strength.is_finite() || !(-1.0..=1.0).contains(&self.strength) {
            return Err(StrategyError::InvalidSignal(format!(
                "strength {} outside [-1, 1]",
                self.strength
            )));
        }
        if !self.price.is_finite() || !self.volume.is_finite() {
            return Err(StrategyError::InvalidSignal(
                "price and volume must be finite".to_string(),
            ));
        }
        if self.symbol.is_empty() {
            return Err(StrategyError::InvalidSignal("empty symbol".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// # Summary
/// 订单生命周期状态。
///
/// # Invariants
/// - 只能向前迁移：`Pending → PartiallyFilled → Filled`，
///   或由 `Pending`/`PartiallyFilled` 进入 `Canceled`/`Rejected`/`Expired`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// 判断能否迁移到 `next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next != OrderStatus::Pending,
            OrderStatus::PartiallyFilled => next != OrderStatus::Pending,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// # Summary
/// 订单生命周期记录。
///
/// # Invariants
/// - `id` 一经生成不可修改；缺省时由 `ensure_id` 自动补齐。
/// - 状态迁移只能经由 `transition`/`apply_fill`，保证单向前进。
/// - `filled_quantity <= quantity`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    #[serde(default)]
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    // 限价单价格，市价单为 None
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    // 下单的 Worker，由管理器补齐
    #[serde(default)]
    pub worker_id: String,
}

impl OrderInfo {
    fn build(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            created_at: now,
            updated_at: now,
            worker_id: String::new(),
        }
    }

    /// 创建市价单
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::build(symbol, side, OrderType::Market, quantity, None)
    }

    /// 创建限价单
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self::build(symbol, side, OrderType::Limit, quantity, Some(price))
    }

    /// 缺省 id 时生成 UUID，已有 id 保持不变
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// # Summary
    /// 将订单迁移到新状态。
    ///
    /// # Returns
    /// 后退或离开终止态时返回 `OrderError::InvalidTransition`，订单保持不变。
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// # Summary
    /// 记录一笔成交。
    ///
    /// # Logic
    /// 1. 校验数量为正且不超过剩余数量。
    /// 2. 按成交量加权更新平均成交价。
    /// 3. 全部成交迁移到 `Filled`，否则迁移到 `PartiallyFilled`。
    pub fn apply_fill(&mut self, quantity: Decimal, price: Decimal) -> Result<(), OrderError> {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(format!(
                "fill {} @ {}",
                quantity, price
            )));
        }
        let remaining = self.remaining();
        if quantity > remaining {
            return Err(OrderError::Overfill {
                fill: quantity.to_string(),
                remaining: remaining.to_string(),
            });
        }
        let next = if quantity == remaining {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let prev_cost = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_quantity;
        self.filled_quantity += quantity;
        self.avg_fill_price = Some((prev_cost + price * quantity) / self.filled_quantity);
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// # Summary
/// 单个证券上的敞口。
///
/// # Invariants
/// - 每个 Worker 上下文中每个证券只存在一个 PositionInfo。
/// - `quantity` 带符号：正为多头，负为空头。
/// - 未实现盈亏不存储，读取时由 `unrealized_pnl` 按当前价计算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub realized_pnl: Decimal,
}

impl PositionInfo {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// 更新最新价，未实现盈亏在读取时重新计算
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
    }

    /// `(current_price - avg_price) * quantity`，空仓为 0
    pub fn unrealized_pnl(&self) -> Decimal {
        if self.quantity.is_zero() || self.current_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.avg_price) * self.quantity
    }

    /// # Summary
    /// 按成交调整持仓数量与均价。
    ///
    /// # Logic
    /// 1. 同向加仓（或空仓开仓）：按成本加权更新均价。
    /// 2. 反向减仓：均价不变，按平掉的数量结算已实现盈亏。
    /// 3. 平光后均价归零；反手时以成交价作为新均价。
    ///
    /// # Returns
    /// 本次成交带来的已实现盈亏。
    pub fn apply_fill(&mut self, side: OrderSide, quantity: Decimal, price: Decimal) -> Decimal {
        if quantity.is_zero() {
            return Decimal::ZERO;
        }
        let delta = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        self.current_price = price;

        let same_direction = self.quantity.is_zero()
            || (self.quantity.is_sign_positive() == delta.is_sign_positive());
        if same_direction {
            let old_cost = self.quantity.abs() * self.avg_price;
            self.quantity += delta;
            self.avg_price = (old_cost + quantity * price) / self.quantity.abs();
            return Decimal::ZERO;
        }

        let closed = quantity.min(self.quantity.abs());
        let direction = if self.quantity.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let realized = (price - self.avg_price) * closed * direction;
        self.realized_pnl += realized;
        self.quantity += delta;

        if self.quantity.is_zero() {
            self.avg_price = Decimal::ZERO;
        } else if self.quantity.is_sign_positive() != direction.is_sign_positive() {
            // 反手
            self.avg_price = price;
        }
        realized
    }
}

/// # Summary
/// Worker 的注册描述，来源于配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    // 策略模块路径，例如 "sma"
    pub strategy_module: String,
    // 策略类名，例如 "MovingAverageCross"
    pub strategy_class: String,
    // 策略参数
    #[serde(default)]
    pub params: Map<String, Value>,
    // 订阅的证券，为空表示全部
    #[serde(default)]
    pub symbols: Vec<String>,
    // 错误数超过该值后 Worker 进入 Error 状态
    #[serde(default)]
    pub max_errors: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl WorkerConfig {
    pub fn new(strategy_module: &str, strategy_class: &str) -> Self {
        Self {
            strategy_module: strategy_module.to_string(),
            strategy_class: strategy_class.to_string(),
            params: Map::new(),
            symbols: Vec::new(),
            max_errors: None,
            enabled: true,
        }
    }

    /// `module.Class` 形式的策略标识
    pub fn strategy_id(&self) -> String {
        if self.strategy_module.is_empty() {
            return self.strategy_class.clone();
        }
        format!("{}.{}", self.strategy_module, self.strategy_class)
    }

    /// 该 Worker 是否订阅了给定证券
    pub fn accepts(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// # Summary
/// Worker 生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Registered,
    Starting,
    Running,
    // 被注入策略错误故障，消息会被跳过直到恢复
    Faulted,
    Stopped,
    Error,
}

/// # Summary
/// 单个 Worker 的运行时状态。
///
/// # Invariants
/// - 由 Worker 管理器独占修改，其他组件只能拿到克隆快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub strategy_id: String,
    pub state: WorkerState,
    pub messages_processed: u64,
    /// `on_data` 返回错误或 panic 的消息数
    pub messages_failed: u64,
    pub messages_skipped: u64,
    pub signals_emitted: u64,
    pub orders_placed: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn new(worker_id: &str, strategy_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            strategy_id: strategy_id.to_string(),
            state: WorkerState::Registered,
            messages_processed: 0,
            messages_failed: 0,
            messages_skipped: 0,
            signals_emitted: 0,
            orders_placed: 0,
            error_count: 0,
            last_error: None,
            last_heartbeat: None,
            started_at: None,
            stopped_at: None,
        }
    }

    /// 记录一次错误
    pub fn record_error(&mut self, error: &str) {
        self.error_count += 1;
        self.last_error = Some(error.to_string());
    }
}

/// # Summary
/// 基于实时状态按需汇总的 Worker 统计。
///
/// # Invariants
/// - `messages_delivered` = 成功 + 失败 + 跳过，是错误率的分母。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total: usize,
    pub running: usize,
    pub errored: usize,
    pub faulted: usize,
    pub stopped: usize,
    pub messages_processed: u64,
    pub messages_delivered: u64,
    pub signals_emitted: u64,
    pub orders_placed: u64,
    pub errors: u64,
}

impl WorkerStats {
    /// 从一组状态快照汇总
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a WorkerStatus>) -> Self {
        let mut stats = WorkerStats::default();
        for s in statuses {
            stats.total += 1;
            match s.state {
                WorkerState::Running => stats.running += 1,
                WorkerState::Error => stats.errored += 1,
                WorkerState::Faulted => stats.faulted += 1,
                WorkerState::Stopped => stats.stopped += 1,
                WorkerState::Registered | WorkerState::Starting => {}
            }
            stats.messages_processed += s.messages_processed;
            stats.messages_delivered +=
                s.messages_processed + s.messages_failed + s.messages_skipped;
            stats.signals_emitted += s.signals_emitted;
            stats.orders_placed += s.orders_placed;
            stats.errors += s.error_count;
        }
        stats
    }
}

/// # Summary
/// 策略 `on_data` 的返回值。
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutput {
    None,
    Signal(TradeSignal),
    Order(OrderInfo),
    Batch(Vec<StrategyOutput>),
}

impl StrategyOutput {
    /// 将嵌套批次展开为信号与订单两组
    pub fn flatten(self) -> (Vec<TradeSignal>, Vec<OrderInfo>) {
        let mut signals = Vec::new();
        let mut orders = Vec::new();
        let mut stack = vec![self];
        while let Some(item) = stack.pop() {
            match item {
                StrategyOutput::None => {}
                StrategyOutput::Signal(s) => signals.push(s),
                StrategyOutput::Order(o) => orders.push(o),
                StrategyOutput::Batch(items) => stack.extend(items.into_iter().rev()),
            }
        }
        (signals, orders)
    }
}

/// # Summary
/// 策略初始化时拿到的上下文。
#[derive(Clone)]
pub struct StrategyContext {
    pub worker_id: String,
    pub params: Map<String, Value>,
    pub symbols: Vec<String>,
    // 回放时钟，返回当前行情时间
    pub clock: Arc<dyn TimeProvider>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signal_strength_range() {
        let ok = TradeSignal::new("BTCUSDT", SignalKind::Buy, 1.0, 100.0, 1.0);
        assert!(ok.validate().is_ok());
        let bad = TradeSignal::new("BTCUSDT", SignalKind::Sell, -1.5, 100.0, 1.0);
        assert!(matches!(bad.validate(), Err(StrategyError::InvalidSignal(_))));
        let nan = TradeSignal::new("BTCUSDT", SignalKind::Hold, f64::NAN, 100.0, 1.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_order_moves_forward_only() {
        let mut order = OrderInfo::market("BTCUSDT", OrderSide::Buy, dec!(2));
        order.apply_fill(dec!(1), dec!(100)).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        order.apply_fill(dec!(1), dec!(110)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, Some(dec!(105)));

        assert!(matches!(
            order.transition(OrderStatus::Pending),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert!(order.transition(OrderStatus::Canceled).is_err());
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_order_overfill_rejected() {
        let mut order = OrderInfo::limit("ETHUSDT", OrderSide::Sell, dec!(1), dec!(50));
        assert!(matches!(
            order.apply_fill(dec!(2), dec!(50)),
            Err(OrderError::Overfill { .. })
        ));
        assert_eq!(order.status, OrderStatus::Pending);
        order.transition(OrderStatus::Expired).unwrap();
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut order = OrderInfo::market("X", OrderSide::Buy, dec!(1));
        let id = order.id.clone();
        order.ensure_id();
        assert_eq!(order.id, id);
        order.id.clear();
        order.ensure_id();
        assert!(!order.id.is_empty());
    }

    #[test]
    fn test_position_pnl_is_pulled() {
        let mut pos = PositionInfo::new("BTCUSDT");
        pos.apply_fill(OrderSide::Buy, dec!(2), dec!(100));
        pos.apply_fill(OrderSide::Buy, dec!(2), dec!(110));
        assert_eq!(pos.avg_price, dec!(105));

        pos.update_price(dec!(120));
        assert_eq!(pos.unrealized_pnl(), dec!(60));

        let realized = pos.apply_fill(OrderSide::Sell, dec!(1), dec!(125));
        assert_eq!(realized, dec!(20));
        assert_eq!(pos.quantity, dec!(3));
        assert_eq!(pos.avg_price, dec!(105));

        // 反手：平掉 3 手，再开空 1 手
        let realized = pos.apply_fill(OrderSide::Sell, dec!(4), dec!(100));
        assert_eq!(realized, dec!(-15));
        assert_eq!(pos.quantity, dec!(-1));
        assert_eq!(pos.avg_price, dec!(100));
        assert_eq!(pos.realized_pnl, dec!(5));
    }

    #[test]
    fn test_output_flatten_preserves_order() {
        let s1 = TradeSignal::new("A", SignalKind::Buy, 0.5, 1.0, 1.0);
        let s2 = TradeSignal::new("B", SignalKind::Sell, -0.5, 1.0, 1.0);
        let o = OrderInfo::market("A", OrderSide::Buy, Decimal::ONE);
        let out = StrategyOutput::Batch(vec![
            StrategyOutput::Signal(s1.clone()),
            StrategyOutput::Batch(vec![StrategyOutput::Order(o.clone()), StrategyOutput::None]),
            StrategyOutput::Signal(s2.clone()),
        ]);
        let (signals, orders) = out.flatten();
        assert_eq!(signals, vec![s1, s2]);
        assert_eq!(orders, vec![o]);
    }
}

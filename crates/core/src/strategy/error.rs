use crate::market::error::DataError;
use crate::strategy::entity::OrderStatus;
use thiserror::Error;

/// # Summary
/// 策略域错误枚举。
///
/// # Invariants
/// - 策略执行期错误只影响所属 Worker，由管理器计数后吞掉。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    // 注册表中找不到策略，附带按顺序搜索过的标识
    #[error("Strategy not found: {identifier} (searched: {searched:?})")]
    NotFound {
        identifier: String,
        searched: Vec<String>,
    },
    // 策略参数非法
    #[error("Invalid strategy params: {0}")]
    InvalidParams(String),
    // 初始化钩子失败
    #[error("Initialization failed: {0}")]
    Initialization(String),
    // on_data 执行失败
    #[error("Execution error: {0}")]
    Execution(String),
    // 产出的信号未通过校验
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
    // 策略代码发生 panic
    #[error("Strategy panicked: {0}")]
    Panicked(String),
    // 信号/订单处理器失败
    #[error("Handler error: {0}")]
    Handler(String),
    // 输入行情数据不可用
    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

/// # Summary
/// 订单生命周期错误。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    // 状态只能向前迁移
    #[error("Invalid order transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    // 成交数量超过剩余数量
    #[error("Fill of {fill} exceeds remaining {remaining}")]
    Overfill { fill: String, remaining: String },
    // 数量或价格非法
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}

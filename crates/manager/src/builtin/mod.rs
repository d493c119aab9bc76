//! 随框架发布的内置策略，仅用于冒烟运行。

pub mod noop;
pub mod sma;

use crate::registry::StrategyRegistry;

/// 把所有内置策略注册到 `builtin` 命名空间下
pub fn register_all(registry: &StrategyRegistry) {
    registry.register("builtin.noop.Idle", noop::IdleStrategy::create);
    registry.register("builtin.sma.MovingAverageCross", sma::MovingAverageCross::create);
}

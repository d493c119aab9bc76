//! 策略 Worker 管理：注册表解析、独立协程执行与输出分发。

pub mod builtin;
pub mod registry;
pub mod worker;

pub use registry::StrategyRegistry;
pub use worker::{ManagerError, WorkerManager};

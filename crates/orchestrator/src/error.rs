use crate::orchestrator::SimulationState;
use harness_core::client::error::ClientError;
use harness_core::config::ConfigError;
use harness_core::fault::error::FaultError;
use harness_core::market::error::DataError;
use harness_core::replay::error::ReplayError;
use harness_core::report::error::ReportError;
use harness_manager::ManagerError;
use thiserror::Error;

/// # Summary
/// 编排层错误枚举，包装各组件的领域错误。
///
/// # Invariants
/// - `Config` 只在 `initialize` 阶段产生，出现时不会启动任何运行。
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("Operation not allowed in simulation state {0:?}")]
    InvalidState(SimulationState),
}

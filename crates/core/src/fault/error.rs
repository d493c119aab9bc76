use thiserror::Error;

/// # Summary
/// 故障模拟器错误枚举。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaultError {
    #[error("Fault simulator already running")]
    AlreadyRunning,
    #[error("Invalid fault config: {0}")]
    InvalidConfig(String),
}

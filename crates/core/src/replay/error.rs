use crate::replay::entity::PushState;
use thiserror::Error;

/// # Summary
/// 数据推送器错误枚举。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    // 倍速必须为有限正数
    #[error("Invalid speed multiplier: {0}")]
    InvalidSpeed(f64),
    // 批大小必须大于 0
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),
    // 跳转索引越界
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    // 当前状态不允许该操作
    #[error("Operation not allowed in state {0:?}")]
    InvalidState(PushState),
}

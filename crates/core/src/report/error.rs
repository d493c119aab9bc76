use thiserror::Error;

/// # Summary
/// 报告生成错误枚举。
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

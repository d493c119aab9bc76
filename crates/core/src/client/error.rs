use thiserror::Error;

/// # Summary
/// 建立连接失败的原因分类。调用方据此决定是否降级为独立模式。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectFailure {
    #[error("Connection timed out after {0} ms")]
    Timeout(u64),
    #[error("Connection refused: {0}")]
    Refused(String),
    #[error("Unexpected handshake status: {0}")]
    InvalidStatus(u16),
    #[error("Connection failed: {0}")]
    Other(String),
}

/// # Summary
/// 引擎客户端错误枚举。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error(transparent)]
    Connect(#[from] ConnectFailure),
    #[error("Client is not connected")]
    NotConnected,
    #[error("Missing API credentials")]
    MissingCredentials,
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Client has permanently failed after {0} reconnect attempts")]
    Failed(u32),
}

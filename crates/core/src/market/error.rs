use thiserror::Error;

/// # Summary
/// 行情数据域错误枚举，覆盖数据加载、解析与投递环节。
///
/// # Invariants
/// - 单条记录级别的错误由调用方跳过并告警，不得中断整次加载。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    // 文件系统错误
    #[error("IO error: {0}")]
    Io(String),
    // 解析错误，附带来源位置
    #[error("Parse error at {location}: {reason}")]
    Parse { location: String, reason: String },
    // 必需字段缺失
    #[error("Missing field: {0}")]
    MissingField(String),
    // 字段值非法
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
    // 请求的数据未找到，附带已搜索的位置
    #[error("Data not found: {0}")]
    NotFound(String),
    // 数据库访问错误
    #[error("Database error: {0}")]
    Database(String),
    // 消费者投递失败
    #[error("Delivery error: {0}")]
    Delivery(String),
}

impl From<std::io::Error> for DataError {
    fn from(e: std::io::Error) -> Self {
        DataError::Io(e.to_string())
    }
}

use crate::common::num::signed_to_f64;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// # Summary
/// 协议消息类型。未知类型保留原始字符串，交给通配处理器。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Auth,
    AuthSuccess,
    Subscribe,
    Unsubscribe,
    MarketData,
    Control,
    Ping,
    Pong,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Auth => "auth",
            MessageType::AuthSuccess => "auth_success",
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::MarketData => "market_data",
            MessageType::Control => "control",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "auth" => MessageType::Auth,
            "auth_success" => MessageType::AuthSuccess,
            "subscribe" => MessageType::Subscribe,
            "unsubscribe" => MessageType::Unsubscribe,
            "market_data" => MessageType::MarketData,
            "control" => MessageType::Control,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            other => MessageType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// # Summary
/// 与被测引擎之间的 JSON 帧信封。
///
/// # Invariants
/// - `id` 为调用方生成的 UUID，用于关联请求与响应。
/// - `timestamp` 为 Unix 毫秒（浮点）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl WireMessage {
    pub fn new(kind: MessageType, data: Value) -> Self {
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data
        };
        Self {
            kind: kind.as_str().to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis_f64(),
            data,
            error: None,
        }
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.kind.as_str())
    }
}

/// 当前 Unix 毫秒（浮点）
pub fn now_millis_f64() -> f64 {
    signed_to_f64(Utc::now().timestamp_micros()) / 1000.0
}

/// # Summary
/// 客户端连接状态。
///
/// # Invariants
/// - `Failed` 为终止态：重连次数耗尽后不再重试。
/// - `Closed` 表示调用方主动断开。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Reconnecting,
    Failed,
    Closed,
}

impl ConnectionState {
    /// 传输层是否处于可发送状态
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Authenticated)
    }
}

/// # Summary
/// 鉴权结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    // 已发送签名，等待 auth_success
    Sent,
    // 缺少凭证，但配置允许未鉴权运行
    Unauthenticated,
}

/// # Summary
/// 客户端运行统计。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub sent: u64,
    pub received: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub reconnects: u64,
    pub last_rtt_ms: Option<f64>,
}

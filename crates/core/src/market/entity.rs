use crate::common::TimeFrame;
use crate::market::error::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// # Summary
/// 单根 OHLCV K 线，由数据源在加载时创建。
///
/// # Invariants
/// - 加载后不可变，归属于所在的有序序列。
/// - `timestamp` 精度为毫秒。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    // 证券代码
    pub symbol: String,
    // K 线开始时间
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    // 开盘价
    pub open: f64,
    // 最高价
    pub high: f64,
    // 最低价
    pub low: f64,
    // 收盘价
    pub close: f64,
    // 成交量
    pub volume: f64,
    // K 线周期
    pub interval: TimeFrame,
}

impl Bar {
    /// # Summary
    /// 将 Bar 编码为传输载荷对象。
    ///
    /// # Returns
    /// 包含 open/high/low/close/volume/timestamp(ms)/interval 的 JSON 对象。
    pub fn to_payload(&self) -> Value {
        json!({
            "open": self.open,
            "high": self.high,
            "low": self.low,
            "close": self.close,
            "volume": self.volume,
            "timestamp": self.timestamp.timestamp_millis(),
            "interval": self.interval.to_string(),
        })
    }
}

/// # Summary
/// 传输载荷的数据类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Bar,
    Tick,
}

/// # Summary
/// 围绕 Bar/Tick 的传输信封，由推送器在发送时逐条创建。
///
/// # Invariants
/// - 生命周期仅限单次投递，消费者不应持有可变引用。
/// - `timestamp` 是记录时间，`sent_at` 是墙钟发送时间。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataMessage {
    // 消息唯一标识
    pub id: String,
    // 推送序号，从 1 开始单调递增
    pub sequence: u64,
    // 证券代码
    pub symbol: String,
    // 数据类别
    pub kind: DataKind,
    // 记录时间
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    // 发送时的墙钟时间
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
    // 载荷
    pub payload: Value,
    // 来源标签
    pub origin: String,
}

impl MarketDataMessage {
    /// # Summary
    /// 从 Bar 构造一条待发送的行情消息。
    pub fn from_bar(bar: &Bar, sequence: u64, origin: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            symbol: bar.symbol.clone(),
            kind: DataKind::Bar,
            timestamp: bar.timestamp,
            sent_at: Utc::now(),
            payload: bar.to_payload(),
            origin: origin.to_string(),
        }
    }

    /// # Summary
    /// 从载荷中还原 Bar，并校验数值合法性。
    ///
    /// # Logic
    /// 1. 逐个读取 open/high/low/close/volume，缺失即报 `MissingField`。
    /// 2. 价格必须为正、成交量不得为负、时间戳不得为负。
    /// 3. 载荷未携带周期时回退到 1 分钟。
    ///
    /// # Returns
    /// 载荷被篡改（如注入的数据损坏故障）时返回 `DataError`。
    pub fn to_bar(&self) -> Result<Bar, DataError> {
        let obj = self
            .payload
            .as_object()
            .ok_or_else(|| DataError::InvalidValue {
                field: "payload".to_string(),
                value: self.payload.to_string(),
            })?;

        let open = positive_field(obj, "open")?;
        let high = positive_field(obj, "high")?;
        let low = positive_field(obj, "low")?;
        let close = positive_field(obj, "close")?;
        let volume = number_field(obj, "volume")?;
        if volume < 0.0 {
            return Err(DataError::InvalidValue {
                field: "volume".to_string(),
                value: volume.to_string(),
            });
        }

        let timestamp = match obj.get("timestamp") {
            Some(v) => {
                let ms = v.as_i64().ok_or_else(|| DataError::InvalidValue {
                    field: "timestamp".to_string(),
                    value: v.to_string(),
                })?;
                if ms < 0 {
                    return Err(DataError::InvalidValue {
                        field: "timestamp".to_string(),
                        value: ms.to_string(),
                    });
                }
                DateTime::from_timestamp_millis(ms).ok_or_else(|| DataError::InvalidValue {
                    field: "timestamp".to_string(),
                    value: ms.to_string(),
                })?
            }
            None => self.timestamp,
        };

        let interval = obj
            .get("interval")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Ok(Bar {
            symbol: self.symbol.clone(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            interval,
        })
    }

    /// 载荷中的收盘价（未校验）
    pub fn close(&self) -> Option<f64> {
        self.payload.get("close").and_then(Value::as_f64)
    }
}

fn number_field(obj: &Map<String, Value>, name: &str) -> Result<f64, DataError> {
    let value = obj
        .get(name)
        .ok_or_else(|| DataError::MissingField(name.to_string()))?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DataError::InvalidValue {
            field: name.to_string(),
            value: value.to_string(),
        })
}

fn positive_field(obj: &Map<String, Value>, name: &str) -> Result<f64, DataError> {
    let v = number_field(obj, name)?;
    if v <= 0.0 {
        return Err(DataError::InvalidValue {
            field: name.to_string(),
            value: v.to_string(),
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar {
            symbol: "BTCUSDT".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.5,
            close: 100.5,
            volume: 12.0,
            interval: TimeFrame::Minute1,
        }
    }

    #[test]
    fn test_message_restores_bar() {
        let bar = sample_bar();
        let msg = MarketDataMessage::from_bar(&bar, 1, "replay");
        assert_eq!(msg.symbol, "BTCUSDT");
        assert_eq!(msg.kind, DataKind::Bar);
        assert_eq!(msg.to_bar().unwrap(), bar);
        assert_eq!(msg.close(), Some(100.5));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let bar = sample_bar();

        let mut msg = MarketDataMessage::from_bar(&bar, 1, "replay");
        msg.payload["close"] = json!(0.0);
        assert!(matches!(msg.to_bar(), Err(DataError::InvalidValue { .. })));

        let mut msg = MarketDataMessage::from_bar(&bar, 1, "replay");
        msg.payload["timestamp"] = json!(-1);
        assert!(matches!(msg.to_bar(), Err(DataError::InvalidValue { .. })));

        let mut msg = MarketDataMessage::from_bar(&bar, 1, "replay");
        if let Some(obj) = msg.payload.as_object_mut() {
            obj.remove("high");
        }
        assert_eq!(msg.to_bar(), Err(DataError::MissingField("high".to_string())));
    }
}

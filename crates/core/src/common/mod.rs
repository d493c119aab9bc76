pub mod buffer;
pub mod num;
pub mod shutdown;
pub mod time;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// K 线时间周期枚举，定义单根 Bar 覆盖的时间跨度。
///
/// # Invariants
/// - 序列化形式与 `Display` 一致（如 `"1m"`），便于配置文件与文件名直接书写。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "String", into = "String")]
pub enum TimeFrame {
    // 1秒
    Second1,
    // 1分钟
    #[default]
    Minute1,
    // 5分钟
    Minute5,
    // 15分钟
    Minute15,
    // 1小时
    Hour1,
    // 1日
    Day1,
}

impl TimeFrame {
    /// # Summary
    /// 返回该周期对应的时间跨度。
    pub fn duration(&self) -> chrono::Duration {
        match self {
            TimeFrame::Second1 => chrono::Duration::seconds(1),
            TimeFrame::Minute1 => chrono::Duration::minutes(1),
            TimeFrame::Minute5 => chrono::Duration::minutes(5),
            TimeFrame::Minute15 => chrono::Duration::minutes(15),
            TimeFrame::Hour1 => chrono::Duration::hours(1),
            TimeFrame::Day1 => chrono::Duration::days(1),
        }
    }
}

impl FromStr for TimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1s" | "second1" => Ok(TimeFrame::Second1),
            "1m" | "1min" | "minute1" => Ok(TimeFrame::Minute1),
            "5m" | "5min" | "minute5" => Ok(TimeFrame::Minute5),
            "15m" | "15min" | "minute15" => Ok(TimeFrame::Minute15),
            "1h" | "hour1" => Ok(TimeFrame::Hour1),
            "1d" | "day1" => Ok(TimeFrame::Day1),
            _ => Err(format!("Unknown TimeFrame: {}", s)),
        }
    }
}

impl TryFrom<String> for TimeFrame {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeFrame> for String {
    fn from(value: TimeFrame) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeFrame::Second1 => write!(f, "1s"),
            TimeFrame::Minute1 => write!(f, "1m"),
            TimeFrame::Minute5 => write!(f, "5m"),
            TimeFrame::Minute15 => write!(f, "15m"),
            TimeFrame::Hour1 => write!(f, "1h"),
            TimeFrame::Day1 => write!(f, "1d"),
        }
    }
}

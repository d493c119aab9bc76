use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use harness_core::common::num::{round_to_i64, signed_to_f64};

/// 整数时间戳大于该值时按毫秒解释，否则按秒解释
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// # Summary
/// 经过别名归一化后的标准列。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Timestamp,
    Open,
    High,
    Low,
    Close,
    Volume,
    Symbol,
}

/// # Summary
/// 将原始列名映射为标准列。
///
/// # Logic
/// 1. 去除首尾空白并转为小写，空格与连字符统一为下划线。
/// 2. 按别名表匹配；无法识别的列返回 None 并被忽略。
pub fn normalize_header(raw: &str) -> Option<Column> {
    let key: String = raw
        .trim()
        .trim_matches('"')
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    match key.as_str() {
        "timestamp" | "timestamp_utc" | "time" | "date" | "datetime" | "date_time" | "ts"
        | "open_time" | "opentime" | "t" => Some(Column::Timestamp),
        "open" | "o" | "open_price" | "opening_price" => Some(Column::Open),
        "high" | "h" | "high_price" | "max" => Some(Column::High),
        "low" | "l" | "low_price" | "min" => Some(Column::Low),
        "close" | "c" | "close_price" | "closing_price" | "last" | "last_price" => {
            Some(Column::Close)
        }
        "volume" | "vol" | "v" | "qty" | "quantity" | "base_volume" => Some(Column::Volume),
        "symbol" | "ticker" | "code" | "instrument" | "pair" => Some(Column::Symbol),
        _ => None,
    }
}

/// # Summary
/// 将整数时间戳按量级自动识别单位。
///
/// # Logic
/// 绝对值大于 1e12 视为毫秒，否则视为秒。
pub fn timestamp_from_integer(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// # Summary
/// 解析字符串形式的时间戳。
///
/// # Logic
/// 1. 纯整数：按量级识别秒/毫秒。
/// 2. 浮点数：同样按量级识别，保留毫秒精度。
/// 3. RFC 3339，带时区偏移的 `%Y-%m-%d %H:%M:%S%z`。
/// 4. 无时区的常见格式按 UTC 解释；纯日期取当日零点。
///
/// # Returns
/// 无法识别时返回 None。
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(n) = value.parse::<i64>() {
        return timestamp_from_integer(n);
    }
    if let Ok(f) = value.parse::<f64>() {
        if !f.is_finite() {
            return None;
        }
        let millis = if f.abs() > signed_to_f64(MILLIS_THRESHOLD) {
            f
        } else {
            f * 1000.0
        };
        return round_to_i64(millis).and_then(DateTime::from_timestamp_millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// 解析数值列，允许千分位逗号
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_aliases() {
        assert_eq!(normalize_header(" Open Time "), Some(Column::Timestamp));
        assert_eq!(normalize_header("Close-Price"), Some(Column::Close));
        assert_eq!(normalize_header("VOL"), Some(Column::Volume));
        assert_eq!(normalize_header("Ticker"), Some(Column::Symbol));
        assert_eq!(normalize_header("adj_close"), None);
    }

    #[test]
    fn test_integer_unit_detection() {
        let secs = parse_timestamp("1704067200").unwrap();
        let millis = parse_timestamp("1704067200000").unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_string_formats() {
        let expected = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(parse_timestamp("2024-01-01 00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 08:00:00+0800"), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
    }

    #[test]
    fn test_parse_number_strips_separators() {
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }
}

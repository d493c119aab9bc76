//! 计数、比值与等待时长之间的换算。
//!
//! 工作区禁止裸 `as` 数值转换，需要有损换算的地方统一走这里。

use std::time::Duration;

/// # Summary
/// 计数转浮点。
///
/// # Invariants
/// - 超过 2^53 的计数会丢失低位精度，只用于比率与展示。
#[allow(clippy::cast_precision_loss)]
pub fn count_to_f64(count: u64) -> f64 {
    count as f64
}

/// 有符号量转浮点，用于毫秒、微秒等时间差
#[allow(clippy::cast_precision_loss)]
pub fn signed_to_f64(value: i64) -> f64 {
    value as f64
}

/// `usize` 计数转浮点
pub fn len_to_f64(len: usize) -> f64 {
    count_to_f64(u64::try_from(len).unwrap_or(u64::MAX))
}

/// # Summary
/// `numerator / denominator`，分母为 0 时返回 0。
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    count_to_f64(numerator) / count_to_f64(denominator)
}

/// # Summary
/// 毫秒数（浮点）转等待时长。
///
/// # Logic
/// 1. 非正数与 NaN 视为不等待。
/// 2. 超出 `Duration` 可表示范围时取 `Duration::MAX`，由调用方的取消分支打断。
pub fn wait_from_millis(millis: f64) -> Duration {
    if millis.is_nan() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
}

/// # Summary
/// 浮点向上取整后转为下标，负数与 NaN 取 0，越界取 `usize::MAX`。
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn ceil_to_index(value: f64) -> usize {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    // `as` 对浮点到整数是饱和转换
    value.ceil() as usize
}

/// # Summary
/// 浮点四舍五入为 `i64`，用于时间戳换算；非有限值返回 `None`。
#[allow(clippy::cast_possible_truncation)]
pub fn round_to_i64(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_handles_zero_denominator() {
        assert_eq!(ratio(5, 0), 0.0);
        assert!((ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wait_saturates_instead_of_panicking() {
        assert_eq!(wait_from_millis(-3.0), Duration::ZERO);
        assert_eq!(wait_from_millis(f64::NAN), Duration::ZERO);
        assert_eq!(wait_from_millis(f64::INFINITY), Duration::MAX);
        assert_eq!(wait_from_millis(1e300), Duration::MAX);
        assert_eq!(wait_from_millis(1500.0), Duration::from_millis(1500));
    }

    #[test]
    fn test_float_to_integer_conversions() {
        assert_eq!(ceil_to_index(2.1), 3);
        assert_eq!(ceil_to_index(-1.0), 0);
        assert_eq!(round_to_i64(1.6), Some(2));
        assert_eq!(round_to_i64(f64::NAN), None);
    }
}

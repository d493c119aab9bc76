use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// # Summary
/// 时间供给器接口，隔离物理时钟与回放时钟。
/// 策略与监控在需要“当前行情时间”时必须通过此接口获取。
pub trait TimeProvider: Send + Sync {
    /// 获取当前挂载的时间
    fn now(&self) -> DateTime<Utc>;
}

/// # Summary
/// 直接返回操作系统当前时间的真实时钟。
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 回放时钟，由数据推送器在每次推送时拨到当前记录的时间戳。
///
/// # Invariants
/// - 并发安全：内部利用 `RwLock` 提供多线程读写。
/// - 尚未推送任何记录时返回构造时给定的初始时间。
pub struct ReplayClock {
    current_time: RwLock<DateTime<Utc>>,
}

impl ReplayClock {
    /// 使用指定的初始时间创建回放时钟
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// 将时钟拨到给定时间（允许回退，跳转时会发生）
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self
            .current_time
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *time = new_time;
    }
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl TimeProvider for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_replay_clock_follows_set_time() {
        let clock = ReplayClock::default();
        assert_eq!(clock.now(), DateTime::<Utc>::UNIX_EPOCH);

        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        clock.set_time(t);
        assert_eq!(clock.now(), t);
    }
}

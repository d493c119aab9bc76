use crate::common::num::{ceil_to_index, len_to_f64};
use serde::{Deserialize, Serialize};

/// # Summary
/// 固定容量的滚动环形缓冲区，用于延迟采样与监控快照历史。
///
/// # Invariants
/// - 内存空间在初始化时一次性分配，后续不再扩容。
/// - 始终只保留最近 `capacity` 个元素，`to_vec` 按插入顺序返回。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RollingBuffer<T> {
    // 内部存储容器
    data: Vec<T>,
    // 最大容量
    capacity: usize,
    // 下一次覆盖的位置（仅在满载后生效）
    cursor: usize,
    // 累计写入次数（含被覆盖的）
    total_pushed: u64,
}

impl<T: Clone> RollingBuffer<T> {
    /// # Summary
    /// 创建一个新的滚动缓冲区，容量至少为 1。
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
            total_pushed: 0,
        }
    }

    /// # Summary
    /// 写入新元素，满载时覆盖最旧的元素。
    pub fn push(&mut self, item: T) {
        self.total_pushed += 1;
        if self.data.len() < self.capacity {
            self.data.push(item);
        } else {
            self.data[self.cursor] = item;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    /// # Summary
    /// 获取最新写入的元素。
    pub fn last(&self) -> Option<T> {
        if self.data.len() < self.capacity {
            return self.data.last().cloned();
        }
        let last_idx = if self.cursor == 0 {
            self.capacity - 1
        } else {
            self.cursor - 1
        };
        self.data.get(last_idx).cloned()
    }

    /// # Summary
    /// 按插入顺序返回当前保留的全部元素。
    pub fn to_vec(&self) -> Vec<T> {
        if self.data.len() < self.capacity {
            return self.data.clone();
        }
        let mut result = Vec::with_capacity(self.capacity);
        result.extend(self.data[self.cursor..].iter().cloned());
        result.extend(self.data[..self.cursor].iter().cloned());
        result
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 累计写入次数，包括已被覆盖的元素
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

impl RollingBuffer<f64> {
    /// # Summary
    /// 计算窗口内样本的分位数（最近秩法）。
    ///
    /// # Arguments
    /// * `q`: 分位点，取值 [0, 1]，越界会被截断。
    ///
    /// # Returns
    /// 窗口为空时返回 `None`。
    pub fn percentile(&self, q: f64) -> Option<f64> {
        let mut sorted: Vec<f64> = self.data.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let q = q.clamp(0.0, 1.0);
        let rank = ceil_to_index(q * len_to_f64(sorted.len()));
        let idx = rank.saturating_sub(1).min(sorted.len() - 1);
        sorted.get(idx).copied()
    }

    /// 窗口内样本均值
    pub fn mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        Some(self.data.iter().sum::<f64>() / len_to_f64(self.data.len()))
    }

    /// 窗口内最大值
    pub fn max(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_overwrites_oldest() {
        let mut buf = RollingBuffer::new(3);
        for i in 1..=5 {
            buf.push(i);
        }
        assert_eq!(buf.to_vec(), vec![3, 4, 5]);
        assert_eq!(buf.last(), Some(5));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.total_pushed(), 5);
    }

    #[test]
    fn test_percentiles() {
        let mut buf = RollingBuffer::new(100);
        for i in 1..=100 {
            buf.push(i as f64);
        }
        assert_eq!(buf.percentile(0.5), Some(50.0));
        assert_eq!(buf.percentile(0.95), Some(95.0));
        assert_eq!(buf.percentile(0.99), Some(99.0));
        assert_eq!(buf.max(), Some(100.0));
        assert_eq!(buf.mean(), Some(50.5));
        assert_eq!(RollingBuffer::<f64>::new(4).percentile(0.5), None);
    }
}

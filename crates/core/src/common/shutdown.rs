use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// # Summary
/// 组件内所有后台循环共享的停止信号。
///
/// # Invariants
/// - 触发后所有 `wait`/`sleep` 立即返回，循环应在下一个等待点退出。
/// - 克隆体共享同一信号源。
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// 触发停止，重复调用无副作用
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// 清除停止标记，供组件重新启动
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// # Summary
    /// 挂起直到停止信号被触发。
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // 发送端随 self 存活，关闭分支视同已停止
        if let Err(e) = rx.wait_for(|stopped| *stopped).await {
            tracing::debug!("Stop signal sender closed: {}", e);
        }
    }

    /// # Summary
    /// 可被停止信号打断的睡眠。
    ///
    /// # Returns
    /// 完整睡满返回 `true`，被停止信号打断返回 `false`。
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_interrupted_by_trigger() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();
        let completed = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
        assert!(stop.is_triggered());
    }

    #[tokio::test]
    async fn test_reset_allows_full_sleep() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(!stop.sleep(Duration::from_millis(5)).await);
        stop.reset();
        assert!(stop.sleep(Duration::from_millis(5)).await);
    }
}

use dashmap::DashMap;
use harness_core::common::shutdown::StopSignal;
use harness_core::config::FaultConfig;
use harness_core::fault::entity::{CorruptionKind, FaultCounts, FaultKind, SimulatedException};
use harness_core::fault::error::FaultError;
use harness_core::fault::port::{FaultHandler, FaultInjector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::corruption;

// 停止时等待单个循环退出的上限
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct SimulatorInner {
    config: FaultConfig,
    rng: Mutex<StdRng>,
    history: Mutex<Vec<SimulatedException>>,
    // 当前生效的故障，值为故障记录 ID
    active: DashMap<FaultKind, String>,
    // 当前网络延迟（毫秒），0 表示无
    delay_ms: AtomicU64,
    disconnected: AtomicBool,
    // 数据损坏故障触发后，下一条记录被损坏
    corruption_armed: AtomicBool,
    forced_corruption: AtomicBool,
    handlers: RwLock<HashMap<FaultKind, Vec<Arc<dyn FaultHandler>>>>,
    counts: Mutex<FaultCounts>,
    stop: StopSignal,
}

/// # Summary
/// 故障模拟器：按配置在后台独立运行四类故障循环，并向发送路径暴露同步的注入查询。
///
/// # Invariants
/// - 每次触发都会追加一条 `SimulatedException`，历史只追加不删除。
/// - 持续型故障在持续时间结束（或停止）后清除生效标记并标为已恢复。
/// - 所有等待都与停止信号竞争，`stop()` 的延迟受一个调度周期约束。
pub struct ExceptionSimulator {
    inner: Arc<SimulatorInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExceptionSimulator {
    /// # Summary
    /// 校验配置并创建模拟器；`seed` 为空时随机源取自操作系统。
    pub fn new(config: FaultConfig) -> Result<Self, FaultError> {
        config
            .validate()
            .map_err(|e| FaultError::InvalidConfig(e.to_string()))?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            inner: Arc::new(SimulatorInner {
                config,
                rng: Mutex::new(rng),
                history: Mutex::new(Vec::new()),
                active: DashMap::new(),
                delay_ms: AtomicU64::new(0),
                disconnected: AtomicBool::new(false),
                corruption_armed: AtomicBool::new(false),
                forced_corruption: AtomicBool::new(false),
                handlers: RwLock::new(HashMap::new()),
                counts: Mutex::new(FaultCounts::default()),
                stop: StopSignal::new(),
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// 为某类故障注册处理器，触发与恢复时按注册顺序 await
    pub fn register_handler(&self, kind: FaultKind, handler: Arc<dyn FaultHandler>) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// 为所有故障类别注册同一个处理器
    pub fn register_handler_all(&self, handler: Arc<dyn FaultHandler>) {
        for kind in FaultKind::ALL {
            self.register_handler(kind, handler.clone());
        }
    }

    /// # Summary
    /// 启动所有已启用的故障循环。
    ///
    /// # Returns
    /// 已在运行时返回 `FaultError::AlreadyRunning`。
    pub fn start(&self) -> Result<(), FaultError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return Err(FaultError::AlreadyRunning);
        }
        self.inner.stop.reset();

        let cfg = &self.inner.config;
        if cfg.network_delay.enabled {
            tasks.push(tokio::spawn(network_delay_loop(self.inner.clone())));
        }
        if cfg.disconnect.enabled {
            tasks.push(tokio::spawn(disconnect_loop(self.inner.clone())));
        }
        if cfg.corruption.enabled {
            tasks.push(tokio::spawn(corruption_loop(self.inner.clone())));
        }
        if cfg.strategy_error.enabled {
            tasks.push(tokio::spawn(strategy_error_loop(self.inner.clone())));
        }
        info!("ExceptionSimulator started with {} fault loops", tasks.len());
        Ok(())
    }

    /// # Summary
    /// 停止所有循环并等待其退出，未到期的持续型故障会被立即恢复。幂等。
    pub async fn stop(&self) {
        self.inner.stop.trigger();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!("Fault loop did not exit within {JOIN_TIMEOUT:?}, aborting");
                abort.abort();
            }
        }
        self.inner.delay_ms.store(0, Ordering::SeqCst);
        self.inner.disconnected.store(false, Ordering::SeqCst);
        self.inner.corruption_armed.store(false, Ordering::SeqCst);
        info!("ExceptionSimulator stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// # Summary
    /// 立即触发一次故障并走完整个生命周期（通知、持续、恢复）。
    ///
    /// # Arguments
    /// * `hold`: 持续型故障的持续时间，策略错误为自动恢复前的等待时间。
    pub async fn inject(
        &self,
        kind: FaultKind,
        description: &str,
        hold: Duration,
    ) -> SimulatedException {
        self.inner.fire(kind, description.to_string(), hold).await
    }

    /// 测试用：强制 `should_corrupt_data` 恒为真
    pub fn force_corruption(&self, forced: bool) {
        self.inner.forced_corruption.store(forced, Ordering::SeqCst);
    }

    /// 当前生效的故障类别（有序）
    pub fn active_faults(&self) -> Vec<FaultKind> {
        let mut kinds: Vec<FaultKind> = self.inner.active.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    pub fn history(&self) -> Vec<SimulatedException> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn stats(&self) -> FaultCounts {
        self.inner
            .counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl FaultInjector for ExceptionSimulator {
    fn network_delay(&self) -> Option<Duration> {
        match self.inner.delay_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::SeqCst)
    }

    fn should_corrupt_data(&self) -> bool {
        self.inner.forced_corruption.load(Ordering::SeqCst)
            || self.inner.corruption_armed.swap(false, Ordering::SeqCst)
    }

    fn corrupt_data(&self, payload: &mut Value) -> Option<CorruptionKind> {
        let kind = {
            let mut rng = self.inner.rng.lock().unwrap_or_else(|e| e.into_inner());
            corruption::corrupt(&mut *rng, payload)?
        };
        self.inner
            .counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .corrupted_records += 1;
        Some(kind)
    }
}

impl SimulatorInner {
    fn random_ms(&self, min: u64, max: u64) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Duration::from_millis(rng.random_range(min..=max))
    }

    fn roll(&self, probability: f64) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random_bool(probability.clamp(0.0, 1.0))
    }

    fn handlers_for(&self, kind: FaultKind) -> Vec<Arc<dyn FaultHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn set_effect(&self, kind: FaultKind, hold: Duration, on: bool) {
        match kind {
            FaultKind::NetworkDelay => {
                let ms = if on {
                    u64::try_from(hold.as_millis()).unwrap_or(u64::MAX).max(1)
                } else {
                    0
                };
                self.delay_ms.store(ms, Ordering::SeqCst);
            }
            FaultKind::Disconnect => self.disconnected.store(on, Ordering::SeqCst),
            FaultKind::DataCorruption => {
                if on {
                    self.corruption_armed.store(true, Ordering::SeqCst);
                }
            }
            FaultKind::StrategyError => {}
        }
    }

    /// # Summary
    /// 故障生命周期。
    ///
    /// # Logic
    /// 1. 创建记录、追加历史、标记生效、计数并施加效果。
    /// 2. 依次 await 该类别的 `on_fault` 处理器。
    /// 3. 等待 `hold`（可被停止信号打断）。
    /// 4. 清除效果与生效标记，标为已恢复并 await `on_recover`。
    async fn fire(&self, kind: FaultKind, description: String, hold: Duration) -> SimulatedException {
        let hold_ms = u64::try_from(hold.as_millis()).unwrap_or(u64::MAX);
        let mut exception = SimulatedException::new(kind, description, hold_ms);

        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(exception.clone());
        self.active.insert(kind, exception.id.clone());
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(kind);
        self.set_effect(kind, hold, true);
        warn!("Injected {kind} fault: {}", exception.description);

        let handlers = self.handlers_for(kind);
        for handler in &handlers {
            handler.on_fault(&exception).await;
        }

        if !hold.is_zero() {
            self.stop.sleep(hold).await;
        }

        self.set_effect(kind, hold, false);
        self.active
            .remove_if(&kind, |_, id| *id == exception.id);
        exception.mark_recovered();
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = history.iter_mut().rev().find(|e| e.id == exception.id) {
                entry.mark_recovered();
            }
        }
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recovered += 1;
        debug!("{kind} fault {} recovered", exception.id);

        for handler in &handlers {
            handler.on_recover(&exception).await;
        }
        exception
    }
}

async fn network_delay_loop(inner: Arc<SimulatorInner>) {
    let cfg = inner.config.network_delay.clone();
    loop {
        let wait = inner.random_ms(cfg.check_min_ms, cfg.check_max_ms);
        if !inner.stop.sleep(wait).await {
            break;
        }
        if !inner.roll(cfg.probability) {
            continue;
        }
        let delay = inner.random_ms(cfg.min_delay_ms, cfg.max_delay_ms);
        inner
            .fire(
                FaultKind::NetworkDelay,
                format!("network delay of {}ms", delay.as_millis()),
                delay,
            )
            .await;
    }
    debug!("Network delay loop exited");
}

async fn disconnect_loop(inner: Arc<SimulatorInner>) {
    let cfg = inner.config.disconnect.clone();
    loop {
        if !inner.stop.sleep(Duration::from_millis(cfg.interval_ms)).await {
            break;
        }
        inner
            .fire(
                FaultKind::Disconnect,
                format!("connection dropped for {}ms", cfg.duration_ms),
                Duration::from_millis(cfg.duration_ms),
            )
            .await;
    }
    debug!("Disconnect loop exited");
}

async fn corruption_loop(inner: Arc<SimulatorInner>) {
    let cfg = inner.config.corruption.clone();
    loop {
        let wait = inner.random_ms(cfg.check_min_ms, cfg.check_max_ms);
        if !inner.stop.sleep(wait).await {
            break;
        }
        if !inner.roll(cfg.probability) {
            continue;
        }
        inner
            .fire(
                FaultKind::DataCorruption,
                "next record will be corrupted".to_string(),
                Duration::ZERO,
            )
            .await;
    }
    debug!("Corruption loop exited");
}

async fn strategy_error_loop(inner: Arc<SimulatorInner>) {
    let cfg = inner.config.strategy_error.clone();
    loop {
        let wait = inner.random_ms(cfg.check_min_ms, cfg.check_max_ms);
        if !inner.stop.sleep(wait).await {
            break;
        }
        if !inner.roll(cfg.probability) {
            continue;
        }
        let recovery = inner.random_ms(cfg.recovery_min_ms, cfg.recovery_max_ms);
        inner
            .fire(
                FaultKind::StrategyError,
                format!("simulated strategy error, recovering in {}ms", recovery.as_millis()),
                recovery,
            )
            .await;
    }
    debug!("Strategy error loop exited");
}

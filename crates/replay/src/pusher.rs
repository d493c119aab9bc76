use chrono::{DateTime, Utc};
use futures::FutureExt;
use harness_core::common::num::{count_to_f64, len_to_f64, signed_to_f64, wait_from_millis};
use harness_core::common::time::ReplayClock;
use harness_core::config::ReplayConfig;
use harness_core::fault::port::FaultInjector;
use harness_core::market::entity::{Bar, MarketDataMessage};
use harness_core::market::port::MarketDataConsumer;
use harness_core::replay::entity::{PushMode, PushState, PushStats};
use harness_core::replay::error::ReplayError;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// 扇出延迟 EMA 的历史权重
const LATENCY_EMA_WEIGHT: f64 = 0.9;

#[derive(Default)]
struct Counters {
    pushed: u64,
    corrupted: u64,
    delayed: u64,
    consumer_errors: u64,
    ema_latency_ms: Option<f64>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

struct PusherInner {
    config: ReplayConfig,
    records: RwLock<Arc<Vec<Bar>>>,
    cursor: AtomicUsize,
    speed: Mutex<f64>,
    consumers: RwLock<Vec<Arc<dyn MarketDataConsumer>>>,
    injector: RwLock<Option<Arc<dyn FaultInjector>>>,
    state_tx: watch::Sender<PushState>,
    // 倍速变更或跳转时递增，用于打断正在进行的等待
    control_tx: watch::Sender<u64>,
    // 启动或跳转后的第一条记录不等待
    skip_next_delay: AtomicBool,
    clock: Arc<ReplayClock>,
    counters: Mutex<Counters>,
    sequence: AtomicU64,
}

/// # Summary
/// DataPusher：把一条或多条按时间合并排序的历史序列，以可控倍速推送给注册的消费者。
///
/// # Invariants
/// - 推送顺序严格遵循合并后的时间顺序（同时间戳保持加载顺序）。
/// - 消费者按注册顺序逐条接收，单个消费者的错误只记录不会中断循环。
/// - 每推送一条记录前，先把回放时钟拨到该记录时间。
/// - 进度百分比始终位于 [0, 100]。
pub struct DataPusher {
    inner: Arc<PusherInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DataPusher {
    /// # Summary
    /// 以回放配置创建推送器，初始状态为 `Idle`。
    ///
    /// # Returns
    /// 倍速非有限正数或批大小为 0 时返回错误。
    pub fn new(config: ReplayConfig) -> Result<Self, ReplayError> {
        validate_speed(config.speed)?;
        if config.batch_size == 0 {
            return Err(ReplayError::InvalidBatchSize(0));
        }
        let (state_tx, _) = watch::channel(PushState::Idle);
        let (control_tx, _) = watch::channel(0u64);
        let speed = config.speed;
        Ok(Self {
            inner: Arc::new(PusherInner {
                config,
                records: RwLock::new(Arc::new(Vec::new())),
                cursor: AtomicUsize::new(0),
                speed: Mutex::new(speed),
                consumers: RwLock::new(Vec::new()),
                injector: RwLock::new(None),
                state_tx,
                control_tx,
                skip_next_delay: AtomicBool::new(true),
                clock: Arc::new(ReplayClock::default()),
                counters: Mutex::new(Counters::default()),
                sequence: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        })
    }

    /// # Summary
    /// 加载一条或多条序列，按时间稳定合并后替换当前数据并把游标归零。
    ///
    /// # Returns
    /// 合并后的记录总数；运行或暂停中调用返回 `InvalidState`。
    pub fn load(&self, sequences: Vec<Vec<Bar>>) -> Result<usize, ReplayError> {
        let state = self.state();
        if state.is_active() || state == PushState::Stopping {
            return Err(ReplayError::InvalidState(state));
        }

        let mut merged: Vec<Bar> = sequences.into_iter().flatten().collect();
        merged.sort_by_key(|bar| bar.timestamp);
        let total = merged.len();

        if let Some(first) = merged.first() {
            self.inner.clock.set_time(first.timestamp);
        }
        *self
            .inner
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(merged);
        self.reset_progress();
        self.inner.state_tx.send_replace(PushState::Idle);

        info!("DataPusher loaded {total} records");
        Ok(total)
    }

    /// 注册消费者，推送时按注册顺序调用
    pub fn add_consumer(&self, consumer: Arc<dyn MarketDataConsumer>) {
        debug!("DataPusher registered consumer [{}]", consumer.name());
        self.inner
            .consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(consumer);
    }

    pub fn consumer_count(&self) -> usize {
        self.inner
            .consumers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// 挂载故障注入器，之后的每条记录都会经过延迟与损坏检查
    pub fn set_fault_injector(&self, injector: Arc<dyn FaultInjector>) {
        *self
            .inner
            .injector
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(injector);
    }

    /// # Summary
    /// 启动推送循环。
    ///
    /// # Logic
    /// 1. 仅允许从 `Idle` 或 `Stopped` 启动；`Stopped` 会从当前游标继续。
    /// 2. `Completed`/`Error` 需先 `reset()` 才能再次启动。
    /// 3. 必须在 tokio 运行时内调用。
    pub fn start(&self) -> Result<(), ReplayError> {
        let mut started = false;
        self.inner.state_tx.send_if_modified(|state| match state {
            PushState::Idle | PushState::Stopped => {
                *state = PushState::Running;
                started = true;
                true
            }
            _ => false,
        });
        if !started {
            return Err(ReplayError::InvalidState(self.state()));
        }

        self.inner.skip_next_delay.store(true, Ordering::SeqCst);
        {
            let mut counters = self
                .inner
                .counters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            counters.started_at = Some(Utc::now());
            counters.stopped_at = None;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(run_loop(inner.clone()))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!("DataPusher loop panicked");
                inner.finish(PushState::Error);
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(
            "DataPusher started at cursor {} ({:?}, speed {})",
            self.inner.cursor.load(Ordering::SeqCst),
            self.inner.config.mode,
            self.speed()
        );
        Ok(())
    }

    /// 暂停推送，非运行态下为空操作；返回是否发生了状态变化
    pub fn pause(&self) -> bool {
        let changed = self.inner.state_tx.send_if_modified(|state| {
            if *state == PushState::Running {
                *state = PushState::Paused;
                true
            } else {
                false
            }
        });
        if changed {
            info!("DataPusher paused");
        }
        changed
    }

    /// 恢复推送，非暂停态下为空操作；返回是否发生了状态变化
    pub fn resume(&self) -> bool {
        let changed = self.inner.state_tx.send_if_modified(|state| {
            if *state == PushState::Paused {
                *state = PushState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            info!("DataPusher resumed");
        }
        changed
    }

    /// # Summary
    /// 停止推送并等待循环退出，幂等。
    ///
    /// # Logic
    /// 1. 活动态切换为 `Stopping`，唤醒循环中的等待。
    /// 2. 等待循环任务退出后置为 `Stopped`；循环已自行完成时保留其终止态。
    pub async fn stop(&self) {
        let requested = self.inner.state_tx.send_if_modified(|state| {
            if state.is_active() {
                *state = PushState::Stopping;
                true
            } else {
                false
            }
        });

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("DataPusher loop task ended abnormally: {e}");
            self.inner.finish(PushState::Error);
        }

        if requested {
            let stopped = self.inner.state_tx.send_if_modified(|state| {
                if *state == PushState::Stopping {
                    *state = PushState::Stopped;
                    true
                } else {
                    false
                }
            });
            if stopped {
                self.inner
                    .counters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .stopped_at = Some(Utc::now());
                info!(
                    "DataPusher stopped at cursor {}",
                    self.inner.cursor.load(Ordering::SeqCst)
                );
            }
        }
    }

    /// # Summary
    /// 把终止态推送器恢复为 `Idle` 并清空进度，已加载数据保留。
    pub fn reset(&self) -> Result<(), ReplayError> {
        let state = self.state();
        if state.is_active() || state == PushState::Stopping {
            return Err(ReplayError::InvalidState(state));
        }
        self.reset_progress();
        if let Some(first) = self.records().first() {
            self.inner.clock.set_time(first.timestamp);
        }
        self.inner.state_tx.send_replace(PushState::Idle);
        Ok(())
    }

    /// 运行时调整倍速，立即作用于当前等待
    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        validate_speed(speed)?;
        *self.inner.speed.lock().unwrap_or_else(|e| e.into_inner()) = speed;
        self.inner.control_tx.send_modify(|epoch| *epoch += 1);
        info!("DataPusher speed set to {speed}");
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        *self.inner.speed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Summary
    /// 把游标移动到指定索引，下一条推送的即为该索引处的记录。
    ///
    /// # Returns
    /// 索引大于记录总数时返回 `IndexOutOfRange`；等于总数表示跳到末尾。
    pub fn jump_to_index(&self, index: usize) -> Result<(), ReplayError> {
        let records = self.records();
        if index > records.len() {
            return Err(ReplayError::IndexOutOfRange {
                index,
                len: records.len(),
            });
        }
        self.seek(index, &records);
        Ok(())
    }

    /// # Summary
    /// 跳到第一条时间不早于 `time` 的记录。
    ///
    /// # Returns
    /// 跳转后的游标位置；晚于所有记录时为记录总数。
    pub fn jump_to_time(&self, time: DateTime<Utc>) -> usize {
        let records = self.records();
        let index = records.partition_point(|bar| bar.timestamp < time);
        self.seek(index, &records);
        index
    }

    pub fn state(&self) -> PushState {
        *self.inner.state_tx.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe_state(&self) -> watch::Receiver<PushState> {
        self.inner.state_tx.subscribe()
    }

    /// 等待推送器进入终止态并返回该状态
    pub async fn wait_until_finished(&self) -> PushState {
        let mut rx = self.inner.state_tx.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// 推送器驱动的回放时钟
    pub fn clock(&self) -> Arc<ReplayClock> {
        self.inner.clock.clone()
    }

    pub fn total(&self) -> usize {
        self.records().len()
    }

    /// # Summary
    /// 汇总当前推送统计。
    pub fn stats(&self) -> PushStats {
        let total = self.total();
        let cursor = self.inner.cursor.load(Ordering::SeqCst).min(total);
        let state = self.state();
        let counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let progress_percent = if total == 0 {
            if state == PushState::Completed { 100.0 } else { 0.0 }
        } else {
            (len_to_f64(cursor) / len_to_f64(total) * 100.0).clamp(0.0, 100.0)
        };

        let push_rate = match counters.started_at {
            Some(started) => {
                let end = counters.stopped_at.unwrap_or_else(Utc::now);
                let secs = signed_to_f64((end - started).num_milliseconds()) / 1000.0;
                if secs > 0.0 { count_to_f64(counters.pushed) / secs } else { 0.0 }
            }
            None => 0.0,
        };

        PushStats {
            state,
            total,
            pushed: counters.pushed,
            cursor,
            progress_percent,
            corrupted: counters.corrupted,
            delayed: counters.delayed,
            consumer_errors: counters.consumer_errors,
            avg_latency_ms: counters.ema_latency_ms.unwrap_or(0.0),
            push_rate,
            speed: self.speed(),
            started_at: counters.started_at,
            stopped_at: counters.stopped_at,
        }
    }

    fn records(&self) -> Arc<Vec<Bar>> {
        self.inner
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn seek(&self, index: usize, records: &[Bar]) {
        self.inner.cursor.store(index, Ordering::SeqCst);
        self.inner.skip_next_delay.store(true, Ordering::SeqCst);
        if let Some(bar) = records.get(index) {
            self.inner.clock.set_time(bar.timestamp);
        }
        self.inner.control_tx.send_modify(|epoch| *epoch += 1);
        info!("DataPusher jumped to index {index}");
    }

    fn reset_progress(&self) {
        self.inner.cursor.store(0, Ordering::SeqCst);
        self.inner.sequence.store(0, Ordering::SeqCst);
        self.inner.skip_next_delay.store(true, Ordering::SeqCst);
        *self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Counters::default();
    }
}

fn validate_speed(speed: f64) -> Result<(), ReplayError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(ReplayError::InvalidSpeed(speed));
    }
    Ok(())
}

/// # Summary
/// 推送主循环。
///
/// # Logic
/// 1. 暂停时挂起直至状态变化；非运行态时退出。
/// 2. 计算下一批之前的等待，等待与状态变化、倍速/跳转信号竞争。
/// 3. 逐条推送本批记录，用 CAS 推进游标；期间发生跳转则放弃剩余部分。
/// 4. 游标耗尽时置为 `Completed`。
async fn run_loop(inner: Arc<PusherInner>) {
    let mut state_rx = inner.state_tx.subscribe();
    let mut control_rx = inner.control_tx.subscribe();
    let records = inner
        .records
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();

    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            PushState::Running => {}
            PushState::Paused => {
                if state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
            _ => break,
        }
        control_rx.borrow_and_update();

        let index = inner.cursor.load(Ordering::SeqCst);
        if index >= records.len() {
            inner.finish(PushState::Completed);
            return;
        }

        let delay = inner.delay_before(index, &records);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = state_rx.changed() => continue,
                _ = control_rx.changed() => continue,
            }
        }

        let end = match inner.config.mode {
            PushMode::RealTime => index + 1,
            PushMode::FixedInterval => (index + inner.config.batch_size).min(records.len()),
        };
        for (position, bar) in records.iter().enumerate().take(end).skip(index) {
            if *inner.state_tx.borrow() != PushState::Running {
                break;
            }
            inner.push_one(bar).await;
            if inner
                .cursor
                .compare_exchange(position, position + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                break;
            }
        }
    }

    debug!("DataPusher loop exited");
}

impl PusherInner {
    fn speed(&self) -> f64 {
        *self.speed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn delay_before(&self, index: usize, records: &[Bar]) -> Duration {
        if self.skip_next_delay.swap(false, Ordering::SeqCst) {
            return Duration::ZERO;
        }
        let speed = self.speed();
        match self.config.mode {
            PushMode::RealTime => {
                let Some(previous) = index.checked_sub(1).and_then(|i| records.get(i)) else {
                    return Duration::ZERO;
                };
                let gap_ms = signed_to_f64(
                    (records[index].timestamp - previous.timestamp)
                        .num_milliseconds()
                        .max(0),
                );
                let mut wait_ms = gap_ms / speed;
                if let Some(cap) = self.config.max_delay_ms {
                    wait_ms = wait_ms.min(count_to_f64(cap));
                }
                wait_from_millis(wait_ms)
            }
            PushMode::FixedInterval => {
                wait_from_millis(count_to_f64(self.config.batch_interval_ms) / speed)
            }
        }
    }

    async fn push_one(&self, bar: &Bar) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.clock.set_time(bar.timestamp);

        let mut message = MarketDataMessage::from_bar(bar, sequence, &self.config.origin);
        let injector = self
            .injector
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        if let Some(injector) = injector {
            if let Some(delay) = injector.network_delay() {
                debug!("Record #{sequence} delayed by {delay:?}");
                self.counters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .delayed += 1;
                let mut state_rx = self.state_tx.subscribe();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = state_rx.wait_for(|state| *state == PushState::Stopping) => {}
                }
            }
            if injector.should_corrupt_data()
                && let Some(kind) = injector.corrupt_data(&mut message.payload)
            {
                warn!(
                    "Record #{sequence} ({}) corrupted with {kind:?}",
                    message.symbol
                );
                self.counters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .corrupted += 1;
            }
        }

        message.sent_at = Utc::now();
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let started = Instant::now();
        let mut failures = 0u64;
        for consumer in &consumers {
            if let Err(e) = consumer.on_market_data(&message).await {
                warn!(
                    "Consumer [{}] failed on record #{sequence}: {e}",
                    consumer.name()
                );
                failures += 1;
            }
        }
        let sample_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.pushed += 1;
        counters.consumer_errors += failures;
        counters.ema_latency_ms = Some(match counters.ema_latency_ms {
            Some(previous) => LATENCY_EMA_WEIGHT * previous + (1.0 - LATENCY_EMA_WEIGHT) * sample_ms,
            None => sample_ms,
        });
    }

    fn finish(&self, terminal: PushState) {
        let changed = self.state_tx.send_if_modified(|state| {
            let allowed = match terminal {
                PushState::Completed => *state == PushState::Running,
                _ => !state.is_terminal(),
            };
            if allowed && *state != terminal {
                *state = terminal;
                true
            } else {
                false
            }
        });
        if !changed {
            return;
        }
        let pushed = {
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            counters.stopped_at = Some(Utc::now());
            counters.pushed
        };
        match terminal {
            PushState::Completed => info!("DataPusher completed, {pushed} records pushed"),
            _ => error!("DataPusher entered {terminal:?} after {pushed} records"),
        }
    }
}

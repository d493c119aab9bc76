use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use harness_core::common::time::TimeProvider;
use harness_core::market::entity::MarketDataMessage;
use harness_core::market::error::DataError;
use harness_core::market::port::MarketDataConsumer;
use harness_core::strategy::entity::{
    StrategyContext, StrategyOutput, WorkerConfig, WorkerState, WorkerStats, WorkerStatus,
};
use harness_core::strategy::error::StrategyError;
use harness_core::strategy::port::{OrderHandler, SignalHandler, Strategy};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::registry::StrategyRegistry;

// 停止 Worker 时等待其处理完积压消息的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// # Summary
/// Manager 层的统一错误类型。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManagerError {
    #[error("Worker not found: {0}")]
    NotFound(String),
    #[error("Worker already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Worker already running: {0}")]
    AlreadyRunning(String),
    #[error("Worker not running: {0}")]
    NotRunning(String),
    #[error("Strategy not found: {identifier} (searched: {searched:?})")]
    StrategyNotFound {
        identifier: String,
        searched: Vec<String>,
    },
    #[error("Strategy error: {0}")]
    Strategy(StrategyError),
}

impl From<StrategyError> for ManagerError {
    fn from(e: StrategyError) -> Self {
        match e {
            StrategyError::NotFound {
                identifier,
                searched,
            } => ManagerError::StrategyNotFound {
                identifier,
                searched,
            },
            other => ManagerError::Strategy(other),
        }
    }
}

/// 信号与订单处理器列表，由所有 Worker 共享
#[derive(Default)]
struct OutputDispatcher {
    signal_handlers: RwLock<Vec<Arc<dyn SignalHandler>>>,
    order_handlers: RwLock<Vec<Arc<dyn OrderHandler>>>,
}

/// # Summary
/// 单个运行中 Worker 的执行单元，可被协程与直接调用共享。
#[derive(Clone)]
struct WorkerUnit {
    worker_id: String,
    strategy_id: String,
    max_errors: Option<u64>,
    status: Arc<Mutex<WorkerStatus>>,
    strategy: Arc<tokio::sync::Mutex<Box<dyn Strategy>>>,
    outputs: Arc<OutputDispatcher>,
}

struct WorkerRuntime {
    unit: WorkerUnit,
    tx: mpsc::UnboundedSender<Arc<MarketDataMessage>>,
    task: JoinHandle<()>,
}

struct WorkerSlot {
    config: WorkerConfig,
    status: Arc<Mutex<WorkerStatus>>,
    runtime: Option<WorkerRuntime>,
}

/// # Summary
/// Worker 管理器：负责策略 Worker 的注册、启动、停止与行情分发。
///
/// # Invariants
/// - 每个运行中的 Worker 拥有独立的无界队列与 tokio 协程，按推送顺序处理消息。
/// - 单个 Worker 的错误或 panic 只计入该 Worker，不影响其他 Worker。
/// - 状态快照只能通过克隆获取。
pub struct WorkerManager {
    registry: Arc<StrategyRegistry>,
    clock: Arc<dyn TimeProvider>,
    workers: DashMap<String, WorkerSlot>,
    outputs: Arc<OutputDispatcher>,
}

impl WorkerManager {
    /// # Summary
    /// 创建管理器。
    ///
    /// # Arguments
    /// * `registry`: 策略注册表。
    /// * `clock`: 注入策略上下文的时钟，通常为推送器的回放时钟。
    pub fn new(registry: Arc<StrategyRegistry>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            registry,
            clock,
            workers: DashMap::new(),
            outputs: Arc::new(OutputDispatcher::default()),
        }
    }

    /// # Summary
    /// 登记 Worker 描述，不启动。
    pub fn register_worker(&self, worker_id: &str, config: WorkerConfig) -> Result<(), ManagerError> {
        if self.workers.contains_key(worker_id) {
            return Err(ManagerError::AlreadyRegistered(worker_id.to_string()));
        }
        let status = WorkerStatus::new(worker_id, &config.strategy_id());
        info!("Registered worker [{worker_id}] -> {}", config.strategy_id());
        self.workers.insert(
            worker_id.to_string(),
            WorkerSlot {
                config,
                status: Arc::new(Mutex::new(status)),
                runtime: None,
            },
        );
        Ok(())
    }

    /// 注销 Worker，运行中的会先被停止
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<(), ManagerError> {
        self.stop_worker(worker_id).await?;
        self.workers.remove(worker_id);
        info!("Unregistered worker [{worker_id}]");
        Ok(())
    }

    /// # Summary
    /// 解析、构造并初始化策略，然后为 Worker 启动独立协程。
    ///
    /// # Logic
    /// 1. 从注册表按候选命名空间解析策略。
    /// 2. 以配置参数构造实例并等待 `initialize`。
    /// 3. 任一步失败时 Worker 进入 `Error` 状态并返回错误。
    /// 4. 成功后创建无界队列与处理协程，状态置为 `Running`。
    pub async fn start_worker(&self, worker_id: &str) -> Result<(), ManagerError> {
        let (config, status) = {
            let slot = self
                .workers
                .get(worker_id)
                .ok_or_else(|| ManagerError::NotFound(worker_id.to_string()))?;
            if slot.runtime.is_some() {
                return Err(ManagerError::AlreadyRunning(worker_id.to_string()));
            }
            (slot.config.clone(), slot.status.clone())
        };
        set_state(&status, WorkerState::Starting);

        let mut strategy = match self.registry.create(
            &config.strategy_module,
            &config.strategy_class,
            &config.params,
        ) {
            Ok(s) => s,
            Err(e) => {
                error!("Worker [{worker_id}] failed to resolve strategy: {e}");
                fail(&status, &e.to_string());
                return Err(e.into());
            }
        };

        let ctx = StrategyContext {
            worker_id: worker_id.to_string(),
            params: config.params.clone(),
            symbols: config.symbols.clone(),
            clock: self.clock.clone(),
        };
        if let Err(e) = strategy.initialize(&ctx).await {
            error!("Worker [{worker_id}] failed to initialize: {e}");
            fail(&status, &e.to_string());
            let e = match e {
                StrategyError::Initialization(_) => e,
                other => StrategyError::Initialization(other.to_string()),
            };
            return Err(e.into());
        }

        let unit = WorkerUnit {
            worker_id: worker_id.to_string(),
            strategy_id: config.strategy_id(),
            max_errors: config.max_errors,
            status: status.clone(),
            strategy: Arc::new(tokio::sync::Mutex::new(strategy)),
            outputs: self.outputs.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(worker_loop(unit.clone(), rx));

        {
            let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
            s.state = WorkerState::Running;
            s.started_at = Some(Utc::now());
            s.stopped_at = None;
        }
        match self.workers.get_mut(worker_id) {
            Some(mut slot) => slot.runtime = Some(WorkerRuntime { unit, tx, task }),
            None => {
                task.abort();
                return Err(ManagerError::NotFound(worker_id.to_string()));
            }
        }

        info!("Worker [{worker_id}] started ({})", config.strategy_id());
        Ok(())
    }

    /// # Summary
    /// 启动所有已启用且未运行的 Worker。
    ///
    /// # Returns
    /// 每个启动失败的 Worker 及其错误；失败不影响其余 Worker。
    pub async fn start_all(&self) -> Vec<(String, ManagerError)> {
        let mut pending: Vec<String> = self
            .workers
            .iter()
            .filter(|e| e.config.enabled && e.runtime.is_none())
            .map(|e| e.key().clone())
            .collect();
        pending.sort();

        let mut failures = Vec::new();
        for worker_id in pending {
            if let Err(e) = self.start_worker(&worker_id).await {
                failures.push((worker_id, e));
            }
        }
        failures
    }

    /// # Summary
    /// 停止 Worker：关闭队列、等待积压消息处理完、调用 `shutdown` 钩子。幂等。
    pub async fn stop_worker(&self, worker_id: &str) -> Result<(), ManagerError> {
        let runtime = {
            let mut slot = self
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| ManagerError::NotFound(worker_id.to_string()))?;
            slot.runtime.take()
        };
        let Some(WorkerRuntime { unit, tx, task }) = runtime else {
            return Ok(());
        };

        drop(tx);
        let abort = task.abort_handle();
        match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Worker [{worker_id}] task ended abnormally: {e}"),
            Err(_) => {
                warn!("Worker [{worker_id}] did not drain within {DRAIN_TIMEOUT:?}, aborting");
                abort.abort();
            }
        }

        let shutdown = {
            let mut strategy = unit.strategy.lock().await;
            AssertUnwindSafe(strategy.shutdown()).catch_unwind().await
        };
        match shutdown {
            Ok(Ok(())) => {}
            Ok(Err(e)) => unit.record_failure(&format!("shutdown: {e}")),
            Err(panic) => unit.record_failure(&format!("shutdown panicked: {}", panic_message(&*panic))),
        }

        {
            let mut s = unit.status.lock().unwrap_or_else(|e| e.into_inner());
            if s.state != WorkerState::Error {
                s.state = WorkerState::Stopped;
            }
            s.stopped_at = Some(Utc::now());
        }
        info!("Worker [{worker_id}] stopped");
        Ok(())
    }

    /// 停止全部 Worker
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for worker_id in ids {
            if let Err(e) = self.stop_worker(&worker_id).await {
                warn!("Failed to stop worker [{worker_id}]: {e}");
            }
        }
    }

    /// # Summary
    /// 把一条行情直接交给指定 Worker 的策略处理，绕过其队列。
    ///
    /// # Returns
    /// 策略的原始输出；策略错误同样会计入该 Worker 的错误数。
    pub async fn handle_market_data(
        &self,
        worker_id: &str,
        data: &MarketDataMessage,
    ) -> Result<StrategyOutput, ManagerError> {
        let unit = {
            let slot = self
                .workers
                .get(worker_id)
                .ok_or_else(|| ManagerError::NotFound(worker_id.to_string()))?;
            match &slot.runtime {
                Some(runtime) => runtime.unit.clone(),
                None => return Err(ManagerError::NotRunning(worker_id.to_string())),
            }
        };
        Ok(unit.process(data).await?)
    }

    /// # Summary
    /// 把一条行情投递到所有订阅了该证券的运行中 Worker 的队列。
    ///
    /// # Returns
    /// 成功投递的 Worker 数量。
    pub fn dispatch(&self, data: &MarketDataMessage) -> usize {
        let message = Arc::new(data.clone());
        let mut delivered = 0;
        for entry in self.workers.iter() {
            let Some(runtime) = &entry.runtime else {
                continue;
            };
            if !entry.config.accepts(&data.symbol) {
                continue;
            }
            if runtime.tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Worker [{}] queue closed, message dropped", entry.key());
            }
        }
        delivered
    }

    pub fn add_signal_handler(&self, handler: Arc<dyn SignalHandler>) {
        self.outputs
            .signal_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    pub fn add_order_handler(&self, handler: Arc<dyn OrderHandler>) {
        self.outputs
            .order_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// # Summary
    /// 注入策略错误：运行中的 Worker 进入 `Faulted`，之后的消息被跳过直到 `recover`。
    pub fn inject_error(&self, worker_id: &str, description: &str) -> Result<(), ManagerError> {
        let status = self.status_handle(worker_id)?;
        let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
        if s.state != WorkerState::Running {
            return Err(ManagerError::NotRunning(worker_id.to_string()));
        }
        s.state = WorkerState::Faulted;
        s.record_error(description);
        warn!("Worker [{worker_id}] faulted: {description}");
        Ok(())
    }

    /// 将 `Faulted` 的 Worker 恢复为 `Running`；其他状态下为空操作
    pub fn recover(&self, worker_id: &str) -> Result<(), ManagerError> {
        let status = self.status_handle(worker_id)?;
        let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
        if s.state == WorkerState::Faulted {
            s.state = WorkerState::Running;
            info!("Worker [{worker_id}] recovered");
        }
        Ok(())
    }

    pub fn worker_status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.workers
            .get(worker_id)
            .map(|slot| slot.status.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// 所有 Worker 的状态快照，按 ID 排序
    pub fn list_workers(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .workers
            .iter()
            .map(|e| e.status.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect();
        statuses.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        statuses
    }

    /// 处于 `Running` 状态的 Worker ID，按 ID 排序
    pub fn running_workers(&self) -> Vec<String> {
        self.list_workers()
            .into_iter()
            .filter(|s| s.state == WorkerState::Running)
            .map(|s| s.worker_id)
            .collect()
    }

    /// 按需汇总的统计
    pub fn worker_stats(&self) -> WorkerStats {
        WorkerStats::from_statuses(&self.list_workers())
    }

    fn status_handle(&self, worker_id: &str) -> Result<Arc<Mutex<WorkerStatus>>, ManagerError> {
        self.workers
            .get(worker_id)
            .map(|slot| slot.status.clone())
            .ok_or_else(|| ManagerError::NotFound(worker_id.to_string()))
    }
}

#[async_trait]
impl MarketDataConsumer for WorkerManager {
    fn name(&self) -> &str {
        "worker-manager"
    }

    async fn on_market_data(&self, message: &MarketDataMessage) -> Result<(), DataError> {
        self.dispatch(message);
        Ok(())
    }
}

async fn worker_loop(unit: WorkerUnit, mut rx: mpsc::UnboundedReceiver<Arc<MarketDataMessage>>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = unit.process(&message).await {
            debug!("[{}] message #{} failed: {e}", unit.worker_id, message.sequence);
        }
    }
    debug!("[{}] queue closed", unit.worker_id);
}

impl WorkerUnit {
    /// # Summary
    /// 处理一条行情消息。
    ///
    /// # Logic
    /// 1. `Faulted` 或 `Error` 状态下跳过并计数。
    /// 2. 在 `catch_unwind` 中调用 `on_data`，panic 转为 `StrategyError::Panicked`。
    /// 3. 成功时校验信号并按顺序分发信号与订单，非法信号计为错误。
    /// 4. 失败时记录错误，超过 `max_errors` 后进入 `Error`。
    async fn process(&self, data: &MarketDataMessage) -> Result<StrategyOutput, StrategyError> {
        {
            let mut s = self.status.lock().unwrap_or_else(|e| e.into_inner());
            match s.state {
                WorkerState::Running => {}
                WorkerState::Faulted | WorkerState::Error => {
                    s.messages_skipped += 1;
                    return Ok(StrategyOutput::None);
                }
                _ => return Ok(StrategyOutput::None),
            }
        }

        let result = {
            let mut strategy = self.strategy.lock().await;
            AssertUnwindSafe(strategy.on_data(data)).catch_unwind().await
        };
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("[{}] strategy error on {}: {e}", self.worker_id, data.symbol);
                self.record_failed_message(&e.to_string());
                return Err(e);
            }
            Err(panic) => {
                let e = StrategyError::Panicked(panic_message(&*panic));
                error!("[{}] strategy panicked on {}: {e}", self.worker_id, data.symbol);
                self.record_failed_message(&e.to_string());
                return Err(e);
            }
        };

        {
            let mut s = self.status.lock().unwrap_or_else(|e| e.into_inner());
            s.messages_processed += 1;
            s.last_heartbeat = Some(Utc::now());
        }
        self.emit(output.clone()).await;
        Ok(output)
    }

    async fn emit(&self, output: StrategyOutput) {
        let (signals, orders) = output.flatten();

        for mut signal in signals {
            if signal.strategy_id.is_empty() {
                signal.strategy_id = self.strategy_id.clone();
            }
            if let Err(e) = signal.validate() {
                warn!("[{}] dropped invalid signal: {e}", self.worker_id);
                self.record_failure(&e.to_string());
                continue;
            }
            self.status
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .signals_emitted += 1;

            let handlers = self
                .outputs
                .signal_handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for handler in handlers.iter().filter(|h| h.matches(&signal)) {
                if let Err(e) = handler.handle_signal(&self.worker_id, &signal).await {
                    warn!("[{}] signal handler failed: {e}", self.worker_id);
                }
            }
        }

        for mut order in orders {
            order.ensure_id();
            order.worker_id = self.worker_id.clone();
            self.status
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .orders_placed += 1;

            let handlers = self
                .outputs
                .order_handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for handler in &handlers {
                if let Err(e) = handler.handle_order(&self.worker_id, &order).await {
                    warn!("[{}] order handler failed: {e}", self.worker_id);
                }
            }
        }
    }

    fn record_failed_message(&self, error: &str) {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .messages_failed += 1;
        self.record_failure(error);
    }

    fn record_failure(&self, error: &str) {
        let mut s = self.status.lock().unwrap_or_else(|e| e.into_inner());
        s.record_error(error);
        if let Some(limit) = self.max_errors
            && s.error_count > limit
            && s.state != WorkerState::Error
        {
            s.state = WorkerState::Error;
            error!(
                "Worker [{}] exceeded max errors ({limit}), marked as error",
                self.worker_id
            );
        }
    }
}

fn set_state(status: &Mutex<WorkerStatus>, state: WorkerState) {
    status.lock().unwrap_or_else(|e| e.into_inner()).state = state;
}

fn fail(status: &Mutex<WorkerStatus>, error: &str) {
    let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
    s.state = WorkerState::Error;
    s.record_error(error);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

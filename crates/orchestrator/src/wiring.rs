//! 组件之间的适配器：把推送、信号、故障事件接到各自的目标上。

use async_trait::async_trait;
use dashmap::DashMap;
use harness_client::EngineClient;
use harness_core::common::time::TimeProvider;
use harness_core::fault::entity::SimulatedException;
use harness_core::fault::port::{FaultHandler, FaultInjector};
use harness_core::market::entity::MarketDataMessage;
use harness_core::market::error::DataError;
use harness_core::market::port::MarketDataConsumer;
use harness_core::report::entity::ProbeReading;
use harness_core::report::port::SnapshotSource;
use harness_core::strategy::entity::{OrderInfo, TradeSignal};
use harness_core::strategy::error::StrategyError;
use harness_core::strategy::port::{OrderHandler, SignalHandler};
use harness_fault::ExceptionSimulator;
use harness_manager::WorkerManager;
use harness_replay::DataPusher;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// # Summary
/// 把行情转发给被测引擎的推送消费者。
///
/// # Invariants
/// - 仅在客户端已连接时发送，独立模式下为空操作。
/// - 断线故障生效期间丢弃消息并计数，不视为消费者错误。
pub struct ClientFeed {
    client: Arc<EngineClient>,
    connected: Arc<AtomicBool>,
    injector: Option<Arc<dyn FaultInjector>>,
    dropped: AtomicU64,
}

impl ClientFeed {
    pub fn new(
        client: Arc<EngineClient>,
        connected: Arc<AtomicBool>,
        injector: Option<Arc<dyn FaultInjector>>,
    ) -> Self {
        Self {
            client,
            connected,
            injector,
            dropped: AtomicU64::new(0),
        }
    }

    /// 因断线故障丢弃的消息数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataConsumer for ClientFeed {
    fn name(&self) -> &str {
        "engine-feed"
    }

    async fn on_market_data(&self, message: &MarketDataMessage) -> Result<(), DataError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(injector) = &self.injector
            && injector.is_disconnected()
        {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            debug!("Simulated disconnect, dropping message #{}", message.sequence);
            return Ok(());
        }
        self.client
            .send_market_data(message)
            .await
            .map_err(|e| DataError::Delivery(e.to_string()))
    }
}

/// # Summary
/// 把 Worker 的信号与订单以 `control` 命令转发给被测引擎。
pub struct EngineForwarder {
    client: Arc<EngineClient>,
    connected: Arc<AtomicBool>,
}

impl EngineForwarder {
    pub fn new(client: Arc<EngineClient>, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }
}

#[async_trait]
impl SignalHandler for EngineForwarder {
    async fn handle_signal(&self, worker_id: &str, signal: &TradeSignal) -> Result<(), StrategyError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let payload = json!({ "worker_id": worker_id, "signal": signal });
        self.client
            .send_control_command("submit_signal", payload)
            .await
            .map_err(|e| StrategyError::Handler(e.to_string()))
    }
}

#[async_trait]
impl OrderHandler for EngineForwarder {
    async fn handle_order(&self, worker_id: &str, order: &OrderInfo) -> Result<(), StrategyError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let payload = json!({ "worker_id": worker_id, "order": order });
        self.client
            .send_control_command("submit_order", payload)
            .await
            .map_err(|e| StrategyError::Handler(e.to_string()))
    }
}

/// # Summary
/// 把策略错误故障落到一个运行中的 Worker 上，恢复时撤销。
///
/// # Invariants
/// - 目标 Worker 按 ID 顺序轮转选择。
/// - 每条故障记录只恢复它自己注入的那个 Worker。
pub struct WorkerFaultBridge {
    manager: Arc<WorkerManager>,
    next: AtomicUsize,
    // 故障 id -> Worker id
    targets: DashMap<String, String>,
}

impl WorkerFaultBridge {
    pub fn new(manager: Arc<WorkerManager>) -> Self {
        Self {
            manager,
            next: AtomicUsize::new(0),
            targets: DashMap::new(),
        }
    }
}

#[async_trait]
impl FaultHandler for WorkerFaultBridge {
    async fn on_fault(&self, exception: &SimulatedException) {
        let running = self.manager.running_workers();
        if running.is_empty() {
            debug!("No running worker to receive strategy error {}", exception.id);
            return;
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % running.len();
        let worker_id = &running[idx];
        match self.manager.inject_error(worker_id, &exception.description) {
            Ok(()) => {
                self.targets.insert(exception.id.clone(), worker_id.clone());
            }
            Err(e) => warn!("Strategy error fault not applied to {worker_id}: {e}"),
        }
    }

    async fn on_recover(&self, exception: &SimulatedException) {
        if let Some((_, worker_id)) = self.targets.remove(&exception.id) {
            match self.manager.recover(&worker_id) {
                Ok(()) => info!("Worker [{worker_id}] released from strategy error fault"),
                Err(e) => warn!("Worker [{worker_id}] recovery failed: {e}"),
            }
        }
    }
}

/// # Summary
/// 监控快照的读数来源，只读地探测各组件。
pub struct RunProbe {
    pusher: Arc<DataPusher>,
    manager: Arc<WorkerManager>,
    simulator: Option<Arc<ExceptionSimulator>>,
    client: Option<Arc<EngineClient>>,
}

impl RunProbe {
    pub fn new(
        pusher: Arc<DataPusher>,
        manager: Arc<WorkerManager>,
        simulator: Option<Arc<ExceptionSimulator>>,
        client: Option<Arc<EngineClient>>,
    ) -> Self {
        Self {
            pusher,
            manager,
            simulator,
            client,
        }
    }
}

impl SnapshotSource for RunProbe {
    fn probe(&self) -> ProbeReading {
        let pusher = self.pusher.stats();
        let market_time = (pusher.pushed > 0).then(|| self.pusher.clock().now());
        ProbeReading {
            market_time,
            pusher: Some(pusher),
            workers: Some(self.manager.worker_stats()),
            active_faults: self
                .simulator
                .as_ref()
                .map(|s| s.active_faults())
                .unwrap_or_default(),
            connection: self
                .client
                .as_ref()
                .map(|c| format!("{:?}", c.state()).to_lowercase()),
        }
    }
}

use crate::error::SimulationError;
use crate::wiring::{ClientFeed, EngineForwarder, RunProbe, WorkerFaultBridge};
use chrono::{DateTime, Utc};
use harness_client::EngineClient;
use harness_core::client::entity::{AuthOutcome, ConnectionState};
use harness_core::common::shutdown::StopSignal;
use harness_core::config::{AppConfig, ConfigError};
use harness_core::fault::entity::FaultKind;
use harness_core::fault::port::FaultInjector;
use harness_core::market::port::{DataSource, MarketDataConsumer};
use harness_core::replay::entity::PushState;
use harness_core::report::entity::{ReportData, SimulationMetrics, StopReason, Verdict};
use harness_fault::ExceptionSimulator;
use harness_manager::{StrategyRegistry, WorkerManager};
use harness_monitor::report::evaluate;
use harness_monitor::{Monitor, ReportFiles, ReportGenerator, RunTotals};
use harness_replay::DataPusher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// # Summary
/// 编排器状态机：`Idle → Running ⇄ Paused → Stopping → Stopped`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// # Summary
/// 一次运行的结果。
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    // connected / standalone
    pub mode: String,
    pub stop_reason: StopReason,
    pub terminal_error: Option<String>,
    pub metrics: SimulationMetrics,
    pub verdict: Verdict,
    // 报告写出失败时为 None
    pub report: Option<ReportFiles>,
}

/// # Summary
/// 模拟运行编排器，独占所有组件。
///
/// # Invariants
/// - 推送消费者顺序固定：引擎转发、Worker 管理器、监控器。
/// - 停止顺序固定：推送器、故障模拟器、监控器、Worker、客户端；`stop` 可重复调用。
/// - 运行结束后无论成败都会尝试生成报告。
pub struct Orchestrator {
    config: AppConfig,
    run_id: String,
    state_tx: watch::Sender<SimulationState>,
    pusher: Arc<DataPusher>,
    manager: Arc<WorkerManager>,
    monitor: Arc<Monitor>,
    simulator: Option<Arc<ExceptionSimulator>>,
    client: Option<Arc<EngineClient>>,
    connected: Arc<AtomicBool>,
    stop_requested: StopSignal,
    started_at: Mutex<Option<DateTime<Utc>>>,
    reports: ReportGenerator,
}

impl Orchestrator {
    /// # Summary
    /// 校验配置、加载数据并装配所有组件。
    ///
    /// # Logic
    /// 1. 校验全部配置段与数据源可用性。
    /// 2. 确认每个 Worker 的策略都能在注册表中解析。
    /// 3. 逐个证券加载 K 线并交给推送器。
    /// 4. 注册 Worker，按固定顺序连接消费者与处理器。
    ///
    /// # Returns
    /// 配置类问题返回 `SimulationError::Config`，数据读取失败返回 `SimulationError::Data`。
    pub async fn initialize(
        config: AppConfig,
        source: Arc<dyn DataSource>,
        registry: Arc<StrategyRegistry>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        if !source.validate().await {
            return Err(ConfigError::new(
                "data.path",
                format!("data source unavailable: {}", config.data.path),
            )
            .into());
        }
        for entry in &config.workers {
            let worker = &entry.worker;
            registry
                .resolve(&worker.strategy_module, &worker.strategy_class)
                .map_err(|e| ConfigError::new("workers.strategy_class", format!("{}: {e}", entry.id)))?;
        }

        let data = &config.data;
        let mut sequences = Vec::with_capacity(data.symbols.len());
        for symbol in &data.symbols {
            let bars = source
                .load_data(symbol, data.interval, data.start, data.end)
                .await?;
            if bars.is_empty() {
                warn!("No {} bars loaded for {symbol}", data.interval);
            }
            info!("Loaded {} {} bars for {symbol}", bars.len(), data.interval);
            sequences.push(bars);
        }

        let pusher = Arc::new(DataPusher::new(config.replay.clone())?);
        let total = pusher.load(sequences)?;

        let manager = Arc::new(WorkerManager::new(registry, pusher.clock()));
        for entry in &config.workers {
            manager.register_worker(&entry.id, entry.worker.clone())?;
        }

        let monitor = Arc::new(Monitor::new(config.monitor.clone()));
        let simulator = if config.simulation.enable_faults {
            Some(Arc::new(ExceptionSimulator::new(config.faults.clone())?))
        } else {
            None
        };
        let client = config
            .simulation
            .enable_client
            .then(|| Arc::new(EngineClient::new(config.client.clone())));
        let connected = Arc::new(AtomicBool::new(false));

        if let Some(sim) = &simulator {
            pusher.set_fault_injector(sim.clone());
        }
        if let Some(client) = &client {
            let injector = simulator
                .clone()
                .map(|s| s as Arc<dyn FaultInjector>);
            pusher.add_consumer(Arc::new(ClientFeed::new(
                client.clone(),
                connected.clone(),
                injector,
            )));
        }
        pusher.add_consumer(manager.clone() as Arc<dyn MarketDataConsumer>);
        pusher.add_consumer(monitor.clone());

        manager.add_signal_handler(monitor.clone());
        manager.add_order_handler(monitor.clone());
        if let Some(client) = &client
            && config.simulation.forward_orders
        {
            let forwarder = Arc::new(EngineForwarder::new(client.clone(), connected.clone()));
            manager.add_signal_handler(forwarder.clone());
            manager.add_order_handler(forwarder);
        }

        if let Some(sim) = &simulator {
            sim.register_handler_all(monitor.clone());
            sim.register_handler(
                FaultKind::StrategyError,
                Arc::new(WorkerFaultBridge::new(manager.clone())),
            );
        }
        monitor.set_source(Arc::new(RunProbe::new(
            pusher.clone(),
            manager.clone(),
            simulator.clone(),
            client.clone(),
        )));

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Simulation '{}' initialized: run {run_id}, {total} records, {} workers",
            config.simulation.name,
            config.workers.len()
        );
        let (state_tx, _) = watch::channel(SimulationState::Idle);
        Ok(Self {
            reports: ReportGenerator::new(&config.report.output_dir),
            config,
            run_id,
            state_tx,
            pusher,
            manager,
            monitor,
            simulator,
            client,
            connected,
            stop_requested: StopSignal::new(),
            started_at: Mutex::new(None),
        })
    }

    /// # Summary
    /// 执行一次完整运行并生成报告。
    ///
    /// # Logic
    /// 1. 启用客户端时连接并鉴权，失败则降级为独立模式。
    /// 2. 依次启动 Worker、监控、故障模拟与推送器。
    /// 3. 等待最先发生的结束条件：推送器终止、达到时长上限、外部停止、客户端永久失败。
    /// 4. 按固定顺序停止所有组件，汇总指标并写出报告。
    ///
    /// # Returns
    /// 启动失败时返回该错误，返回前仍会停止已启动的组件并尽力写出报告。
    pub async fn run(&self) -> Result<RunOutcome, SimulationError> {
        let previous = self.state_tx.send_replace(SimulationState::Running);
        if previous != SimulationState::Idle {
            self.state_tx.send_replace(previous);
            return Err(SimulationError::InvalidState(previous));
        }
        let started_at = Utc::now();
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(started_at);
        info!("Simulation '{}' run {} starting", self.config.simulation.name, self.run_id);

        self.connect_client().await;
        if let Err(e) = self.start_components().await {
            error!("Simulation failed to start: {e}");
            self.stop().await;
            let outcome = self
                .conclude(started_at, StopReason::StartupFailed, Some(e.to_string()))
                .await;
            if let Some(files) = &outcome.report {
                warn!("Startup failure recorded in {}", files.json.display());
            }
            return Err(e);
        }

        let (stop_reason, terminal_error) = self.wait_for_end().await;
        info!("Simulation run {} ending: {:?}", self.run_id, stop_reason);
        self.stop().await;

        Ok(self.conclude(started_at, stop_reason, terminal_error).await)
    }

    async fn start_components(&self) -> Result<(), SimulationError> {
        for (worker_id, e) in self.manager.start_all().await {
            warn!("Worker [{worker_id}] failed to start: {e}");
        }
        if self.config.simulation.enable_monitor {
            self.monitor.start();
        }
        if let Some(sim) = &self.simulator {
            sim.start()?;
        }
        self.pusher.start()?;
        Ok(())
    }

    async fn connect_client(&self) {
        let Some(client) = &self.client else {
            return;
        };
        if let Err(e) = client.connect().await {
            warn!("Engine unavailable, running standalone: {e}");
            return;
        }

        let timeout = Duration::from_millis(self.config.client.connect_timeout_ms);
        match client.authenticate().await {
            Ok(AuthOutcome::Sent) => {
                let authed = client
                    .wait_for_state(|s| s == ConnectionState::Authenticated, timeout)
                    .await;
                if authed.is_none() {
                    warn!("Engine did not confirm authentication, running standalone");
                    client.disconnect().await;
                    return;
                }
            }
            Ok(AuthOutcome::Unauthenticated) => {}
            Err(e) => {
                warn!("Engine authentication failed, running standalone: {e}");
                client.disconnect().await;
                return;
            }
        }

        if !self.config.client.topics.is_empty()
            && let Err(e) = client.subscribe(&self.config.client.topics).await
        {
            warn!("Topic subscription failed: {e}");
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("Running connected to {}", self.config.client.url);
    }

    async fn wait_for_end(&self) -> (StopReason, Option<String>) {
        let max_duration = self.config.simulation.max_duration_ms.map(Duration::from_millis);
        let client_failed = async {
            match (&self.client, self.connected.load(Ordering::SeqCst)) {
                (Some(client), true) => {
                    let mut rx = client.subscribe_state();
                    if rx.wait_for(|s| *s == ConnectionState::Failed).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                _ => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match max_duration {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            state = self.pusher.wait_until_finished() => match state {
                PushState::Completed => (StopReason::Completed, None),
                PushState::Error => {
                    error!("Data pusher terminated with an error");
                    (StopReason::PusherError, Some("data pusher loop failed".to_string()))
                }
                _ => (StopReason::StopRequested, None),
            },
            _ = self.stop_requested.wait() => (StopReason::StopRequested, None),
            _ = client_failed => {
                let attempts = self.config.client.max_reconnect_attempts;
                error!("Engine connection failed permanently");
                (
                    StopReason::ClientFailed,
                    Some(format!("engine connection lost after {attempts} reconnect attempts")),
                )
            }
            _ = deadline => (StopReason::MaxDuration, None),
        }
    }

    async fn conclude(
        &self,
        started_at: DateTime<Utc>,
        stop_reason: StopReason,
        terminal_error: Option<String>,
    ) -> RunOutcome {
        let metrics = self.monitor.finalize(RunTotals {
            started_at,
            ended_at: Utc::now(),
            push: Some(self.pusher.stats()),
            workers: self.manager.worker_stats(),
            faults: self.simulator.as_ref().map(|s| s.stats()),
        });
        let verdict = evaluate(
            &metrics,
            &self.config.report.criteria,
            stop_reason,
            terminal_error.as_deref(),
        );
        let mode = if self.connected.load(Ordering::SeqCst) {
            "connected"
        } else {
            "standalone"
        };

        let data = ReportData {
            run_id: self.run_id.clone(),
            name: self.config.simulation.name.clone(),
            generated_at: Utc::now(),
            mode: mode.to_string(),
            stop_reason,
            terminal_error: terminal_error.clone(),
            config: self.masked_config(),
            metrics: metrics.clone(),
            workers: self.manager.list_workers(),
            positions: self.monitor.positions(),
            exceptions: self
                .simulator
                .as_ref()
                .map(|s| s.history())
                .unwrap_or_default(),
            verdict: verdict.clone(),
        };
        let report = match self.reports.generate(&data).await {
            Ok(files) => Some(files),
            Err(e) => {
                error!("Report generation failed: {e}");
                None
            }
        };

        info!(
            "Simulation run {} finished: {} pushed, {} signals, {} orders, verdict {}",
            self.run_id,
            metrics.records_pushed,
            metrics.signals_total,
            metrics.orders_total,
            if verdict.passed { "PASSED" } else { "FAILED" }
        );
        RunOutcome {
            run_id: self.run_id.clone(),
            mode: mode.to_string(),
            stop_reason,
            terminal_error,
            metrics,
            verdict,
            report,
        }
    }

    /// 报告中的配置副本，API 密钥被遮盖
    fn masked_config(&self) -> Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(Value::Null);
        if let Some(secret) = value.pointer_mut("/client/api_secret")
            && !secret.is_null()
        {
            *secret = Value::from("***");
        }
        value
    }

    /// # Summary
    /// 按固定顺序停止所有组件。可重复调用，运行中调用会让 `run` 以 `StopRequested` 结束。
    pub async fn stop(&self) {
        let current = *self.state_tx.borrow();
        if current == SimulationState::Stopped {
            return;
        }
        self.state_tx.send_replace(SimulationState::Stopping);
        self.stop_requested.trigger();

        self.pusher.stop().await;
        if let Some(sim) = &self.simulator {
            sim.stop().await;
        }
        self.monitor.stop().await;
        self.manager.stop_all().await;
        if let Some(client) = &self.client {
            client.disconnect().await;
        }

        self.state_tx.send_replace(SimulationState::Stopped);
        info!("Simulation run {} stopped", self.run_id);
    }

    /// 暂停推送；仅在运行中有效
    pub fn pause(&self) -> bool {
        if self.state() != SimulationState::Running || !self.pusher.pause() {
            return false;
        }
        self.state_tx.send_replace(SimulationState::Paused);
        info!("Simulation paused");
        true
    }

    /// 恢复推送；仅在暂停中有效
    pub fn resume(&self) -> bool {
        if self.state() != SimulationState::Paused || !self.pusher.resume() {
            return false;
        }
        self.state_tx.send_replace(SimulationState::Running);
        info!("Simulation resumed");
        true
    }

    pub fn state(&self) -> SimulationState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SimulationState> {
        self.state_tx.subscribe()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn pusher(&self) -> &Arc<DataPusher> {
        &self.pusher
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.manager
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn simulator(&self) -> Option<&Arc<ExceptionSimulator>> {
        self.simulator.as_ref()
    }

    pub fn client(&self) -> Option<&Arc<EngineClient>> {
        self.client.as_ref()
    }
}

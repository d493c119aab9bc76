use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use harness_core::common::TimeFrame;
use harness_core::config::{AppConfig, WorkerEntry};
use harness_core::market::entity::Bar;
use harness_core::market::error::DataError;
use harness_core::market::port::DataSource;
use harness_core::replay::entity::{PushMode, PushState};
use harness_core::report::entity::StopReason;
use harness_core::strategy::entity::{WorkerConfig, WorkerState};
use harness_core::test_utils::{bars_from_closes, minute_bars};
use harness_manager::StrategyRegistry;
use harness_orchestrator::{Orchestrator, SimulationError, SimulationState};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

struct MemorySource {
    bars: HashMap<String, Vec<Bar>>,
    available: bool,
}

impl MemorySource {
    fn new(bars: Vec<Bar>) -> Self {
        let mut map: HashMap<String, Vec<Bar>> = HashMap::new();
        for bar in bars {
            map.entry(bar.symbol.clone()).or_default().push(bar);
        }
        Self {
            bars: map,
            available: true,
        }
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn load_data(
        &self,
        symbol: &str,
        _interval: TimeFrame,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, DataError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| DataError::NotFound(symbol.to_string()))?;
        Ok(bars
            .iter()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp <= e))
            .cloned()
            .collect())
    }

    async fn validate(&self) -> bool {
        self.available
    }
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// 快速的固定间隔回放：每批 10 条，每批 10ms
fn fast_config(report_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.simulation.name = "e2e".to_string();
    config.data.symbols = vec!["BTCUSDT".to_string()];
    config.replay.mode = PushMode::FixedInterval;
    config.replay.speed = 100.0;
    config.replay.batch_size = 10;
    config.replay.batch_interval_ms = 1_000;
    config.monitor.snapshot_interval_ms = 20;
    config.report.output_dir = report_dir.to_string_lossy().into_owned();

    let mut sma = WorkerConfig::new("builtin.sma", "MovingAverageCross");
    sma.params.insert("fast".to_string(), json!(2));
    sma.params.insert("slow".to_string(), json!(4));
    sma.params.insert("quantity".to_string(), json!(1.0));
    config.workers = vec![
        WorkerEntry {
            id: "idle".to_string(),
            worker: WorkerConfig::new("builtin.noop", "Idle"),
        },
        WorkerEntry {
            id: "sma".to_string(),
            worker: sma,
        },
    ];
    config
}

fn zigzag_bars(count: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..count)
        .map(|i| if (i / 6) % 2 == 0 { 100.0 + i as f64 } else { 130.0 - i as f64 })
        .collect();
    bars_from_closes("BTCUSDT", start_time(), &closes)
}

async fn orchestrator(config: AppConfig, bars: Vec<Bar>) -> Result<Orchestrator, SimulationError> {
    Orchestrator::initialize(
        config,
        Arc::new(MemorySource::new(bars)),
        Arc::new(StrategyRegistry::with_builtins()),
    )
    .await
}

#[tokio::test]
async fn test_standalone_run_completes_with_report() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let orch = orchestrator(fast_config(dir.path()), zigzag_bars(100)).await?;
    assert_eq!(orch.state(), SimulationState::Idle);
    assert_eq!(orch.pusher().total(), 100);

    let outcome = orch.run().await?;
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.mode, "standalone");
    assert_eq!(outcome.terminal_error, None);
    assert!(outcome.verdict.passed, "{:?}", outcome.verdict.reasons);

    let m = &outcome.metrics;
    assert_eq!(m.total_records, 100);
    assert_eq!(m.records_pushed, 100);
    assert_eq!(m.messages_observed, 100);
    assert!((m.progress_percent - 100.0).abs() < 1e-9);
    assert_eq!(m.workers.total, 2);
    assert_eq!(m.workers.messages_processed, 200);
    assert!(m.signals_total > 0);
    assert!(m.fills <= m.orders_total);
    assert_eq!(orch.pusher().state(), PushState::Completed);
    assert_eq!(orch.state(), SimulationState::Stopped);
    assert!(
        orch.manager()
            .list_workers()
            .iter()
            .all(|w| w.state == WorkerState::Stopped)
    );

    let files = outcome.report.expect("report written");
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&files.json)?)?;
    assert_eq!(json["run_id"], orch.run_id());
    assert_eq!(json["verdict"]["passed"], true);
    assert!(std::fs::read_to_string(&files.markdown)?.contains("## Verdict"));

    // 运行结束后不能再次运行，停止可重复调用
    assert!(matches!(
        orch.run().await,
        Err(SimulationError::InvalidState(SimulationState::Stopped))
    ));
    orch.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_initialize_rejects_bad_configuration() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = fast_config(dir.path());
    config.replay.speed = 0.0;
    assert!(matches!(
        orchestrator(config, minute_bars("BTCUSDT", start_time(), 5)).await,
        Err(SimulationError::Config(e)) if e.field == "replay.speed"
    ));

    let mut config = fast_config(dir.path());
    config.workers[0].worker = WorkerConfig::new("nowhere", "Missing");
    assert!(matches!(
        orchestrator(config, minute_bars("BTCUSDT", start_time(), 5)).await,
        Err(SimulationError::Config(e)) if e.reason.contains("nowhere.Missing")
    ));

    let mut source = MemorySource::new(Vec::new());
    source.available = false;
    let result = Orchestrator::initialize(
        fast_config(dir.path()),
        Arc::new(source),
        Arc::new(StrategyRegistry::with_builtins()),
    )
    .await;
    assert!(matches!(result, Err(SimulationError::Config(e)) if e.field == "data.path"));

    let mut config = fast_config(dir.path());
    config.data.symbols = vec!["ETHUSDT".to_string()];
    assert!(matches!(
        orchestrator(config, minute_bars("BTCUSDT", start_time(), 5)).await,
        Err(SimulationError::Data(DataError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_startup_failure_still_writes_report() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let orch = orchestrator(fast_config(dir.path()), zigzag_bars(50)).await?;
    // 推送器被提前占用，编排器无法再启动它
    orch.pusher().start()?;
    assert!(orch.pusher().pause());

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, SimulationError::Replay(_)), "{err:?}");
    assert_eq!(orch.state(), SimulationState::Stopped);
    assert!(
        orch.manager()
            .list_workers()
            .iter()
            .all(|w| w.state == WorkerState::Stopped)
    );

    let path = dir.path().join(format!("report_{}.json", orch.run_id()));
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(json["stop_reason"], "startup_failed");
    assert_eq!(json["terminal_error"], err.to_string());
    assert_eq!(json["verdict"]["passed"], false);
    assert!(
        std::fs::read_to_string(dir.path().join(format!("report_{}.md", orch.run_id())))?
            .contains("startup_failed")
    );
    Ok(())
}

#[tokio::test]
async fn test_max_duration_ends_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = fast_config(dir.path());
    // 真实时间一倍速：一分钟一根，不可能在时限内推完
    config.replay.mode = PushMode::RealTime;
    config.replay.speed = 1.0;
    config.simulation.max_duration_ms = Some(200);

    let orch = orchestrator(config, minute_bars("BTCUSDT", start_time(), 50)).await?;
    let started = std::time::Instant::now();
    let outcome = orch.run().await?;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.stop_reason, StopReason::MaxDuration);
    assert_eq!(outcome.metrics.records_pushed, 1);
    assert!(!outcome.verdict.passed);
    assert_eq!(orch.pusher().state(), PushState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_external_stop_and_pause() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = fast_config(dir.path());
    config.replay.mode = PushMode::RealTime;
    config.replay.speed = 60.0;

    let orch = Arc::new(orchestrator(config, minute_bars("BTCUSDT", start_time(), 500)).await?);
    assert!(!orch.pause());

    let runner = orch.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let mut state = orch.subscribe_state();
    state.wait_for(|s| *s == SimulationState::Running).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(orch.pause());
    assert!(!orch.pause());
    assert_eq!(orch.state(), SimulationState::Paused);
    let paused_at = orch.pusher().stats().pushed;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(orch.pusher().stats().pushed, paused_at);

    assert!(orch.resume());
    assert!(!orch.resume());
    orch.stop().await;
    orch.stop().await;

    let outcome = run.await??;
    assert_eq!(outcome.stop_reason, StopReason::StopRequested);
    assert!(outcome.metrics.records_pushed < 500);
    assert_eq!(orch.state(), SimulationState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_engine_falls_back_to_standalone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut config = fast_config(dir.path());
    config.simulation.enable_client = true;
    config.client.url = format!("ws://{addr}/ws");

    let orch = orchestrator(config, zigzag_bars(30)).await?;
    let outcome = orch.run().await?;
    assert_eq!(outcome.mode, "standalone");
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.metrics.records_pushed, 30);
    assert!(!orch.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_connected_run_forwards_market_data_and_orders() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let frames: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let seen = frames.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(text) = frame
                && let Ok(value) = serde_json::from_str::<Value>(text.as_str())
            {
                seen.lock().unwrap().push(value);
            }
        }
    });

    let mut config = fast_config(dir.path());
    config.simulation.enable_client = true;
    config.client.url = format!("ws://{addr}/ws");
    config.client.topics = vec!["BTCUSDT".to_string()];
    config.client.api_secret = Some("top-secret".to_string());

    let orch = orchestrator(config, zigzag_bars(40)).await?;
    let outcome = orch.run().await?;
    assert_eq!(outcome.mode, "connected");
    assert_eq!(outcome.stop_reason, StopReason::Completed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let frames = frames.lock().unwrap().clone();
    let count = |kind: &str| frames.iter().filter(|f| f["type"] == kind).count();
    assert_eq!(count("subscribe"), 1);
    assert_eq!(count("market_data"), 40);
    let commands: Vec<&Value> = frames
        .iter()
        .filter(|f| f["type"] == "control")
        .map(|f| &f["data"]["command"])
        .collect();
    assert_eq!(
        commands.iter().filter(|c| **c == "submit_signal").count() as u64,
        outcome.metrics.signals_total
    );
    assert_eq!(
        commands.iter().filter(|c| **c == "submit_order").count() as u64,
        outcome.metrics.orders_total
    );

    let files = outcome.report.expect("report written");
    let report = std::fs::read_to_string(&files.json)?;
    assert!(!report.contains("top-secret"));
    Ok(())
}

#[tokio::test]
async fn test_strategy_error_faults_reach_workers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = fast_config(dir.path());
    config.replay.batch_size = 1;
    config.replay.batch_interval_ms = 1_000;
    config.replay.speed = 50.0;
    config.simulation.enable_faults = true;
    config.report.criteria.max_worker_error_rate = 1.0;
    config.faults.seed = Some(7);
    config.faults.network_delay.enabled = false;
    config.faults.corruption.enabled = false;
    config.faults.strategy_error.enabled = true;
    config.faults.strategy_error.probability = 1.0;
    config.faults.strategy_error.check_min_ms = 20;
    config.faults.strategy_error.check_max_ms = 40;
    config.faults.strategy_error.recovery_min_ms = 10;
    config.faults.strategy_error.recovery_max_ms = 20;

    let orch = orchestrator(config, zigzag_bars(30)).await?;
    let outcome = orch.run().await?;
    assert_eq!(outcome.stop_reason, StopReason::Completed);

    let m = &outcome.metrics;
    assert!(m.faults.strategy_error >= 1);
    assert!(m.workers.errors >= 1);
    assert_eq!(m.records_pushed, 30);
    // 被注入故障的 Worker 会跳过部分消息
    let processed_plus_skipped: u64 = orch
        .manager()
        .list_workers()
        .iter()
        .map(|w| w.messages_processed + w.messages_skipped)
        .sum();
    assert_eq!(processed_plus_skipped, 60);
    Ok(())
}

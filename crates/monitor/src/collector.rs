use crate::ledger::PaperLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harness_core::common::buffer::RollingBuffer;
use harness_core::common::num::{ratio, signed_to_f64};
use harness_core::common::shutdown::StopSignal;
use harness_core::config::MonitorConfig;
use harness_core::fault::entity::{FaultCounts, SimulatedException};
use harness_core::fault::port::FaultHandler;
use harness_core::market::entity::MarketDataMessage;
use harness_core::market::error::DataError;
use harness_core::market::port::MarketDataConsumer;
use harness_core::replay::entity::PushStats;
use harness_core::report::entity::{
    LatencyStats, MonitorSnapshot, PositionReport, SimulationMetrics,
};
use harness_core::report::port::SnapshotSource;
use harness_core::strategy::entity::{OrderInfo, TradeSignal, WorkerStats};
use harness_core::strategy::error::StrategyError;
use harness_core::strategy::port::{OrderHandler, SignalHandler};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Default)]
struct Counters {
    messages_observed: u64,
    // 载荷无法还原为 Bar 的消息（通常是注入的数据损坏）
    invalid_messages: u64,
    signals_total: u64,
    signals_by_kind: BTreeMap<String, u64>,
    orders_total: u64,
    faults: FaultCounts,
}

/// # Summary
/// 定稿指标时由编排层提供的外部读数。
pub struct RunTotals {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub push: Option<PushStats>,
    pub workers: WorkerStats,
    // 故障模拟器的权威计数；未启用时使用监控器自身观察到的事件
    pub faults: Option<FaultCounts>,
}

/// # Summary
/// 运行监控器：作为推送器的最后一个消费者以及信号、订单、故障的处理器收集全部运行指标。
///
/// # Invariants
/// - 所有内部状态由 std Mutex 保护，锁从不跨越 await。
/// - 盈亏为拉取式：未实现盈亏在读取时按最新价计算。
pub struct Monitor {
    config: MonitorConfig,
    counters: Mutex<Counters>,
    latency: Mutex<RollingBuffer<f64>>,
    ledger: Mutex<PaperLedger>,
    snapshots: Mutex<RollingBuffer<MonitorSnapshot>>,
    source: RwLock<Option<Arc<dyn SnapshotSource>>>,
    stop: StopSignal,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_ledger(config, PaperLedger::default())
    }

    pub fn with_ledger(config: MonitorConfig, ledger: PaperLedger) -> Self {
        Self {
            latency: Mutex::new(RollingBuffer::new(config.latency_window)),
            snapshots: Mutex::new(RollingBuffer::new(config.snapshot_history)),
            config,
            counters: Mutex::new(Counters::default()),
            ledger: Mutex::new(ledger),
            source: RwLock::new(None),
            stop: StopSignal::new(),
            task: Mutex::new(None),
        }
    }

    /// 注入快照数据源
    pub fn set_source(&self, source: Arc<dyn SnapshotSource>) {
        *self.source.write().unwrap_or_else(|e| e.into_inner()) = Some(source);
    }

    /// # Summary
    /// 启动周期快照协程。
    ///
    /// # Returns
    /// 已在运行时返回 `false`。
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return false;
        }
        self.stop.reset();
        let monitor = self.clone();
        let interval = Duration::from_millis(self.config.snapshot_interval_ms);
        *task = Some(tokio::spawn(async move {
            while monitor.stop.sleep(interval).await {
                monitor.take_snapshot();
            }
            debug!("Monitor snapshot loop exited");
        }));
        info!(
            "Monitor started, snapshot every {}ms",
            self.config.snapshot_interval_ms
        );
        true
    }

    /// 停止快照协程并补拍最后一张快照，可重复调用
    pub async fn stop(&self) {
        self.stop.trigger();
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!("Monitor snapshot task ended abnormally: {e}");
            }
            self.take_snapshot();
            info!("Monitor stopped");
        }
    }

    /// # Summary
    /// 立即拍一张快照并存入有界历史。
    pub fn take_snapshot(&self) -> MonitorSnapshot {
        let reading = self
            .source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.probe())
            .unwrap_or_default();

        let (messages_observed, signals_total, orders_total) = {
            let c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            (c.messages_observed, c.signals_total, c.orders_total)
        };
        let (realized_pnl, unrealized_pnl) = {
            let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            (ledger.realized_pnl(), ledger.unrealized_pnl())
        };

        let snapshot = MonitorSnapshot {
            taken_at: Utc::now(),
            reading,
            messages_observed,
            signals_total,
            orders_total,
            realized_pnl,
            unrealized_pnl,
        };
        debug!(
            "Snapshot: observed={} signals={} orders={} realized={} unrealized={} faults={:?}",
            snapshot.messages_observed,
            snapshot.signals_total,
            snapshot.orders_total,
            snapshot.realized_pnl,
            snapshot.unrealized_pnl,
            snapshot.reading.active_faults
        );
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(snapshot.clone());
        snapshot
    }

    /// 按时间顺序返回保留的快照
    pub fn snapshots(&self) -> Vec<MonitorSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .to_vec()
    }

    pub fn messages_observed(&self) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .messages_observed
    }

    pub fn positions(&self) -> Vec<PositionReport> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .positions()
    }

    /// 已实现与未实现盈亏
    pub fn pnl(&self) -> (Decimal, Decimal) {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        (ledger.realized_pnl(), ledger.unrealized_pnl())
    }

    /// # Summary
    /// 窗口内的扇出延迟分布。
    pub fn latency_stats(&self) -> LatencyStats {
        let buf = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        LatencyStats {
            samples: buf.total_pushed(),
            mean_ms: buf.mean().unwrap_or(0.0),
            p50_ms: buf.percentile(0.50).unwrap_or(0.0),
            p95_ms: buf.percentile(0.95).unwrap_or(0.0),
            p99_ms: buf.percentile(0.99).unwrap_or(0.0),
            max_ms: buf.max().unwrap_or(0.0),
            pusher_ema_ms: 0.0,
        }
    }

    /// # Summary
    /// 汇总全程指标。
    ///
    /// # Logic
    /// 1. 仍未成交的挂单标记为过期，订单状态计数在此之后统计。
    /// 2. 推送、Worker 与故障计数取自编排层提供的读数。
    /// 3. Worker 错误率 = 错误数 / 投递给 Worker 的消息数（成功、失败与跳过之和），没有投递时为 0。
    /// 4. 总盈亏为扣除手续费后的净值。
    pub fn finalize(&self, totals: RunTotals) -> SimulationMetrics {
        let (realized_pnl, unrealized_pnl, total_pnl, commission, fills, orders_by_status) = {
            let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            let expired = ledger.expire_resting();
            if expired > 0 {
                info!("{expired} resting paper orders expired at end of run");
            }
            (
                ledger.realized_pnl(),
                ledger.unrealized_pnl(),
                ledger.net_pnl(),
                ledger.commission(),
                ledger.fills(),
                ledger.order_status_counts(),
            )
        };

        let mut latency = self.latency_stats();
        if let Some(push) = &totals.push {
            latency.pusher_ema_ms = push.avg_latency_ms;
        }

        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let faults = totals.faults.unwrap_or_else(|| counters.faults.clone());
        let push = totals.push.as_ref();
        let workers = totals.workers;
        let worker_error_rate = ratio(workers.errors, workers.messages_delivered);

        SimulationMetrics {
            started_at: totals.started_at,
            ended_at: totals.ended_at,
            duration_ms: u64::try_from((totals.ended_at - totals.started_at).num_milliseconds())
                .unwrap_or(0),
            total_records: push.map_or(0, |p| p.total),
            records_pushed: push.map_or(0, |p| p.pushed),
            progress_percent: push.map_or(0.0, |p| p.progress_percent),
            push_rate: push.map_or(0.0, |p| p.push_rate),
            corrupted_records: push.map_or(0, |p| p.corrupted),
            delayed_records: push.map_or(0, |p| p.delayed),
            consumer_errors: push.map_or(0, |p| p.consumer_errors),
            messages_observed: counters.messages_observed,
            invalid_messages: counters.invalid_messages,
            signals_total: counters.signals_total,
            signals_by_kind: counters.signals_by_kind.clone(),
            orders_total: counters.orders_total,
            orders_by_status,
            fills,
            realized_pnl,
            unrealized_pnl,
            total_pnl,
            commission,
            latency,
            faults,
            workers,
            worker_error_rate,
        }
    }
}

#[async_trait]
impl MarketDataConsumer for Monitor {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn on_market_data(&self, message: &MarketDataMessage) -> Result<(), DataError> {
        let elapsed = Utc::now() - message.sent_at;
        let latency_ms = signed_to_f64(elapsed.num_microseconds().unwrap_or(0).max(0)) / 1000.0;
        self.latency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(latency_ms);

        let bar = message.to_bar();
        {
            let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            c.messages_observed += 1;
            if bar.is_err() {
                c.invalid_messages += 1;
            }
        }

        match bar {
            Ok(bar) => {
                let fills = self
                    .ledger
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .on_bar(&bar);
                for fill in fills {
                    debug!(
                        "Resting order {} filled at {} for {}",
                        fill.order_id, fill.price, fill.worker_id
                    );
                }
            }
            Err(e) => debug!("Message #{} not priced: {e}", message.sequence),
        }
        Ok(())
    }
}

#[async_trait]
impl SignalHandler for Monitor {
    async fn handle_signal(&self, worker_id: &str, signal: &TradeSignal) -> Result<(), StrategyError> {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        c.signals_total += 1;
        *c.signals_by_kind.entry(signal.kind.to_string()).or_insert(0) += 1;
        debug!(
            "Signal from {worker_id}: {} {} @ {}",
            signal.kind, signal.symbol, signal.price
        );
        Ok(())
    }
}

#[async_trait]
impl OrderHandler for Monitor {
    async fn handle_order(&self, worker_id: &str, order: &OrderInfo) -> Result<(), StrategyError> {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .orders_total += 1;
        let fill = self
            .ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .submit(worker_id, order.clone());
        if let Some(fill) = fill {
            debug!(
                "Order {} from {worker_id} filled {} @ {}",
                fill.order_id, fill.quantity, fill.price
            );
        }
        Ok(())
    }
}

#[async_trait]
impl FaultHandler for Monitor {
    async fn on_fault(&self, exception: &SimulatedException) {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .faults
            .record(exception.kind);
        info!(
            "Fault observed: {} ({}), duration {}ms",
            exception.kind, exception.description, exception.duration_ms
        );
    }

    async fn on_recover(&self, exception: &SimulatedException) {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .faults
            .recovered += 1;
        info!("Fault recovered: {} ({})", exception.kind, exception.id);
    }
}

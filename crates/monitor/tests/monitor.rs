use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use harness_core::config::MonitorConfig;
use harness_core::fault::entity::{FaultKind, SimulatedException};
use harness_core::fault::port::FaultHandler;
use harness_core::market::entity::MarketDataMessage;
use harness_core::market::port::MarketDataConsumer;
use harness_core::report::entity::ProbeReading;
use harness_core::report::port::SnapshotSource;
use harness_core::strategy::entity::{
    OrderInfo, OrderSide, SignalKind, TradeSignal, WorkerStats,
};
use harness_core::strategy::port::{OrderHandler, SignalHandler};
use harness_core::test_utils::bars_from_closes;
use harness_monitor::{Monitor, RunTotals};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct CountingSource {
    probes: AtomicUsize,
}

impl SnapshotSource for CountingSource {
    fn probe(&self) -> ProbeReading {
        self.probes.fetch_add(1, Ordering::SeqCst);
        ProbeReading {
            active_faults: vec![FaultKind::Disconnect],
            connection: Some("standalone".to_string()),
            ..ProbeReading::default()
        }
    }
}

fn messages(closes: &[f64]) -> Vec<MarketDataMessage> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    bars_from_closes("BTCUSDT", start, closes)
        .iter()
        .enumerate()
        .map(|(i, bar)| MarketDataMessage::from_bar(bar, i as u64 + 1, "test"))
        .collect()
}

#[tokio::test]
async fn test_round_trip_trade_produces_realized_pnl() -> anyhow::Result<()> {
    let monitor = Monitor::new(MonitorConfig::default());
    let feed = messages(&[100.0, 105.0, 110.0, 120.0]);

    monitor.on_market_data(&feed[0]).await?;
    monitor
        .handle_signal("w1", &TradeSignal::new("BTCUSDT", SignalKind::Buy, 1.0, 100.0, 2.0))
        .await?;
    monitor
        .handle_order("w1", &OrderInfo::market("BTCUSDT", OrderSide::Buy, dec!(2)))
        .await?;

    monitor.on_market_data(&feed[1]).await?;
    let (realized, unrealized) = monitor.pnl();
    assert_eq!(realized, Decimal::ZERO);
    assert_eq!(unrealized, dec!(10));

    monitor.on_market_data(&feed[2]).await?;
    monitor
        .handle_signal("w1", &TradeSignal::new("BTCUSDT", SignalKind::Sell, -1.0, 110.0, 2.0))
        .await?;
    monitor
        .handle_order("w1", &OrderInfo::market("BTCUSDT", OrderSide::Sell, dec!(2)))
        .await?;
    monitor.on_market_data(&feed[3]).await?;

    let started = Utc::now() - ChronoDuration::seconds(2);
    let metrics = monitor.finalize(RunTotals {
        started_at: started,
        ended_at: Utc::now(),
        push: None,
        workers: WorkerStats {
            total: 1,
            messages_processed: 4,
            messages_delivered: 4,
            errors: 1,
            ..WorkerStats::default()
        },
        faults: None,
    });

    assert_eq!(metrics.messages_observed, 4);
    assert_eq!(metrics.invalid_messages, 0);
    assert_eq!(metrics.signals_total, 2);
    assert_eq!(metrics.signals_by_kind.get("buy"), Some(&1));
    assert_eq!(metrics.signals_by_kind.get("sell"), Some(&1));
    assert_eq!(metrics.orders_total, 2);
    assert_eq!(metrics.orders_by_status.get("filled"), Some(&2));
    assert_eq!(metrics.fills, 2);
    assert_eq!(metrics.realized_pnl, dec!(20));
    assert_eq!(metrics.unrealized_pnl, Decimal::ZERO);
    assert_eq!(metrics.total_pnl, dec!(19.958));
    assert_eq!(metrics.commission, dec!(0.042));
    assert_eq!(metrics.latency.samples, 4);
    assert!(metrics.duration_ms >= 2_000);
    assert!((metrics.worker_error_rate - 0.25).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_message_is_counted_not_priced() -> anyhow::Result<()> {
    let monitor = Monitor::new(MonitorConfig::default());
    let mut feed = messages(&[100.0]);
    if let Some(obj) = feed[0].payload.as_object_mut() {
        obj.insert("close".to_string(), Value::from(-5.0));
    }

    monitor.on_market_data(&feed[0]).await?;
    monitor
        .handle_order("w1", &OrderInfo::market("BTCUSDT", OrderSide::Buy, dec!(1)))
        .await?;

    let metrics = monitor.finalize(RunTotals {
        started_at: Utc::now(),
        ended_at: Utc::now(),
        push: None,
        workers: WorkerStats::default(),
        faults: None,
    });
    assert_eq!(metrics.messages_observed, 1);
    assert_eq!(metrics.invalid_messages, 1);
    assert_eq!(metrics.fills, 0);
    // 没有价格的市价单在运行结束时过期
    assert_eq!(metrics.orders_by_status.get("expired"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn test_fault_events_are_counted() {
    let monitor = Monitor::new(MonitorConfig::default());
    let mut exception = SimulatedException::new(FaultKind::Disconnect, "link down", 100);
    monitor.on_fault(&exception).await;
    exception.mark_recovered();
    monitor.on_recover(&exception).await;
    monitor
        .on_fault(&SimulatedException::new(FaultKind::DataCorruption, "bad tick", 0))
        .await;

    let metrics = monitor.finalize(RunTotals {
        started_at: Utc::now(),
        ended_at: Utc::now(),
        push: None,
        workers: WorkerStats::default(),
        faults: None,
    });
    assert_eq!(metrics.faults.disconnect, 1);
    assert_eq!(metrics.faults.data_corruption, 1);
    assert_eq!(metrics.faults.recovered, 1);
    assert_eq!(metrics.worker_error_rate, 0.0);
}

#[tokio::test]
async fn test_snapshot_loop_polls_source_and_stays_bounded() {
    let config = MonitorConfig {
        snapshot_interval_ms: 10,
        snapshot_history: 5,
        ..MonitorConfig::default()
    };
    let monitor = Arc::new(Monitor::new(config));
    let source = Arc::new(CountingSource {
        probes: AtomicUsize::new(0),
    });
    monitor.set_source(source.clone());

    assert!(monitor.start());
    assert!(!monitor.start());
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.stop().await;
    monitor.stop().await;

    let probes = source.probes.load(Ordering::SeqCst);
    assert!(probes >= 6, "only {probes} probes");
    let snapshots = monitor.snapshots();
    assert_eq!(snapshots.len(), 5);
    assert!(snapshots.windows(2).all(|w| w[0].taken_at <= w[1].taken_at));
    assert_eq!(snapshots[0].reading.active_faults, vec![FaultKind::Disconnect]);

    // 停止后不再采样
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.probes.load(Ordering::SeqCst), probes);
}

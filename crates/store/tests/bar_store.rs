use chrono::{Duration, TimeZone, Utc};
use harness_core::common::TimeFrame;
use harness_core::market::port::DataSource;
use harness_core::test_utils::minute_bars;
use harness_store::SqliteBarStore;
use tempfile::tempdir;

#[tokio::test]
async fn test_bar_store_range_queries() -> anyhow::Result<()> {
    let tmp_dir = tempdir()?;
    let store = SqliteBarStore::open(tmp_dir.path().join("db").join("bars.db")).await?;
    assert!(store.validate().await);

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let btc = minute_bars("BTCUSDT", start, 10);
    let eth = minute_bars("ETHUSDT", start, 5);
    assert_eq!(store.save_bars(&btc).await?, 10);
    store.save_bars(&eth).await?;
    // 重复写入覆盖而非追加
    store.save_bars(&btc[..3]).await?;
    assert_eq!(store.count().await?, 15);

    let all = store
        .load_data("BTCUSDT", TimeFrame::Minute1, None, None)
        .await?;
    assert_eq!(all, btc);

    let from = start + Duration::minutes(2);
    let to = start + Duration::minutes(4);
    let window = store
        .load_data("BTCUSDT", TimeFrame::Minute1, Some(from), Some(to))
        .await?;
    assert_eq!(window.len(), 3);
    assert_eq!(window[0].timestamp, from);
    assert_eq!(window[2].timestamp, to);

    let tail = store
        .load_data("BTCUSDT", TimeFrame::Minute1, Some(start + Duration::minutes(8)), None)
        .await?;
    assert_eq!(tail.len(), 2);

    // 周期不同视为不同序列
    let none = store
        .load_data("BTCUSDT", TimeFrame::Hour1, None, None)
        .await?;
    assert!(none.is_empty());
    Ok(())
}

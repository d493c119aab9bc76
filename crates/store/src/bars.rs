use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harness_core::common::TimeFrame;
use harness_core::market::entity::Bar;
use harness_core::market::error::DataError;
use harness_core::market::port::DataSource;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::Path;
use tracing::{info, warn};

fn db_err(e: sqlx::Error) -> DataError {
    DataError::Database(e.to_string())
}

/// # Summary
/// 基于单个 SQLite 文件的行情存储。
///
/// # Invariants
/// * 所有证券共用一张 `bars` 表，主键为 (symbol, timeframe, ts)。
/// * `ts` 以 Unix 毫秒存储，查询结果按时间升序返回。
/// * 数据库路径由调用方显式给出，不依赖任何全局配置。
pub struct SqliteBarStore {
    pool: SqlitePool,
}

impl SqliteBarStore {
    /// # Summary
    /// 打开（必要时创建）数据库并初始化表结构。
    ///
    /// # Logic
    /// 1. 确保父目录存在。
    /// 2. 以 `create_if_missing` 连接。
    /// 3. 执行幂等建表与建索引 SQL。
    ///
    /// # Arguments
    /// * `path` - 数据库文件路径。
    ///
    /// # Returns
    /// * `Result<Self, DataError>`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, ts)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        info!("Opened bar store at {}", path.display());
        Ok(Self { pool })
    }

    /// # Summary
    /// 批量写入 K 线，已存在的同键记录被覆盖。
    ///
    /// # Returns
    /// 写入的记录数。
    pub async fn save_bars(&self, bars: &[Bar]) -> Result<u64, DataError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut written = 0;
        for bar in bars {
            let result = sqlx::query(
                r#"
                INSERT OR REPLACE INTO bars (symbol, timeframe, ts, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.interval.to_string())
            .bind(bar.timestamp.timestamp_millis())
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(db_err)?;
        Ok(written)
    }

    /// 表中记录总数
    pub async fn count(&self) -> Result<i64, DataError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bars")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n)
    }
}

#[async_trait]
impl DataSource for SqliteBarStore {
    /// # Summary
    /// 按证券、周期与可选时间范围参数化查询。
    ///
    /// # Logic
    /// 1. 起止时间为 None 时对应条件恒真。
    /// 2. 时间戳无法还原的行被跳过并告警。
    async fn load_data(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, DataError> {
        let start_ms = start.map(|t| t.timestamp_millis());
        let end_ms = end.map(|t| t.timestamp_millis());

        let records = sqlx::query_as::<_, (i64, f64, f64, f64, f64, f64)>(
            r#"
            SELECT ts, open, high, low, close, volume
            FROM bars
            WHERE symbol = ? AND timeframe = ?
              AND (? IS NULL OR ts >= ?)
              AND (? IS NULL OR ts <= ?)
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(interval.to_string())
        .bind(start_ms)
        .bind(start_ms)
        .bind(end_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut bars = Vec::with_capacity(records.len());
        for (ts, open, high, low, close, volume) in records {
            let Some(timestamp) = DateTime::from_timestamp_millis(ts) else {
                warn!("Skipping {} bar with invalid ts {}", symbol, ts);
                continue;
            };
            bars.push(Bar {
                symbol: symbol.to_string(),
                timestamp,
                open,
                high,
                low,
                close,
                volume,
                interval,
            });
        }
        Ok(bars)
    }

    async fn validate(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Bar store validation failed: {}", e);
                false
            }
        }
    }
}

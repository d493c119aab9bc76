use crate::columns::{Column, normalize_header, parse_number, parse_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harness_core::common::TimeFrame;
use harness_core::market::entity::Bar;
use harness_core::market::error::DataError;
use harness_core::market::port::DataSource;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EXTENSIONS: [&str; 2] = ["csv", "json"];

/// # Summary
/// 基于本地文件的数据源，支持单个文件或按约定命名的目录。
///
/// # Invariants
/// - 目录模式下按固定顺序搜索候选文件名，先命中者生效。
/// - 坏行被跳过并告警，不会使整次加载失败。
/// - 返回结果按时间戳稳定排序。
pub struct FileDataSource {
    root: PathBuf,
}

impl FileDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    /// # Summary
    /// 目录模式下的候选文件路径，按搜索顺序排列。
    pub fn candidates(&self, symbol: &str, interval: TimeFrame) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for ext in EXTENSIONS {
            paths.push(self.root.join(format!("{}_{}.{}", symbol, interval, ext)));
            paths.push(self.root.join(format!("{}-{}.{}", symbol, interval, ext)));
            paths.push(self.root.join(symbol).join(format!("{}.{}", interval, ext)));
            paths.push(self.root.join(format!("{}.{}", symbol, ext)));
        }
        paths
    }

    /// # Summary
    /// 解析出实际要读取的文件。
    ///
    /// # Returns
    /// 根路径本身是文件时直接返回；目录中无候选命中时返回 `DataError::NotFound`。
    pub fn resolve(&self, symbol: &str, interval: TimeFrame) -> Result<PathBuf, DataError> {
        if self.root.is_file() {
            return Ok(self.root.clone());
        }
        if !self.root.is_dir() {
            return Err(DataError::NotFound(self.root.display().to_string()));
        }
        let candidates = self.candidates(symbol, interval);
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                let searched: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                DataError::NotFound(format!("{} {} (searched {:?})", symbol, interval, searched))
            })
    }
}

#[async_trait]
impl DataSource for FileDataSource {
    /// # Summary
    /// 从文件加载 K 线。
    ///
    /// # Logic
    /// 1. 解析目标文件。
    /// 2. 在阻塞线程池中按扩展名解析 CSV 或 JSON。
    /// 3. 按起止时间过滤（包含端点）并稳定排序。
    async fn load_data(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, DataError> {
        let path = self.resolve(symbol, interval)?;
        let owned_symbol = symbol.to_string();
        let read_path = path.clone();
        let mut bars = tokio::task::spawn_blocking(move || read_file(&read_path, &owned_symbol, interval))
            .await
            .map_err(|e| DataError::Io(format!("loader task failed: {}", e)))??;

        bars.retain(|b| start.is_none_or(|s| b.timestamp >= s) && end.is_none_or(|e| b.timestamp <= e));
        bars.sort_by_key(|b| b.timestamp);

        info!(
            "Loaded {} bars for {} {} from {}",
            bars.len(),
            symbol,
            interval,
            path.display()
        );
        Ok(bars)
    }

    async fn validate(&self) -> bool {
        let ok = self.root.exists();
        if !ok {
            warn!("Data path {} does not exist", self.root.display());
        }
        ok
    }
}

fn read_file(path: &Path, symbol: &str, interval: TimeFrame) -> Result<Vec<Bar>, DataError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "json" => read_json(path, symbol, interval),
        _ => read_csv(path, symbol, interval),
    }
}

/// # Summary
/// 一行原始字段，以标准列为键。
type RawRow = HashMap<Column, String>;

/// # Summary
/// 将一行原始字段转换为 Bar。
///
/// # Arguments
/// * `volume_required`: 文件带有成交量列时为真，此时缺少成交量的行视为残缺；
///   整个文件都没有成交量时成交量取 0。
///
/// # Returns
/// 缺少必需列或数值非法时返回 `DataError`，由调用方跳过该行。
fn row_to_bar(
    row: &RawRow,
    symbol: &str,
    interval: TimeFrame,
    volume_required: bool,
) -> Result<Bar, DataError> {
    let field = |col: Column, name: &str| -> Result<&String, DataError> {
        row.get(&col)
            .ok_or_else(|| DataError::MissingField(name.to_string()))
    };
    let number = |col: Column, name: &str| -> Result<f64, DataError> {
        let raw = field(col, name)?;
        parse_number(raw).ok_or_else(|| DataError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
        })
    };

    let raw_ts = field(Column::Timestamp, "timestamp")?;
    let timestamp = parse_timestamp(raw_ts).ok_or_else(|| DataError::InvalidValue {
        field: "timestamp".to_string(),
        value: raw_ts.clone(),
    })?;
    let volume = match row.get(&Column::Volume) {
        Some(_) => number(Column::Volume, "volume")?,
        None if volume_required => return Err(DataError::MissingField("volume".to_string())),
        None => 0.0,
    };

    Ok(Bar {
        symbol: symbol.to_string(),
        timestamp,
        open: number(Column::Open, "open")?,
        high: number(Column::High, "high")?,
        low: number(Column::Low, "low")?,
        close: number(Column::Close, "close")?,
        volume,
        interval,
    })
}

/// 行内 symbol 列存在且与目标不一致时跳过
fn symbol_mismatch(row: &RawRow, symbol: &str) -> bool {
    row.get(&Column::Symbol)
        .is_some_and(|s| !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case(symbol))
}

fn read_csv(path: &Path, symbol: &str, interval: TimeFrame) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DataError::Io(format!("failed to open {}: {}", path.display(), e)))?;

    let headers = reader.headers().map_err(|e| DataError::Parse {
        location: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mapping: Vec<Option<Column>> = headers.iter().map(normalize_header).collect();
    for (required, name) in [
        (Column::Timestamp, "timestamp"),
        (Column::Open, "open"),
        (Column::High, "high"),
        (Column::Low, "low"),
        (Column::Close, "close"),
    ] {
        if !mapping.contains(&Some(required)) {
            return Err(DataError::MissingField(format!(
                "{} column in {}",
                name,
                path.display()
            )));
        }
    }

    let has_volume = mapping.contains(&Some(Column::Volume));
    if !has_volume {
        info!("{} has no volume column, volume defaults to 0", path.display());
    }

    let mut bars = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        // 表头占第 1 行
        let line = idx + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping unreadable row {} in {}: {}", line, path.display(), e);
                continue;
            }
        };
        let mut row = RawRow::new();
        for (col, value) in mapping.iter().zip(record.iter()) {
            if let Some(col) = col {
                row.entry(*col).or_insert_with(|| value.to_string());
            }
        }
        if symbol_mismatch(&row, symbol) {
            continue;
        }
        match row_to_bar(&row, symbol, interval, has_volume) {
            Ok(bar) => bars.push(bar),
            Err(e) => warn!("Skipping row {} in {}: {}", line, path.display(), e),
        }
    }
    debug!("Parsed {} rows from {}", bars.len(), path.display());
    Ok(bars)
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// # Summary
/// 读取 JSON 文件：顶层数组，或包含 `data`/`bars` 数组的对象。
fn read_json(path: &Path, symbol: &str, interval: TimeFrame) -> Result<Vec<Bar>, DataError> {
    let text = std::fs::read_to_string(path)?;
    let root: Value = serde_json::from_str(&text).map_err(|e| DataError::Parse {
        location: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let items = match &root {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("data")
            .or_else(|| obj.get("bars"))
            .and_then(Value::as_array)
            .ok_or_else(|| DataError::Parse {
                location: path.display().to_string(),
                reason: "expected an array or an object with `data`".to_string(),
            })?,
        _ => {
            return Err(DataError::Parse {
                location: path.display().to_string(),
                reason: "expected an array of records".to_string(),
            });
        }
    };

    let has_volume = items
        .iter()
        .filter_map(Value::as_object)
        .any(|obj| obj.keys().any(|k| normalize_header(k) == Some(Column::Volume)));
    if !has_volume {
        info!("{} has no volume field, volume defaults to 0", path.display());
    }

    let mut bars = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warn!("Skipping non-object record {} in {}", idx, path.display());
            continue;
        };
        let mut row = RawRow::new();
        for (key, value) in obj {
            if let Some(col) = normalize_header(key)
                && let Some(text) = json_scalar(value)
            {
                row.entry(col).or_insert(text);
            }
        }
        if symbol_mismatch(&row, symbol) {
            continue;
        }
        match row_to_bar(&row, symbol, interval, has_volume) {
            Ok(bar) => bars.push(bar),
            Err(e) => warn!("Skipping record {} in {}: {}", idx, path.display(), e),
        }
    }
    Ok(bars)
}

use crate::common::TimeFrame;
use crate::replay::entity::PushMode;
use crate::strategy::entity::WorkerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// # Summary
/// 配置校验错误，属于致命错误：出现时不得启动运行。
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid config `{field}`: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub data: DataConfig,
    pub replay: ReplayConfig,
    pub workers: Vec<WorkerEntry>,
    pub faults: FaultConfig,
    pub client: ClientConfig,
    pub monitor: MonitorConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// # Summary
    /// 校验全部配置段。
    ///
    /// # Logic
    /// 1. 各配置段自校验。
    /// 2. Worker id 不得为空或重复。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.data.validate()?;
        self.replay.validate()?;
        self.faults.validate()?;
        self.client.validate()?;
        self.monitor.validate()?;
        self.report.validate()?;

        let mut seen = std::collections::HashSet::new();
        for entry in &self.workers {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::new("workers.id", "worker id must not be empty"));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::new(
                    "workers.id",
                    format!("duplicate worker id {}", entry.id),
                ));
            }
            if entry.worker.strategy_class.trim().is_empty() {
                return Err(ConfigError::new(
                    "workers.strategy_class",
                    format!("worker {} has no strategy class", entry.id),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub name: String,
    // 运行时长上限，None 表示直到数据耗尽
    pub max_duration_ms: Option<u64>,
    pub enable_client: bool,
    pub enable_faults: bool,
    pub enable_monitor: bool,
    // 是否把 Worker 的信号与订单以 control 命令转发给被测引擎
    pub forward_orders: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "simulation".to_string(),
            max_duration_ms: None,
            enable_client: false,
            enable_faults: false,
            enable_monitor: true,
            forward_orders: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub source: DataSourceKind,
    // 文件、目录或 SQLite 数据库路径
    pub path: String,
    pub symbols: Vec<String>,
    pub interval: TimeFrame,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: DataSourceKind::File,
            path: "data".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            interval: TimeFrame::Minute1,
            start: None,
            end: None,
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::new("data.path", "must not be empty"));
        }
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::new("data.symbols", "at least one non-empty symbol required"));
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start > end
        {
            return Err(ConfigError::new("data.start", "start is after end"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub mode: PushMode,
    // 倍速，必须为有限正数
    pub speed: f64,
    // 固定间隔模式下每批发送的记录数
    pub batch_size: usize,
    // 固定间隔模式下的批间隔
    pub batch_interval_ms: u64,
    // 真实时间模式下单次等待的上限
    pub max_delay_ms: Option<u64>,
    // 消息来源标签
    pub origin: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: PushMode::RealTime,
            speed: 1.0,
            batch_size: 1,
            batch_interval_ms: 1000,
            max_delay_ms: Some(60_000),
            origin: "replay".to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ConfigError::new(
                "replay.speed",
                format!("must be a positive finite number, got {}", self.speed),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::new("replay.batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// # Summary
/// 配置文件中的一个 Worker 条目：id 加上注册描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub id: String,
    #[serde(flatten)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkDelayConfig {
    pub enabled: bool,
    pub probability: f64,
    pub check_min_ms: u64,
    pub check_max_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for NetworkDelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.1,
            check_min_ms: 1_000,
            check_max_ms: 5_000,
            min_delay_ms: 100,
            max_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisconnectConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub duration_ms: u64,
}

impl Default for DisconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 60_000,
            duration_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorruptionConfig {
    pub enabled: bool,
    pub probability: f64,
    pub check_min_ms: u64,
    pub check_max_ms: u64,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.05,
            check_min_ms: 1_000,
            check_max_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyErrorConfig {
    pub enabled: bool,
    pub probability: f64,
    pub check_min_ms: u64,
    pub check_max_ms: u64,
    pub recovery_min_ms: u64,
    pub recovery_max_ms: u64,
}

impl Default for StrategyErrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: 0.05,
            check_min_ms: 10_000,
            check_max_ms: 30_000,
            recovery_min_ms: 1_000,
            recovery_max_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    // 随机种子，None 表示取自操作系统
    pub seed: Option<u64>,
    pub network_delay: NetworkDelayConfig,
    pub disconnect: DisconnectConfig,
    pub corruption: CorruptionConfig,
    pub strategy_error: StrategyErrorConfig,
}

fn check_probability(field: &str, p: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(ConfigError::new(field, format!("probability {} outside [0, 1]", p)));
    }
    Ok(())
}

fn check_range(field: &str, min: u64, max: u64) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::new(field, format!("min {} greater than max {}", min, max)));
    }
    Ok(())
}

impl FaultConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nd = &self.network_delay;
        check_probability("faults.network_delay.probability", nd.probability)?;
        check_range("faults.network_delay.check_ms", nd.check_min_ms, nd.check_max_ms)?;
        check_range("faults.network_delay.delay_ms", nd.min_delay_ms, nd.max_delay_ms)?;

        if self.disconnect.enabled && self.disconnect.interval_ms == 0 {
            return Err(ConfigError::new("faults.disconnect.interval_ms", "must be positive"));
        }

        let c = &self.corruption;
        check_probability("faults.corruption.probability", c.probability)?;
        check_range("faults.corruption.check_ms", c.check_min_ms, c.check_max_ms)?;

        let se = &self.strategy_error;
        check_probability("faults.strategy_error.probability", se.probability)?;
        check_range("faults.strategy_error.check_ms", se.check_min_ms, se.check_max_ms)?;
        check_range(
            "faults.strategy_error.recovery_ms",
            se.recovery_min_ms,
            se.recovery_max_ms,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    // 缺少凭证时是否允许以未鉴权状态继续
    pub allow_unauthenticated: bool,
    pub auth_method: String,
    pub auth_path: String,
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub topics: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            api_key: None,
            api_secret: None,
            allow_unauthenticated: true,
            auth_method: "GET".to_string(),
            auth_path: "/ws".to_string(),
            connect_timeout_ms: 5_000,
            reconnect_delay_ms: 1_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 10_000,
            topics: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::new("client.url", format!("not a websocket url: {}", self.url)));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::new("client.connect_timeout_ms", "must be positive"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::new("client.heartbeat_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub snapshot_interval_ms: u64,
    // 延迟采样窗口大小
    pub latency_window: usize,
    // 保留的快照数量
    pub snapshot_history: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 1_000,
            latency_window: 10_000,
            snapshot_history: 600,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_interval_ms == 0 {
            return Err(ConfigError::new("monitor.snapshot_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

/// # Summary
/// 通过/失败判定条件。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassCriteria {
    // 要求数据完整推送完毕
    pub require_completion: bool,
    // 允许的 Worker 错误率上限（错误数 / 处理消息数）
    pub max_worker_error_rate: f64,
    // 允许的 p99 延迟上限
    pub max_p99_latency_ms: Option<f64>,
    // 推送数 / 加载数 的下限
    pub min_push_ratio: f64,
}

impl Default for PassCriteria {
    fn default() -> Self {
        Self {
            require_completion: true,
            max_worker_error_rate: 0.05,
            max_p99_latency_ms: None,
            min_push_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: String,
    pub criteria: PassCriteria,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "reports".to_string(),
            criteria: PassCriteria::default(),
        }
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.trim().is_empty() {
            return Err(ConfigError::new("report.output_dir", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.criteria.min_push_ratio) {
            return Err(ConfigError::new("report.criteria.min_push_ratio", "outside [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    // EnvFilter 语法，RUST_LOG 优先
    pub level: String,
    // 设置后额外写入按天滚动的日志文件
    pub dir: Option<String>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_prefix: "harness.log".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.replay.speed, 1.0);
        assert_eq!(config.data.interval, TimeFrame::Minute1);
        assert!(config.simulation.enable_monitor);
    }

    #[test]
    fn test_invalid_speed_is_fatal() {
        let mut config = AppConfig::default();
        config.replay.speed = 0.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "replay.speed");

        config.replay.speed = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_worker_rejected() {
        let mut config = AppConfig::default();
        let entry = WorkerEntry {
            id: "w1".to_string(),
            worker: WorkerConfig::new("sma", "MovingAverageCross"),
        };
        config.workers = vec![entry.clone(), entry];
        assert_eq!(config.validate().unwrap_err().field, "workers.id");
    }

    #[test]
    fn test_probability_out_of_range() {
        let mut config = AppConfig::default();
        config.faults.corruption.probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let raw = r#"{
            "replay": {"speed": 100.0, "mode": "fixed_interval", "batch_size": 10},
            "workers": [{"id": "w1", "strategy_module": "noop", "strategy_class": "Idle"}]
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.replay.mode, PushMode::FixedInterval);
        assert_eq!(config.replay.batch_size, 10);
        assert_eq!(config.replay.batch_interval_ms, 1000);
        assert_eq!(config.workers[0].worker.strategy_id(), "noop.Idle");
        assert!(config.workers[0].worker.enabled);
        assert!(config.validate().is_ok());
    }
}

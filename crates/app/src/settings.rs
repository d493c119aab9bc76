use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use harness_core::config::AppConfig;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = "harness.toml";
const CONFIG_ENV: &str = "HARNESS_CONFIG";

/// # Summary
/// 确定配置文件路径：命令行第一个参数优先，其次 `HARNESS_CONFIG`，最后是 `harness.toml`。
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_ENV).ok())
        .filter(|p| !p.trim().is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from)
}

/// # Summary
/// 加载应用配置。
///
/// # Logic
/// 1. 可选的 TOML 文件，不存在时全部使用默认值。
/// 2. 叠加 `HARNESS__` 前缀的环境变量，层级以 `__` 分隔，例如 `HARNESS__REPLAY__SPEED=10`。
/// 3. 反序列化后整体校验，校验失败不得启动。
pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
    let config: AppConfig = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix("HARNESS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read config {}", path.display()))?
        .try_deserialize()
        .context("failed to deserialize config")?;

    config.validate()?;
    Ok(config)
}

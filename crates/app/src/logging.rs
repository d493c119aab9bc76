use anyhow::Context;
use harness_core::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// # Summary
/// 初始化全局日志：终端输出，配置了目录时额外写入按天滚动的文件。
///
/// # Logic
/// 1. `RUST_LOG` 存在时优先，否则使用 `logging.level`。
/// 2. 文件写入走 non-blocking 通道。
///
/// # Returns
/// 文件日志的 guard，调用方须持有至进程退出，否则缓冲中的日志会丢失。
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log filter `{}`", config.level))?,
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());
    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .context("logger already initialized")?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init().context("logger already initialized")?;
            Ok(None)
        }
    }
}

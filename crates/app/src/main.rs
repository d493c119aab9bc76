use std::process::ExitCode;
use std::sync::Arc;

use harness_core::config::DataSourceKind;
use harness_core::market::port::DataSource;
use harness_feed::FileDataSource;
use harness_manager::StrategyRegistry;
use harness_orchestrator::Orchestrator;
use harness_store::SqliteBarStore;
use tracing::{error, info};

mod logging;
mod settings;

/// # Summary
/// 模拟测试入口，纯粹的 DI 容器。
/// 负责加载配置、实例化数据源与策略注册表，并交给 Orchestrator 完成一次运行。
///
/// # Logic
/// 1. 加载配置并初始化全局日志。
/// 2. 按配置实例化数据源（文件或 SQLite）。
/// 3. 构造 Orchestrator，Ctrl-C 触发优雅停止。
/// 4. 运行结束后按判定结果返回退出码：通过为 0，未通过为 1。
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // 1. 配置与日志
    let path = settings::config_path(std::env::args().nth(1));
    let config = settings::load(&path)?;
    let _guard = logging::init(&config.logging)?;
    info!("Harness starting, config: {}", path.display());

    // 2. 数据源
    let source: Arc<dyn DataSource> = match config.data.source {
        DataSourceKind::File => Arc::new(FileDataSource::new(config.data.path.clone())),
        DataSourceKind::Sqlite => Arc::new(SqliteBarStore::open(&config.data.path).await?),
    };
    let registry = Arc::new(StrategyRegistry::with_builtins());

    // 3. 编排并运行
    let orchestrator = Arc::new(Orchestrator::initialize(config, source, registry).await?);
    let target = orchestrator.clone();
    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping simulation...");
            target.stop().await;
        }
    });

    let outcome = orchestrator.run().await;
    signals.abort();
    let outcome = outcome?;

    // 4. 结论
    info!(
        "Run {} finished ({}): stop reason {:?}, pushed {}/{} records",
        outcome.run_id,
        outcome.mode,
        outcome.stop_reason,
        outcome.metrics.records_pushed,
        outcome.metrics.total_records
    );
    if let Some(files) = &outcome.report {
        info!("Report: {}", files.markdown.display());
    }
    if outcome.verdict.passed {
        info!("Verdict: PASSED");
        Ok(ExitCode::SUCCESS)
    } else {
        for reason in &outcome.verdict.reasons {
            error!("Verdict: FAILED - {reason}");
        }
        Ok(ExitCode::FAILURE)
    }
}

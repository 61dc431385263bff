// src/main.rs
use anyhow::{Context, Result};
use broker_stats::config::AppConfig;
use broker_stats::core::engine::StatsEngine;
use chrono::Utc;
use dotenvy::dotenv;
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new().context("Failed to load configuration")?;
    let _log_guard = init_logging(&config);

    println!("========================================");
    println!("       BROKER STATS - v0.1.1");
    println!("========================================");
    println!("Account: {}", config.account_id);
    println!("Windows: {}", config.windows);
    println!("========================================");

    let params = config.engine_params(Utc::now())?;

    // 2. Initialize Components
    let source = config.export_paths().open().await?;
    let mut engine = StatsEngine::new(
        params,
        Box::new(source.clone()),
        Box::new(source.clone()),
        Box::new(source),
    );

    // 3. Run Engine
    let report = engine.run().await?;

    // 4. Write Report
    if let Some(parent) = config.out.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let data = serde_json::to_string_pretty(&report)?;
    tokio::fs::write(&config.out, data)
        .await
        .with_context(|| format!("Failed to write {}", config.out.display()))?;

    info!(
        "Wrote {} window records to {} (partial: {}, warnings: {})",
        report.windows.len(),
        config.out.display(),
        report.meta.partial,
        report.meta.warnings.len()
    );
    Ok(())
}

/// Stdout logging, mirrored to a daily file when `log_dir` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt().with_max_level(level);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "broker_stats.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .init();
            Some(guard)
        }
        None => {
            builder.init();
            None
        }
    }
}

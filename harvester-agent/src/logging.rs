use anyhow::Result;
use harvester::Config;
use std::env;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Log to stderr and to the configured log file.
///
/// `LOG_LEVEL` overrides `debugging.log_level`. The returned guard flushes the file
/// writer and must be held until exit.
pub fn init_logging(config: &Config) -> Result<WorkerGuard> {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| parse_level(&level))
        .unwrap_or_else(|_| parse_level(config.log_level()));

    let log_file = config.log_file();
    let log_dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "harvester.log".into());
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()?;

    Ok(guard)
}

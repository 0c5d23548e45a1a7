use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::EnvFilter;

use apihub::cli::{self, Cli, Commands, SimulationParams};
use apihub::config::LoggingConfig;
use apihub::dashboard::OutputMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli::load_config(&cli)?;

    match cli.command {
        Commands::Check => {
            init_logging_simple();
            cli::run_check(&config)
        }
        Commands::Simulate {
            service,
            calls,
            workers,
            failure_rate,
            latency_ms,
            export,
            json,
        } => {
            init_logging(&config.logging);
            info!(services = config.services.len(), "Configuration loaded");

            let params = SimulationParams {
                service,
                calls,
                workers,
                failure_rate,
                latency: Duration::from_millis(latency_ms),
            };
            cli::run_simulate(&config, params, export, OutputMode::from_json_flag(json)).await
        }
    }
}

/// Console logging plus an optional daily-rotated file
fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},apihub={}", config.level, config.level)));

    let file_layer = config.dir.as_deref().and_then(file_writer).map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });
    let file_logging_enabled = file_layer.is_some();

    let (json_layer, text_layer) = if config.json {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init();

    if let (true, Some(dir)) = (file_logging_enabled, &config.dir) {
        eprintln!("Logging to: {}/apihub.log", dir.display());
    }
}

fn file_writer(log_dir: &Path) -> Option<NonBlocking> {
    // rolling::daily panics when the first file can't be created
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Warning: Could not create log directory {} ({}), file logging disabled",
            log_dir.display(),
            e
        );
        return None;
    }
    let probe = log_dir.join(".apihub_write_test");
    if let Err(e) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
    {
        eprintln!(
            "Warning: Could not write to log directory {} ({}), file logging disabled",
            log_dir.display(),
            e
        );
        return None;
    }
    let _ = std::fs::remove_file(&probe);

    let appender = tracing_appender::rolling::daily(log_dir, "apihub.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    // The process is short-lived; keep the writer alive until exit
    Box::leak(Box::new(guard));

    Some(non_blocking)
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .try_init();
}

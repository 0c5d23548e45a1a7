use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::coordination::CoordinationHub;
use crate::dashboard::{self, OutputMode};
use crate::error::CallError;

#[derive(Parser)]
#[command(name = "apihub")]
#[command(version)]
#[command(about = "Rate limiting, circuit breaking and health tracking for external API calls", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "APIHUB_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration, then list services
    Check,
    /// Drive synthetic load through a hub built from the configuration
    Simulate {
        /// Service to call
        #[arg(short, long)]
        service: String,
        /// Total number of calls
        #[arg(long, default_value = "100")]
        calls: u32,
        /// Concurrent workers
        #[arg(short, long, default_value = "4")]
        workers: u32,
        /// Probability that a simulated call fails (0.0 - 1.0)
        #[arg(long, default_value = "0.1")]
        failure_rate: f64,
        /// Simulated latency per call in milliseconds
        #[arg(long, default_value = "20")]
        latency_ms: u64,
        /// Write the final metrics snapshot to this JSON file
        #[arg(long)]
        export: Option<PathBuf>,
        /// Print the final snapshot as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct ServiceConfigRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Pri")]
    priority: u8,
    #[tabled(rename = "Rate")]
    rate: String,
    #[tabled(rename = "Breaker")]
    breaker: String,
    #[tabled(rename = "Timeout s")]
    call_timeout: f64,
    #[tabled(rename = "Retries")]
    max_retries: u32,
}

/// Load configuration and fail with every validation problem at once
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;

    if let Err(errors) = config.validate() {
        bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(config)
}

pub fn run_check(config: &AppConfig) -> anyhow::Result<()> {
    let rows: Vec<ServiceConfigRow> = config
        .services_by_priority()
        .into_iter()
        .map(|(name, s)| ServiceConfigRow {
            service: name.clone(),
            priority: s.priority,
            rate: format!("{} / {}s", s.rate_limit, s.time_window_secs),
            breaker: format!(
                "{} fails, {}s, {} ok",
                s.circuit_breaker_threshold,
                s.circuit_breaker_timeout_secs,
                s.circuit_breaker_success_threshold
            ),
            call_timeout: s.call_timeout_secs,
            max_retries: s.max_retries,
        })
        .collect();

    if rows.is_empty() {
        println!("Configuration is valid, no services configured");
    } else {
        println!("{}", Table::new(&rows));
        println!("Configuration is valid ({} services)", rows.len());
    }
    Ok(())
}

/// Settings for a synthetic load run
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub service: String,
    pub calls: u32,
    pub workers: u32,
    pub failure_rate: f64,
    pub latency: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("simulated upstream failure")]
struct SimulatedFailure;

/// Run `calls` coordinated calls across `workers` tasks and return the hub
pub async fn simulate(
    config: &AppConfig,
    params: SimulationParams,
) -> anyhow::Result<Arc<CoordinationHub>> {
    if !(0.0..=1.0).contains(&params.failure_rate) {
        bail!("failure rate must be between 0 and 1");
    }
    if params.workers == 0 {
        bail!("at least one worker is required");
    }

    let hub = Arc::new(CoordinationHub::from_config(config)?);
    if !hub.is_registered(&params.service) {
        bail!(
            "service '{}' is not configured (known: {})",
            params.service,
            hub.service_names().join(", ")
        );
    }

    info!(
        service = %params.service,
        calls = params.calls,
        workers = params.workers,
        "Starting simulation"
    );

    let remaining = Arc::new(AtomicU32::new(params.calls));
    let mut handles = Vec::with_capacity(params.workers as usize);

    for worker in 0..params.workers {
        let handle = hub.coordinate(&params.service);
        let remaining = Arc::clone(&remaining);
        let failure_rate = params.failure_rate;
        let latency = params.latency;

        handles.push(tokio::spawn(async move {
            while remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                let fail = rand::thread_rng().gen_bool(failure_rate);
                let result = handle
                    .call_async(|| async move {
                        tokio::time::sleep(latency).await;
                        if fail {
                            Err(SimulatedFailure)
                        } else {
                            Ok(())
                        }
                    })
                    .await;

                match result {
                    Ok(()) => {}
                    Err(CallError::Failed(err)) => debug!(worker, "Call failed: {}", err),
                    Err(CallError::Rejected(err)) => {
                        debug!(worker, "Call rejected: {}", err);
                        // Back off the way a real caller would
                        if let Some(wait) = err.retry_after() {
                            tokio::time::sleep(wait.min(Duration::from_millis(50))).await;
                        }
                    }
                }
            }
        }));
    }

    for handle in futures::future::join_all(handles).await {
        handle.context("simulation worker panicked")?;
    }

    Ok(hub)
}

pub async fn run_simulate(
    config: &AppConfig,
    params: SimulationParams,
    export: Option<PathBuf>,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let hub = simulate(config, params).await?;

    dashboard::print_snapshot(&hub.snapshot_all(), mode)?;

    if let Some(path) = export {
        hub.export_metrics(&path)
            .with_context(|| format!("exporting metrics to {}", path.display()))?;
        if mode == OutputMode::Table {
            println!("Metrics written to {}", path.display());
        }
    }
    Ok(())
}

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Services to register at start-up, keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Per-service limits and resilience settings, fixed at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Token capacity of the rate limiter
    pub rate_limit: u32,
    /// Seconds to refill the whole capacity
    pub time_window_secs: f64,
    /// Consecutive failures that open the circuit
    pub circuit_breaker_threshold: u32,
    /// Seconds the circuit stays open before a probe is allowed
    pub circuit_breaker_timeout_secs: f64,
    /// Consecutive half-open successes that close the circuit
    pub circuit_breaker_success_threshold: u32,
    /// Advisory per-call timeout; callers apply it to their own I/O
    pub call_timeout_secs: f64,
    /// Advisory retry budget; the hub never retries on its own
    pub max_retries: u32,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub health: HealthConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rate_limit: 60,
            time_window_secs: 60.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60.0,
            circuit_breaker_success_threshold: 1,
            call_timeout_secs: 30.0,
            max_retries: 3,
            priority: 5,
            health: HealthConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.rate_limit as f64 / self.time_window_secs
    }

    /// Refill window; out-of-range values saturate, `validate` rejects them
    pub fn time_window(&self) -> Duration {
        secs_to_duration(self.time_window_secs)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        secs_to_duration(self.circuit_breaker_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        secs_to_duration(self.call_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rate_limit == 0 {
            errors.push("rate_limit must be positive".to_string());
        }

        // Anything under a nanosecond truncates to a zero window
        match Duration::try_from_secs_f64(self.time_window_secs) {
            Ok(window) if !window.is_zero() => {}
            _ => errors.push(format!(
                "time_window_secs must be between 1e-9 and {} seconds, got {}",
                Duration::MAX.as_secs(),
                self.time_window_secs
            )),
        }

        if self.circuit_breaker_threshold == 0 {
            errors.push("circuit_breaker_threshold must be positive".to_string());
        }

        if Duration::try_from_secs_f64(self.circuit_breaker_timeout_secs).is_err() {
            errors.push(format!(
                "circuit_breaker_timeout_secs must be between 0 and {} seconds, got {}",
                Duration::MAX.as_secs(),
                self.circuit_breaker_timeout_secs
            ));
        }

        if self.circuit_breaker_success_threshold == 0 {
            errors.push("circuit_breaker_success_threshold must be positive".to_string());
        }

        match Duration::try_from_secs_f64(self.call_timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => {}
            _ => errors.push(format!(
                "call_timeout_secs must be between 1e-9 and {} seconds, got {}",
                Duration::MAX.as_secs(),
                self.call_timeout_secs
            )),
        }

        if !(1..=10).contains(&self.priority) {
            errors.push(format!("priority must be between 1 and 10, got {}", self.priority));
        }

        if let Err(health_errors) = self.health.validate() {
            errors.extend(health_errors.into_iter().map(|e| format!("health.{e}")));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Health window and scoring thresholds for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of most recent outcomes kept for scoring
    pub window_size: usize,
    /// Average latency (seconds) above which the score is penalised
    pub latency_baseline_secs: f64,
    /// Upper bound of the latency penalty, in [0, 1]
    pub max_latency_penalty: f64,
    /// Minimum score reported as healthy
    pub healthy_threshold: f64,
    /// Minimum score reported as degraded
    pub degraded_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            latency_baseline_secs: 1.0,
            max_latency_penalty: 0.5,
            healthy_threshold: 0.9,
            degraded_threshold: 0.5,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.window_size == 0 {
            errors.push("window_size must be positive".to_string());
        }

        if !self.latency_baseline_secs.is_finite() || self.latency_baseline_secs <= 0.0 {
            errors.push("latency_baseline_secs must be a positive number".to_string());
        }

        if !(0.0..=1.0).contains(&self.max_latency_penalty) {
            errors.push("max_latency_penalty must be between 0 and 1".to_string());
        }

        let thresholds_ordered = (0.0..=1.0).contains(&self.degraded_threshold)
            && (0.0..=1.0).contains(&self.healthy_threshold)
            && self.degraded_threshold <= self.healthy_threshold;
        if !thresholds_ordered {
            errors.push(
                "thresholds must satisfy 0 <= degraded_threshold <= healthy_threshold <= 1"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rotated log files; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("APIHUB_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (APIHUB__SERVICES__GITHUB__RATE_LIMIT, etc.)
            .add_source(
                Environment::with_prefix("APIHUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate every configured service, collecting all problems
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .services
            .iter()
            .filter_map(|(name, service)| service.validate().err().map(|e| (name, e)))
            .flat_map(|(name, errs)| errs.into_iter().map(move |e| format!("{name}: {e}")))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Service names ordered by descending priority, then by name
    pub fn services_by_priority(&self) -> Vec<(&String, &ServiceConfig)> {
        let mut services: Vec<_> = self.services.iter().collect();
        services.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(b.0)));
        services
    }
}

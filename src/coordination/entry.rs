//! Per-service state owned by the hub registry.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::health::{HealthMonitor, HealthStatus};
use super::metrics::{MetricsCollector, ServiceMetrics};
use super::token_bucket::TokenBucket;
use crate::config::ServiceConfig;
use crate::error::{HubError, Result};

/// Everything the hub tracks for one registered service.
///
/// Each component guards its own state, so no lock spans more than one
/// bookkeeping step and none is held while the caller's function runs.
#[derive(Debug)]
pub struct ServiceEntry {
    name: String,
    config: ServiceConfig,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    health: HealthMonitor,
    metrics: MetricsCollector,
}

impl ServiceEntry {
    /// Build the entry from an already validated config
    pub(crate) fn new(name: String, config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            bucket: TokenBucket::with_window(config.rate_limit, config.time_window())?,
            breaker: CircuitBreaker::new(name.clone(), CircuitBreakerConfig::from(&config)),
            health: HealthMonitor::new(config.health.clone())?,
            metrics: MetricsCollector::new(),
            name,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Circuit check followed by token consumption.
    ///
    /// Rejections are counted here; admitted calls are counted once their
    /// outcome is known.
    pub(crate) fn admit(&self) -> Result<()> {
        if let Err(retry_after) = self.breaker.admit() {
            self.metrics.record_circuit_rejected();
            return Err(HubError::CircuitBreakerOpen {
                name: self.name.clone(),
                retry_after,
            });
        }

        if let Err(retry_after) = self.bucket.try_acquire(1) {
            self.metrics.record_rate_limited();
            debug!(service = %self.name, ?retry_after, "Rate limit exceeded");
            return Err(HubError::RateLimitExceeded {
                name: self.name.clone(),
                retry_after,
            });
        }

        Ok(())
    }

    /// Feed a finished call into breaker, health window and metrics
    pub(crate) fn record(&self, success: bool, latency: Duration) {
        self.breaker.record_outcome(success);
        self.health.record(success, latency);
        if success {
            self.metrics.record_success(latency);
        } else {
            self.metrics.record_failure();
        }
    }

    /// Return to the freshly registered state
    pub(crate) fn reset(&self) {
        self.bucket.reset();
        self.breaker.force_reset();
        self.health.reset();
        self.metrics.reset();
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let metrics = self.metrics.snapshot();
        let health = self.health.summary();
        let breaker = self.breaker.stats();

        ServiceSnapshot {
            total_requests: metrics.total_requests,
            successful_requests: metrics.successful_requests,
            failed_requests: metrics.failed_requests,
            rate_limited_requests: metrics.rate_limited_requests,
            circuit_rejected_requests: metrics.circuit_rejected_requests,
            success_rate: metrics.success_rate(),
            avg_latency: metrics.avg_latency(),
            min_latency: metrics.min_latency(),
            max_latency: metrics.max_latency(),
            health_status: health.status,
            health_score: health.score,
            circuit_state: breaker.state,
            consecutive_failures: breaker.consecutive_failures,
            total_trips: breaker.total_trips,
            available_tokens: self.bucket.available(),
            priority: self.config.priority,
        }
    }

    pub fn metrics_snapshot(&self) -> ServiceMetrics {
        self.metrics.snapshot()
    }
}

/// Exported view of one service; latencies are in seconds
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub circuit_rejected_requests: u64,
    pub success_rate: f64,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub health_status: HealthStatus,
    pub health_score: f64,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub total_trips: u64,
    pub available_tokens: f64,
    pub priority: u8,
}

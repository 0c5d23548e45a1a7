use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters and latency aggregates for one service.
///
/// `total_requests` covers successes, failures and rate-limited calls.
/// Calls refused by an open circuit are counted only in
/// `circuit_rejected_requests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub circuit_rejected_requests: u64,
    /// Sum of successful call latencies, in seconds
    pub latency_sum: f64,
    pub latency_min: Option<f64>,
    pub latency_max: Option<f64>,
}

impl ServiceMetrics {
    /// Fraction of requests that succeeded, zero before any request
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Mean latency of successful calls, in seconds
    pub fn avg_latency(&self) -> f64 {
        if self.successful_requests == 0 {
            0.0
        } else {
            self.latency_sum / self.successful_requests as f64
        }
    }

    pub fn min_latency(&self) -> f64 {
        self.latency_min.unwrap_or(0.0)
    }

    pub fn max_latency(&self) -> f64 {
        self.latency_max.unwrap_or(0.0)
    }
}

/// Metrics collector for one service
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<ServiceMetrics>,
}

impl MetricsCollector {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call and its latency
    pub fn record_success(&self, latency: Duration) {
        let latency = latency.as_secs_f64();
        let mut m = self.inner.lock();
        m.total_requests += 1;
        m.successful_requests += 1;
        m.latency_sum += latency;
        m.latency_min = Some(m.latency_min.map_or(latency, |min| min.min(latency)));
        m.latency_max = Some(m.latency_max.map_or(latency, |max| max.max(latency)));
    }

    /// Record a call that ran and failed
    pub fn record_failure(&self) {
        let mut m = self.inner.lock();
        m.total_requests += 1;
        m.failed_requests += 1;
    }

    /// Record a call denied by the rate limiter
    pub fn record_rate_limited(&self) {
        let mut m = self.inner.lock();
        m.total_requests += 1;
        m.rate_limited_requests += 1;
    }

    /// Record a call refused by an open circuit
    pub fn record_circuit_rejected(&self) {
        self.inner.lock().circuit_rejected_requests += 1;
    }

    /// Consistent copy of the current counters
    pub fn snapshot(&self) -> ServiceMetrics {
        self.inner.lock().clone()
    }

    pub fn reset(&self) {
        *self.inner.lock() = ServiceMetrics::default();
    }
}

//! Rolling Service Health
//!
//! Keeps the most recent call outcomes for a service in a count-bounded
//! window and condenses them into a score in `[0, 1]`:
//!
//! ```text
//! score   = success_rate * (1 - penalty)
//! penalty = max_latency_penalty * (1 - baseline / avg_latency)   if avg_latency > baseline
//!         = 0                                                     otherwise
//! ```
//!
//! The penalty grows smoothly from zero at the baseline towards
//! `max_latency_penalty` as latency increases, so the score falls with both
//! failures and latency and never leaves `[0, 1]`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::HealthConfig;
use crate::error::{HubError, Result};

/// Health status for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No outcomes recorded yet
    Unknown,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of one coordinated call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_seconds: f64,
}

/// Condensed view of the health window
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub score: f64,
    pub samples: usize,
    pub success_rate: f64,
    pub avg_latency_secs: f64,
}

/// Rolling health window for one service
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    records: Mutex<VecDeque<HealthRecord>>,
}

impl HealthMonitor {
    /// Create a monitor, rejecting settings that `HealthConfig::validate` refuses
    pub fn new(config: HealthConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|reasons| HubError::InvalidComponent {
                component: "health monitor",
                reasons,
            })?;
        Ok(Self::from_valid(config))
    }

    pub fn with_defaults() -> Self {
        Self::from_valid(HealthConfig::default())
    }

    fn from_valid(config: HealthConfig) -> Self {
        let capacity = config.window_size;
        Self {
            config,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Append an outcome, evicting the oldest beyond the window size
    pub fn record(&self, success: bool, latency: Duration) {
        let mut records = self.records.lock();
        while records.len() >= self.config.window_size {
            records.pop_front();
        }
        records.push_back(HealthRecord {
            timestamp: Utc::now(),
            success,
            latency_seconds: latency.as_secs_f64(),
        });
    }

    /// Score in `[0, 1]`; an empty window scores zero
    pub fn health_score(&self) -> f64 {
        self.summary().score
    }

    pub fn status(&self) -> HealthStatus {
        self.summary().status
    }

    /// Number of outcomes currently in the window
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the window, oldest first
    pub fn records(&self) -> Vec<HealthRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn summary(&self) -> HealthSummary {
        let records = self.records.lock();
        let samples = records.len();

        if samples == 0 {
            return HealthSummary {
                status: HealthStatus::Unknown,
                score: 0.0,
                samples: 0,
                success_rate: 0.0,
                avg_latency_secs: 0.0,
            };
        }

        let successes = records.iter().filter(|r| r.success).count();
        let latency_sum: f64 = records.iter().map(|r| r.latency_seconds).sum();
        drop(records);

        let success_rate = successes as f64 / samples as f64;
        let avg_latency_secs = latency_sum / samples as f64;
        let score = (success_rate * (1.0 - self.latency_penalty(avg_latency_secs))).clamp(0.0, 1.0);

        HealthSummary {
            status: self.classify(score),
            score,
            samples,
            success_rate,
            avg_latency_secs,
        }
    }

    /// Drop all recorded outcomes
    pub fn reset(&self) {
        self.records.lock().clear();
    }

    fn latency_penalty(&self, avg_latency_secs: f64) -> f64 {
        let baseline = self.config.latency_baseline_secs;
        if !avg_latency_secs.is_finite() {
            return self.config.max_latency_penalty;
        }
        if avg_latency_secs <= baseline {
            return 0.0;
        }
        self.config.max_latency_penalty * (1.0 - baseline / avg_latency_secs)
    }

    fn classify(&self, score: f64) -> HealthStatus {
        if score >= self.config.healthy_threshold {
            HealthStatus::Healthy
        } else if score >= self.config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

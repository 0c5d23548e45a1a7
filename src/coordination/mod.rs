//! Coordination Layer for Calls to External Services
//!
//! This module provides the per-service machinery behind the hub:
//! - Token bucket rate limiting with fail-fast admission
//! - Circuit breaker with lazy half-open probing
//! - Rolling health window and score
//! - Request counters and latency aggregates
//! - The hub registry that ties them together

pub mod circuit_breaker;
pub mod entry;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod token_bucket;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, TripReason,
};
pub use entry::{ServiceEntry, ServiceSnapshot};
pub use health::{HealthMonitor, HealthRecord, HealthStatus, HealthSummary};
pub use hub::{Coordinated, CoordinationHub, HubSnapshot};
pub use metrics::{MetricsCollector, ServiceMetrics};
pub use token_bucket::TokenBucket;

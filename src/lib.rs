pub mod cli;
pub mod config;
pub mod coordination;
pub mod dashboard;
pub mod error;

pub use config::{AppConfig, HealthConfig, LoggingConfig, ServiceConfig};
pub use coordination::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, Coordinated,
    CoordinationHub, HealthMonitor, HealthStatus, HubSnapshot, MetricsCollector, ServiceMetrics,
    ServiceSnapshot, TokenBucket,
};
pub use error::{CallError, HubError, Result};

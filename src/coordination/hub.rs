//! Coordination Hub
//!
//! Registry of rate-limited external services and the single admission path
//! for calls to them. Construct one hub per process and share it by `Arc`.
//!
//! A coordinated call:
//! 1. looks up the service (`UnknownService` if absent),
//! 2. consults the circuit breaker (`CircuitBreakerOpen` with a retry hint),
//! 3. takes one token (`RateLimitExceeded` with a retry hint, never waits),
//! 4. runs the caller's function and times it,
//! 5. records the outcome into breaker, health window and metrics,
//! 6. hands back the function's value, or its error unchanged.
//!
//! The hub never retries. A panic inside the caller's function counts as a
//! failure and is resumed after bookkeeping.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::circuit_breaker::{CircuitBreakerStats, CircuitState};
use super::entry::{ServiceEntry, ServiceSnapshot};
use super::health::HealthStatus;
use super::metrics::ServiceMetrics;
use crate::config::{AppConfig, ServiceConfig};
use crate::error::{CallError, HubError, Result};

/// Point-in-time view of every registered service
#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub generated_at: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceSnapshot>,
}

/// Registry and orchestrator for coordinated calls
#[derive(Debug, Default)]
pub struct CoordinationHub {
    services: DashMap<String, Arc<ServiceEntry>>,
}

impl CoordinationHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a hub with every configured service registered, highest priority first
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let hub = Self::new();
        for (name, service) in config.services_by_priority() {
            hub.register(name.as_str(), service.clone())?;
        }
        Ok(hub)
    }

    /// Register a service.
    ///
    /// Registration is not idempotent: a second registration under the same
    /// name fails with `AlreadyRegistered` and leaves the first untouched.
    pub fn register(&self, name: impl Into<String>, config: ServiceConfig) -> Result<()> {
        let name = name.into();
        if let Err(reasons) = config.validate() {
            return Err(HubError::InvalidConfig { name, reasons });
        }

        match self.services.entry(name) {
            Entry::Occupied(occupied) => Err(HubError::AlreadyRegistered {
                name: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                let entry = ServiceEntry::new(vacant.key().clone(), config)?;
                info!(
                    service = %vacant.key(),
                    rate_limit = entry.config().rate_limit,
                    window_secs = entry.config().time_window_secs,
                    "Registered service"
                );
                vacant.insert(Arc::new(entry));
                Ok(())
            }
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Registered service names, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Look up a service entry. The registry guard is released before returning.
    pub fn entry(&self, name: &str) -> Result<Arc<ServiceEntry>> {
        self.services
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HubError::UnknownService {
                name: name.to_string(),
            })
    }

    /// Run `f` under the service's rate limit and circuit breaker
    pub fn execute<T, E, F>(&self, name: &str, f: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let entry = self.entry(name)?;
        entry.admit()?;

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        let latency = started.elapsed();

        match outcome {
            Ok(result) => {
                entry.record(result.is_ok(), latency);
                result.map_err(CallError::Failed)
            }
            Err(payload) => {
                entry.record(false, latency);
                warn!(service = %name, "Coordinated call panicked");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Async counterpart of [`execute`](Self::execute).
    ///
    /// No hub lock is held while the future is pending.
    pub async fn execute_async<T, E, F, Fut>(
        &self,
        name: &str,
        f: F,
    ) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let entry = self.entry(name)?;
        entry.admit()?;

        let started = Instant::now();
        let outcome = AssertUnwindSafe(async move { f().await })
            .catch_unwind()
            .await;
        let latency = started.elapsed();

        match outcome {
            Ok(result) => {
                entry.record(result.is_ok(), latency);
                result.map_err(CallError::Failed)
            }
            Err(payload) => {
                entry.record(false, latency);
                warn!(service = %name, "Coordinated call panicked");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Handle that runs calls against one service.
    ///
    /// The name is resolved on each call, so an unregistered name yields
    /// `UnknownService` at call time exactly as `execute` would.
    pub fn coordinate(self: &Arc<Self>, name: &str) -> Coordinated {
        Coordinated {
            hub: Arc::clone(self),
            name: Arc::from(name),
        }
    }

    pub fn health_status(&self, name: &str) -> Result<HealthStatus> {
        Ok(self.entry(name)?.health().status())
    }

    pub fn health_score(&self, name: &str) -> Result<f64> {
        Ok(self.entry(name)?.health().health_score())
    }

    pub fn circuit_state(&self, name: &str) -> Result<CircuitState> {
        Ok(self.entry(name)?.breaker().current_state())
    }

    pub fn circuit_stats(&self, name: &str) -> Result<CircuitBreakerStats> {
        Ok(self.entry(name)?.breaker().stats())
    }

    pub fn available_tokens(&self, name: &str) -> Result<f64> {
        Ok(self.entry(name)?.bucket().available())
    }

    /// Time until the next call would pass the rate limiter
    pub fn time_until_available(&self, name: &str) -> Result<Duration> {
        Ok(self.entry(name)?.bucket().time_until_available(1))
    }

    pub fn service_config(&self, name: &str) -> Result<ServiceConfig> {
        Ok(self.entry(name)?.config().clone())
    }

    pub fn metrics(&self, name: &str) -> Result<ServiceMetrics> {
        Ok(self.entry(name)?.metrics_snapshot())
    }

    pub fn all_metrics(&self) -> BTreeMap<String, ServiceMetrics> {
        self.entries()
            .into_iter()
            .map(|entry| (entry.name().to_string(), entry.metrics_snapshot()))
            .collect()
    }

    pub fn snapshot(&self, name: &str) -> Result<ServiceSnapshot> {
        Ok(self.entry(name)?.snapshot())
    }

    pub fn snapshot_all(&self) -> HubSnapshot {
        HubSnapshot {
            generated_at: Utc::now(),
            services: self
                .entries()
                .into_iter()
                .map(|entry| (entry.name().to_string(), entry.snapshot()))
                .collect(),
        }
    }

    /// Administrative override back to Closed
    pub fn reset_circuit_breaker(&self, name: &str) -> Result<()> {
        self.entry(name)?.breaker().force_reset();
        Ok(())
    }

    /// Administrative trip, e.g. during a known upstream outage
    pub fn trip_circuit_breaker(&self, name: &str, reason: &str) -> Result<()> {
        self.entry(name)?.breaker().trip(reason);
        Ok(())
    }

    /// Reset bucket, breaker, health window and metrics of one service
    pub fn reset_service(&self, name: &str) -> Result<()> {
        self.entry(name)?.reset();
        info!(service = %name, "Service state reset");
        Ok(())
    }

    /// Write the snapshot of every service as pretty JSON
    pub fn export_metrics<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot_all();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)?;
        info!(
            "Exported metrics for {} services to {}",
            snapshot.services.len(),
            path.display()
        );
        Ok(())
    }

    /// Entries cloned out of the registry so no shard lock outlives the call
    fn entries(&self) -> Vec<Arc<ServiceEntry>> {
        self.services.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

/// Curried form of [`CoordinationHub::execute`] bound to one service
#[derive(Debug, Clone)]
pub struct Coordinated {
    hub: Arc<CoordinationHub>,
    name: Arc<str>,
}

impl Coordinated {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call<T, E, F>(&self, f: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.hub.execute(&self.name, f)
    }

    pub async fn call_async<T, E, F, Fut>(&self, f: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.hub.execute_async(&self.name, f).await
    }

    /// Wrap `f` so that every invocation goes through the hub
    pub fn wrap<T, E, F>(&self, f: F) -> impl Fn() -> std::result::Result<T, CallError<E>>
    where
        F: Fn() -> std::result::Result<T, E>,
    {
        let handle = self.clone();
        move || handle.call(&f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn hub_with(name: &str, config: ServiceConfig) -> Arc<CoordinationHub> {
        let hub = Arc::new(CoordinationHub::new());
        hub.register(name, config).unwrap();
        hub
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let hub = CoordinationHub::new();
        hub.register("github", ServiceConfig::default()).unwrap();

        let err = hub
            .register(
                "github",
                ServiceConfig {
                    rate_limit: 1,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, HubError::AlreadyRegistered { ref name } if name == "github"));

        // The original registration is untouched
        assert_eq!(hub.service_config("github").unwrap().rate_limit, 60);
    }

    #[test]
    fn test_register_rejects_invalid_config() {
        let hub = CoordinationHub::new();
        let err = hub
            .register(
                "github",
                ServiceConfig {
                    circuit_breaker_threshold: 0,
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, HubError::InvalidConfig { .. }));
        assert!(!hub.is_registered("github"));
    }

    #[test]
    fn test_unknown_service() {
        let hub = CoordinationHub::new();
        let result: std::result::Result<(), CallError<String>> = hub.execute("nope", || Ok(()));

        match result {
            Err(CallError::Rejected(HubError::UnknownService { name })) => assert_eq!(name, "nope"),
            other => panic!("Expected UnknownService, got {:?}", other),
        }
        assert!(hub.health_status("nope").is_err());
        assert!(hub.metrics("nope").is_err());
    }

    #[test]
    fn test_execute_returns_value_and_records_success() {
        let hub = hub_with("github", ServiceConfig::default());

        let value = hub.execute("github", || Ok::<_, String>(42)).unwrap();
        assert_eq!(value, 42);

        let metrics = hub.metrics("github").unwrap();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(hub.health_status("github").unwrap(), HealthStatus::Healthy);
    }

    #[test]
    fn test_caller_error_passes_through_unchanged() {
        let hub = hub_with("github", ServiceConfig::default());

        let err = hub
            .execute("github", || Err::<(), _>(std::io::Error::other("connection reset")))
            .unwrap_err();

        let inner = err.into_failure().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::Other);
        assert_eq!(inner.to_string(), "connection reset");
        assert_eq!(hub.metrics("github").unwrap().failed_requests, 1);
    }

    #[test]
    fn test_open_circuit_does_not_invoke_callee() {
        let hub = hub_with(
            "github",
            ServiceConfig {
                circuit_breaker_threshold: 1,
                ..Default::default()
            },
        );
        let calls = AtomicU32::new(0);

        let _ = hub.execute("github", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom")
        });
        let err = hub
            .execute("github", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let retry_after = err.retry_after().unwrap();
        assert!(retry_after > Duration::from_secs(59));
    }

    #[test]
    fn test_panicking_callee_counts_as_failure() {
        let hub = hub_with("github", ServiceConfig::default());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: std::result::Result<(), CallError<String>> =
                hub.execute("github", || panic!("callee exploded"));
        }));

        assert!(result.is_err());
        let metrics = hub.metrics("github").unwrap();
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.total_requests, 1);
    }

    #[test]
    fn test_coordinate_wraps_function() {
        let hub = hub_with(
            "scraper",
            ServiceConfig {
                rate_limit: 2,
                time_window_secs: 60.0,
                ..Default::default()
            },
        );

        let fetch = hub.coordinate("scraper").wrap(|| Ok::<_, String>("page"));
        assert_eq!(fetch().unwrap(), "page");
        assert_eq!(fetch().unwrap(), "page");

        let err = fetch().unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(HubError::RateLimitExceeded { .. })
        ));
        assert_eq!(hub.metrics("scraper").unwrap().rate_limited_requests, 1);
    }

    #[test]
    fn test_coordinate_unknown_name_fails_at_call_time() {
        let hub = Arc::new(CoordinationHub::new());
        let handle = hub.coordinate("later");
        assert!(handle.call(|| Ok::<_, String>(())).is_err());

        hub.register("later", ServiceConfig::default()).unwrap();
        assert!(handle.call(|| Ok::<_, String>(())).is_ok());
    }

    #[test]
    fn test_manual_trip_and_reset() {
        let hub = hub_with("github", ServiceConfig::default());

        hub.trip_circuit_breaker("github", "upstream incident").unwrap();
        assert_eq!(hub.circuit_state("github").unwrap(), CircuitState::Open);
        assert!(hub.execute("github", || Ok::<_, String>(())).is_err());

        hub.reset_circuit_breaker("github").unwrap();
        assert_eq!(hub.circuit_state("github").unwrap(), CircuitState::Closed);
        assert!(hub.execute("github", || Ok::<_, String>(())).is_ok());

        let metrics = hub.metrics("github").unwrap();
        assert_eq!(metrics.circuit_rejected_requests, 1);
        assert_eq!(metrics.total_requests, 1);
    }

    #[test]
    fn test_from_config_registers_all_services() {
        let mut config = AppConfig::default();
        config
            .services
            .insert("github".to_string(), ServiceConfig::default());
        config.services.insert(
            "scraper".to_string(),
            ServiceConfig {
                priority: 2,
                ..Default::default()
            },
        );

        let hub = CoordinationHub::from_config(&config).unwrap();
        assert_eq!(hub.service_names(), vec!["github", "scraper"]);
        assert_eq!(hub.all_metrics().len(), 2);
    }

    #[test]
    fn test_time_until_available() {
        let hub = hub_with(
            "github",
            ServiceConfig {
                rate_limit: 1,
                time_window_secs: 10.0,
                ..Default::default()
            },
        );
        assert_eq!(hub.time_until_available("github").unwrap(), Duration::ZERO);

        hub.execute("github", || Ok::<_, String>(())).unwrap();
        let wait = hub.time_until_available("github").unwrap();
        assert!(wait > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_execute_async() {
        let hub = hub_with("github", ServiceConfig::default());

        let value = hub
            .execute_async("github", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, String>("done")
            })
            .await
            .unwrap();
        assert_eq!(value, "done");

        let err = hub
            .execute_async("github", || async { Err::<(), _>("timeout".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.into_failure().as_deref(), Some("timeout"));

        let metrics = hub.metrics("github").unwrap();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
        assert!(metrics.min_latency() >= 0.01);
    }
}

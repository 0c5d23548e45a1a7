use std::time::Duration;
use thiserror::Error;

/// Conditions signalled by the hub itself
#[derive(Error, Debug)]
pub enum HubError {
    // Registry errors
    #[error("Unknown service: {name}")]
    UnknownService { name: String },

    #[error("Service already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Invalid configuration for '{name}': {}", .reasons.join("; "))]
    InvalidConfig { name: String, reasons: Vec<String> },

    #[error("Invalid {component} settings: {}", .reasons.join("; "))]
    InvalidComponent {
        component: &'static str,
        reasons: Vec<String>,
    },

    // Admission errors
    #[error("Rate limit exceeded for '{name}', retry after {:.3}s", .retry_after.as_secs_f64())]
    RateLimitExceeded { name: String, retry_after: Duration },

    #[error("Circuit breaker open for '{name}', retry after {:.3}s", .retry_after.as_secs_f64())]
    CircuitBreakerOpen { name: String, retry_after: Duration },

    // Configuration loading
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Export errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Whether the call was refused before the callee ran
    pub fn is_admission_denied(&self) -> bool {
        matches!(
            self,
            HubError::RateLimitExceeded { .. } | HubError::CircuitBreakerOpen { .. }
        )
    }

    /// Suggested wait before retrying, for admission denials only
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HubError::RateLimitExceeded { retry_after, .. }
            | HubError::CircuitBreakerOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Service the error refers to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            HubError::UnknownService { name }
            | HubError::AlreadyRegistered { name }
            | HubError::InvalidConfig { name, .. }
            | HubError::RateLimitExceeded { name, .. }
            | HubError::CircuitBreakerOpen { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Result type alias for HubError
pub type Result<T> = std::result::Result<T, HubError>;

/// Outcome of a coordinated call that did not produce a value.
///
/// `Rejected` means the hub refused the call (the callee never ran, or the
/// service is unknown). `Failed` carries the callee's own error unchanged.
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error(transparent)]
    Rejected(#[from] HubError),

    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CallError::Rejected(_))
    }

    /// The hub error, if the call was rejected
    pub fn rejection(&self) -> Option<&HubError> {
        match self {
            CallError::Rejected(err) => Some(err),
            CallError::Failed(_) => None,
        }
    }

    /// Retry hint carried by an admission denial
    pub fn retry_after(&self) -> Option<Duration> {
        self.rejection().and_then(HubError::retry_after)
    }

    /// Unwrap the callee's error, if the callee ran and failed
    pub fn into_failure(self) -> Option<E> {
        match self {
            CallError::Failed(err) => Some(err),
            CallError::Rejected(_) => None,
        }
    }
}

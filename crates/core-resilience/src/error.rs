//! Error types for resilience primitives

use crate::quota::{QuotaUsage, QuotaWindow};
use std::time::Duration;
use thiserror::Error;

/// Result type for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors raised by the resilience primitives when used directly
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// The circuit is open; the upstream is judged unhealthy
    #[error("Circuit '{name}' is OPEN. Retry after {:.1}s", .retry_after.as_secs_f64())]
    CircuitOpen { name: String, retry_after: Duration },

    /// An hourly or daily ceiling has been reached
    #[error(
        "{name} {window} quota exceeded: {}/{} hourly, {}/{} daily",
        .usage.hourly_used,
        .usage.hourly_limit,
        .usage.daily_used,
        .usage.daily_limit_display()
    )]
    QuotaExceeded {
        name: String,
        window: QuotaWindow,
        usage: QuotaUsage,
    },

    /// The rate limiter can never grant the token this call needs
    #[error("{name} rate limit cannot grant tokens")]
    RateLimited { name: String },

    /// Persisted state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResilienceError {
    /// Suggested delay before retrying, when the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether a guard refused the call (as opposed to a storage problem)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. }
                | ResilienceError::QuotaExceeded { .. }
                | ResilienceError::RateLimited { .. }
        )
    }
}

/// Outcome of a call routed through a guard
///
/// `Rejected` means the wrapped function was never invoked; `Failed` carries
/// the wrapped function's own error untouched.
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error(transparent)]
    Rejected(ResilienceError),

    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    /// The upstream error, if the call was attempted and failed
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Failed(e) => Some(e),
            CallError::Rejected(_) => None,
        }
    }

    /// The guard error, if the call was refused
    pub fn rejection(&self) -> Option<&ResilienceError> {
        match self {
            CallError::Rejected(e) => Some(e),
            CallError::Failed(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CallError::Rejected(_))
    }
}

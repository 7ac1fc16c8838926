//! Tunegate Core Resilience: Pure-logic guards for flaky upstream APIs
//!
//! # Overview
//!
//! This crate provides the building blocks the gateway composes around every
//! call to an external service:
//!
//! - **Circuit Breaker**: Fails fast once an upstream keeps failing, probes it again after a cooldown
//! - **Quota Tracker**: Hourly and daily request ceilings, persisted across restarts
//! - **Rate Limiter**: Token buckets that pace requests, one bucket per upstream
//! - **Response Cache**: Bounded TTL memo of prior successful results
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Network protocols (HTTP clients, auth)
//! - Which upstreams exist or how they are configured
//! - Application-specific payloads
//!
//! Every primitive is synchronous and safe to share between threads. State
//! transitions (circuit cooldowns, quota window rollovers, token refills) are
//! evaluated lazily on access; nothing runs in the background.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Gateway / Application           │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Response Cache                    │  ← Serve repeats locally
//! │  (TTL expiry, oldest-first eviction)    │
//! └─────────────┬───────────────────────────┘
//!               │ miss
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Pace requests
//! │  (Token bucket, blocks until refill)    │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Quota Tracker                     │  ← Hourly/daily ceilings
//! │  (UTC windows, persisted to disk)       │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Sliding failure window, half-open)    │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//! ```
//!
//! # Usage Example
//!
//! ## Basic Circuit Breaker
//!
//! ```
//! use tunegate_core_resilience::{CallError, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 3,
//!     recovery_timeout: Duration::from_secs(15),
//!     ..Default::default()
//! };
//! let breaker = CircuitBreaker::new("groq", config);
//!
//! let result: Result<u32, CallError<String>> = breaker.call(|| Ok(42));
//! assert_eq!(result.ok(), Some(42));
//! ```
//!
//! ## Quota Tracking
//!
//! ```
//! use tunegate_core_resilience::{QuotaConfig, QuotaTracker};
//!
//! let quota = QuotaTracker::in_memory(
//!     "huggingface",
//!     QuotaConfig { hourly_limit: 250, daily_limit: Some(800) },
//! );
//!
//! if quota.can_consume(1) {
//!     quota.consume(1).unwrap();
//! }
//! assert_eq!(quota.usage().hourly_used, 1);
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod quota;
pub mod rate_limiter;

// Re-export main types for convenience
pub use cache::{fingerprint, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use error::{CallError, ResilienceError};
pub use quota::{
    PersistedQuota, QuotaConfig, QuotaReport, QuotaStatus, QuotaTracker, QuotaUsage, QuotaWindow,
};
pub use rate_limiter::{BucketConfig, RateLimitStats, RateLimiter, TokenBucket};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tunegate_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::cache::{fingerprint, ResponseCache};
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::{CallError, ResilienceError};
    pub use super::quota::{QuotaConfig, QuotaStatus, QuotaTracker, QuotaUsage};
    pub use super::rate_limiter::{BucketConfig, RateLimiter, TokenBucket};
}

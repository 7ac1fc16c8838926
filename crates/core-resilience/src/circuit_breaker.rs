//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when an
//! upstream is experiencing issues. It has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Upstream is unhealthy, calls fail immediately
//! - HalfOpen: Testing if the upstream has recovered with a bounded number of trial calls
//!
//! Failures are counted over a sliding window. State transitions are
//! recomputed under the lock on every access; there is no timer thread.

use crate::error::{CallError, ResilienceError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls are rejected without invoking the upstream
    Open,
    /// Circuit is half-open, a bounded number of trial calls may pass
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of failures within `failure_window` that opens the circuit
    pub failure_threshold: usize,
    /// Sliding window over which failures are counted
    pub failure_window: Duration,
    /// Time the circuit stays open before admitting trial calls
    pub recovery_timeout: Duration,
    /// Trial calls permitted while half-open
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

/// Snapshot of circuit breaker counters
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub current_state: CircuitState,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            state_changes: 0,
            last_failure_time: None,
            last_success_time: None,
            current_state: CircuitState::Closed,
        }
    }

    /// Fraction of calls that failed (0.0 when no calls were made)
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failed_calls as f64 / self.total_calls as f64
    }

    /// Fraction of calls that succeeded (1.0 when no calls were made)
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.successful_calls as f64 / self.total_calls as f64
    }
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    /// Timestamps of recent failures
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Trial calls admitted since entering half-open
    half_open_issued: usize,
    /// Trial calls admitted but not yet settled
    half_open_in_flight: usize,
    /// Bumped on every transition so stale trial permits can be told apart
    generation: u64,
    stats: CircuitStats,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_issued: 0,
            half_open_in_flight: 0,
            generation: 0,
            stats: CircuitStats::new(),
        }
    }

    fn prune_failures(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Admission ticket for one call
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    /// Generation of the half-open period this trial belongs to
    trial: Option<u64>,
    settled: bool,
}

impl Permit<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // The wrapped function unwound without an outcome; free the trial slot.
        if !self.settled {
            if let Some(generation) = self.trial {
                let mut state = self.breaker.state.lock();
                if state.generation == generation {
                    state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                }
            }
        }
    }
}

/// Circuit breaker for protecting against cascading failures
///
/// Clones share the same state, so one breaker per upstream can be handed to
/// any number of threads.
///
/// # Example
/// ```
/// use tunegate_core_resilience::{CallError, CircuitBreaker, CircuitBreakerConfig};
///
/// let breaker = CircuitBreaker::new("huggingface", CircuitBreakerConfig::default());
///
/// let result: Result<u32, CallError<String>> = breaker.call(|| Ok(42));
/// assert_eq!(result.unwrap(), 42);
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        tracing::info!(
            circuit = %name,
            threshold = config.failure_threshold,
            "Circuit breaker initialized"
        );
        Self {
            name: Arc::from(name),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, after applying any pending lazy transition
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.refresh(&mut state, Instant::now());
        state.state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Whether a call made now would be admitted
    ///
    /// True when closed, or half-open with a free trial slot. Does not
    /// reserve the slot.
    pub fn is_call_permitted(&self) -> bool {
        let mut state = self.state.lock();
        self.refresh(&mut state, Instant::now());
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => state.half_open_issued < self.config.half_open_max_calls,
        }
    }

    /// Time until a call would be admitted again (zero when permitted now)
    pub fn retry_after(&self) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refresh(&mut state, now);
        let permitted = match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => state.half_open_issued < self.config.half_open_max_calls,
        };
        if permitted {
            return Duration::ZERO;
        }
        self.rejected_delay(&state, now)
    }

    /// Snapshot of the breaker's counters
    pub fn stats(&self) -> CircuitStats {
        let mut state = self.state.lock();
        self.refresh(&mut state, Instant::now());
        let mut stats = state.stats.clone();
        stats.current_state = state.state;
        stats
    }

    /// Number of failures currently inside the sliding window
    pub fn recent_failures(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refresh(&mut state, now);
        state.prune_failures(now, self.config.failure_window);
        state.failures.len()
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Every error returned by `op` counts as a failure.
    pub fn call<F, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.call_filtered(op, |_| false)
    }

    /// Execute an operation, treating errors matched by `is_excluded` as successes
    ///
    /// Useful for deliberate outcomes such as "no results" that say nothing
    /// about the upstream's health. The excluded error is still returned.
    pub fn call_filtered<F, T, E, X>(&self, op: F, is_excluded: X) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        X: FnOnce(&E) -> bool,
    {
        let permit = self.admit().map_err(CallError::Rejected)?;

        match op() {
            Ok(result) => {
                permit.success();
                Ok(result)
            }
            Err(e) => {
                if is_excluded(&e) {
                    permit.success();
                } else {
                    permit.failure();
                }
                Err(CallError::Failed(e))
            }
        }
    }

    /// Wrap an operation so every invocation goes through this breaker
    pub fn protect<F, T, E>(&self, op: F) -> impl Fn() -> Result<T, CallError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        let breaker = self.clone();
        move || breaker.call(&op)
    }

    /// Force the circuit closed and clear failure history
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failures.clear();
        state.opened_at = None;
        state.half_open_issued = 0;
        state.half_open_in_flight = 0;
        state.generation += 1;
        tracing::info!(circuit = %self.name, "Circuit manually reset to CLOSED");
    }

    /// Force the circuit open, starting a fresh recovery timeout
    pub fn force_open(&self) {
        let mut state = self.state.lock();
        if state.state != CircuitState::Open {
            self.transition(&mut state, CircuitState::Open, Instant::now());
        } else {
            state.opened_at = Some(Instant::now());
        }
    }

    /// Decide whether a call may proceed, reserving a trial slot when half-open
    fn admit(&self) -> Result<Permit<'_>, ResilienceError> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.stats.total_calls += 1;
        self.refresh(&mut state, now);

        match state.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                trial: None,
                settled: false,
            }),
            CircuitState::Open => Err(self.reject(&mut state, now)),
            CircuitState::HalfOpen => {
                if state.half_open_issued < self.config.half_open_max_calls {
                    state.half_open_issued += 1;
                    state.half_open_in_flight += 1;
                    Ok(Permit {
                        breaker: self,
                        trial: Some(state.generation),
                        settled: false,
                    })
                } else {
                    if state.half_open_in_flight == 0 {
                        // Every trial ended without a verdict
                        self.transition(&mut state, CircuitState::Open, now);
                    }
                    Err(self.reject(&mut state, now))
                }
            }
        }
    }

    fn reject(&self, state: &mut CircuitBreakerState, now: Instant) -> ResilienceError {
        state.stats.rejected_calls += 1;
        ResilienceError::CircuitOpen {
            name: self.name.to_string(),
            retry_after: self.rejected_delay(state, now),
        }
    }

    /// Delay to report for a call refused in the current state
    ///
    /// Open counts down the recovery timeout. A saturated half-open circuit
    /// waits on its trials, which at worst reopen it for a full timeout.
    fn rejected_delay(&self, state: &CircuitBreakerState, now: Instant) -> Duration {
        match (state.state, state.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .config
                .recovery_timeout
                .saturating_sub(now.saturating_duration_since(opened_at)),
            _ => self.config.recovery_timeout,
        }
    }

    /// Apply the lazy transitions that depend only on elapsed time
    fn refresh(&self, state: &mut CircuitBreakerState, now: Instant) {
        match state.state {
            CircuitState::Open => {
                let expired = state
                    .opened_at
                    .map(|t| now.saturating_duration_since(t) >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if expired {
                    self.transition(state, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::Closed => state.prune_failures(now, self.config.failure_window),
            CircuitState::HalfOpen => {}
        }
    }

    fn record_success(&self, trial: Option<u64>) {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.settle_trial(&mut state, trial);
        state.stats.successful_calls += 1;
        state.stats.last_success_time = Some(Utc::now());

        if state.state == CircuitState::HalfOpen {
            self.transition(&mut state, CircuitState::Closed, now);
        }
    }

    fn record_failure(&self, trial: Option<u64>) {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.settle_trial(&mut state, trial);
        state.failures.push_back(now);
        state.stats.failed_calls += 1;
        state.stats.last_failure_time = Some(Utc::now());

        match state.state {
            CircuitState::HalfOpen => self.transition(&mut state, CircuitState::Open, now),
            CircuitState::Closed => {
                state.prune_failures(now, self.config.failure_window);
                if state.failures.len() >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn settle_trial(&self, state: &mut CircuitBreakerState, trial: Option<u64>) {
        if trial == Some(state.generation) {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, state: &mut CircuitBreakerState, new_state: CircuitState, now: Instant) {
        let old_state = state.state;
        state.state = new_state;
        state.generation += 1;
        state.stats.state_changes += 1;

        match new_state {
            CircuitState::Open => {
                state.opened_at = Some(now);
                tracing::warn!(
                    circuit = %self.name,
                    failures = state.failures.len(),
                    "Circuit OPENED"
                );
            }
            CircuitState::HalfOpen => {
                state.half_open_issued = 0;
                state.half_open_in_flight = 0;
                tracing::info!(circuit = %self.name, "Circuit entering HALF-OPEN state");
            }
            CircuitState::Closed => {
                state.failures.clear();
                state.opened_at = None;
                tracing::info!(circuit = %self.name, "Circuit CLOSED (recovered)");
            }
        }

        tracing::debug!(circuit = %self.name, from = %old_state, to = %new_state, "Circuit transition");
    }
}

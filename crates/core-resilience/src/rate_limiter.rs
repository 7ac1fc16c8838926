//! Rate limiting for smoothing bursts into a steady outbound rate
//!
//! Provides a token bucket with lazy refill and a registry of named buckets
//! so independent call sites can share or isolate rate budgets.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Token bucket parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Tokens added per second
    pub rate: f64,
    /// Maximum tokens held (burst size)
    pub capacity: f64,
}

impl BucketConfig {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self { rate, capacity }
    }

    /// `requests` per minute with the given burst
    pub fn per_minute(requests: f64, capacity: f64) -> Self {
        Self::new(requests / 60.0, capacity)
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            rate: 2.5,
            capacity: 10.0,
        }
    }
}

/// Counters for rate limiter monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub throttled_requests: u64,
    pub total_wait: Duration,
}

impl RateLimitStats {
    pub fn throttle_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.throttled_requests as f64 / self.total_requests as f64
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    stats: RateLimitStats,
}

/// Token bucket rate limiter
///
/// Allows bursts up to `capacity`, then enforces a steady rate of `rate`
/// tokens per second. Refill is computed on each access from elapsed time.
///
/// # Example
/// ```
/// use tunegate_core_resilience::TokenBucket;
///
/// let bucket = TokenBucket::new(2.5, 10.0);
/// assert!(bucket.try_acquire(1));
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    config: BucketConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self::with_config(BucketConfig::new(rate, capacity))
    }

    pub fn with_config(config: BucketConfig) -> Self {
        let config = BucketConfig {
            rate: config.rate.max(0.0),
            capacity: config.capacity.max(0.0),
        };
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
                stats: RateLimitStats::default(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.config.rate
    }

    pub fn capacity(&self) -> f64 {
        self.config.capacity
    }

    /// Attempt to take `tokens` from the bucket
    ///
    /// Non-blocking calls return immediately. Blocking calls sleep with the
    /// lock released until the tokens are available, then debit them.
    /// Requests that can never be satisfied (more than `capacity`, any
    /// shortfall while `rate` is zero, or a refill delay too long to
    /// represent) return `false` without waiting.
    pub fn acquire(&self, tokens: u32, blocking: bool) -> bool {
        let needed = f64::from(tokens);
        let mut state = self.state.lock();
        state.stats.total_requests += 1;
        self.refill(&mut state);

        if state.tokens >= needed {
            state.tokens -= needed;
            return true;
        }

        state.stats.throttled_requests += 1;
        if !blocking || !self.can_ever_satisfy(needed) {
            return false;
        }

        loop {
            let Some(wait) = self.refill_delay(state.tokens, needed) else {
                return false;
            };
            state.stats.total_wait += wait;
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                tokens = tokens,
                "Rate limit: waiting for tokens"
            );

            MutexGuard::unlocked(&mut state, || thread::sleep(wait));

            self.refill(&mut state);
            if state.tokens >= needed {
                state.tokens -= needed;
                return true;
            }
        }
    }

    /// Non-blocking acquire
    pub fn try_acquire(&self, tokens: u32) -> bool {
        self.acquire(tokens, false)
    }

    /// How long until `tokens` would be available (zero if available now)
    ///
    /// Returns `Duration::MAX` when the request can never be satisfied.
    pub fn wait_time(&self, tokens: u32) -> Duration {
        let needed = f64::from(tokens);
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= needed {
            return Duration::ZERO;
        }
        if !self.can_ever_satisfy(needed) {
            return Duration::MAX;
        }
        self.refill_delay(state.tokens, needed).unwrap_or(Duration::MAX)
    }

    /// Current fill level
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    pub fn stats(&self) -> RateLimitStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = RateLimitStats::default();
    }

    fn can_ever_satisfy(&self, needed: f64) -> bool {
        needed <= self.config.capacity && self.config.rate > 0.0
    }

    /// Time for the bucket to go from `tokens` to `needed`
    ///
    /// `None` when the delay does not fit in a `Duration`.
    fn refill_delay(&self, tokens: f64, needed: f64) -> Option<Duration> {
        Duration::try_from_secs_f64((needed - tokens) / self.config.rate).ok()
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.rate).min(self.config.capacity);
        state.last_refill = now;
    }
}

/// Registry of named token buckets
///
/// Buckets are created on first use with the registry's default config
/// unless registered explicitly with [`RateLimiter::bucket_with`].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    default_config: BucketConfig,
    buckets: Arc<RwLock<BTreeMap<String, Arc<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(default_config: BucketConfig) -> Self {
        Self {
            default_config,
            buckets: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Get or create a bucket with the default config
    pub fn bucket(&self, name: &str) -> Arc<TokenBucket> {
        self.bucket_with(name, self.default_config)
    }

    /// Get or create a bucket; `config` only applies when the bucket is new
    pub fn bucket_with(&self, name: &str, config: BucketConfig) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.read().get(name) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        Arc::clone(
            buckets
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(TokenBucket::with_config(config))),
        )
    }

    /// Acquire tokens from a named bucket
    pub fn acquire(&self, name: &str, tokens: u32, blocking: bool) -> bool {
        self.bucket(name).acquire(tokens, blocking)
    }

    /// Wait for one token from `name`, then run `op`
    ///
    /// Returns `None` without running `op` when the bucket can never grant
    /// the token.
    pub fn throttle<F, T>(&self, name: &str, op: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        if !self.acquire(name, 1, true) {
            tracing::warn!(bucket = name, "Rate limit bucket cannot grant tokens");
            return None;
        }
        Some(op())
    }

    pub fn names(&self) -> Vec<String> {
        self.buckets.read().keys().cloned().collect()
    }

    pub fn all_stats(&self) -> BTreeMap<String, RateLimitStats> {
        self.buckets
            .read()
            .iter()
            .map(|(name, bucket)| (name.clone(), bucket.stats()))
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(BucketConfig::default())
    }
}

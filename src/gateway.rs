/*!
 * API gateway: cache, guarded primary call, rule-based fallback, degraded result
 *
 * The gateway never fails. Circuit rejections, quota exhaustion, primary
 * errors, and fallback errors are logged and counted, and the caller always
 * receives an `ApiResponse` tagged with the level that produced it.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tunegate_core_resilience::{
    CircuitBreaker, QuotaReport, QuotaTracker, ResilienceError, ResponseCache,
};

use crate::config::CacheSettings;
use crate::registry::UpstreamRegistry;

/// Boxed fallback operation
pub type Fallback<'a, T> = Box<dyn FnOnce() -> Result<T, String> + 'a>;

/// Which layer of the chain produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackLevel {
    /// The upstream answered
    Primary,
    /// A prior primary result was reused
    Cache,
    /// Deterministic local logic answered
    RuleBased,
    /// Nothing answered
    Degraded,
}

impl FallbackLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::Primary => "PRIMARY",
            FallbackLevel::Cache => "CACHE",
            FallbackLevel::RuleBased => "RULE_BASED",
            FallbackLevel::Degraded => "DEGRADED",
        }
    }
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform result envelope returned by the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub fallback_level: FallbackLevel,
    pub latency_ms: f64,
    pub cached: bool,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn new(data: Option<T>, fallback_level: FallbackLevel, start: Instant) -> Self {
        Self {
            data,
            fallback_level,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            cached: fallback_level == FallbackLevel::Cache,
            error: None,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.fallback_level == FallbackLevel::Primary
    }

    pub fn is_degraded(&self) -> bool {
        self.fallback_level == FallbackLevel::Degraded
    }
}

/// Snapshot of gateway counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStats {
    pub primary_calls: u64,
    pub cache_hits: u64,
    pub fallback_calls: u64,
    pub failures: u64,
    pub cache_size: usize,
    pub quotas: BTreeMap<String, QuotaReport>,
}

/// Central gateway for guarded upstream calls
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tunegate::config::GatewayConfig;
/// use tunegate::gateway::{ApiGateway, FallbackLevel};
/// use tunegate::registry::UpstreamRegistry;
///
/// let config = GatewayConfig::default();
/// let registry = Arc::new(UpstreamRegistry::in_memory(&config));
/// let gateway: ApiGateway<String> = ApiGateway::new(registry, config.cache);
///
/// let response = gateway
///     .request("huggingface", || Err::<String, _>("model loading"))
///     .fallback(|| "Calm Vibes".to_string())
///     .send();
///
/// assert_eq!(response.fallback_level, FallbackLevel::RuleBased);
/// assert_eq!(response.data.as_deref(), Some("Calm Vibes"));
/// ```
#[derive(Debug)]
pub struct ApiGateway<T = serde_json::Value> {
    registry: Arc<UpstreamRegistry>,
    cache: ResponseCache<T>,
    primary_calls: AtomicU64,
    cache_hits: AtomicU64,
    fallback_calls: AtomicU64,
    failures: AtomicU64,
}

impl<T: Clone> ApiGateway<T> {
    pub fn new(registry: Arc<UpstreamRegistry>, cache: CacheSettings) -> Self {
        Self {
            registry,
            cache: ResponseCache::new(cache.max_size, cache.ttl()),
            primary_calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<UpstreamRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache<T> {
        &self.cache
    }

    /// Start a request against `api_name`
    pub fn request<'a, P, E>(&'a self, api_name: &'a str, primary: P) -> GatewayRequest<'a, T, P>
    where
        P: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        GatewayRequest {
            gateway: self,
            api_name,
            primary,
            fallback: None,
            cache_key: None,
            circuit: None,
            quota: None,
        }
    }

    /// Run the full fallback chain
    ///
    /// `circuit` and `quota` default to the registry's guards for `api_name`.
    pub fn call_with_fallback<P, E>(
        &self,
        primary: P,
        fallback: Option<Fallback<'_, T>>,
        cache_key: Option<&str>,
        api_name: &str,
        circuit: Option<&CircuitBreaker>,
        quota: Option<&QuotaTracker>,
    ) -> ApiResponse<T>
    where
        P: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let start = Instant::now();

        // Level 1: cache
        if let Some(key) = cache_key {
            if let Some(value) = self.cache.get(key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(upstream = api_name, key, "Cache hit");
                return ApiResponse::new(Some(value), FallbackLevel::Cache, start);
            }
        }

        // Level 2: primary behind the guards
        let circuit = circuit
            .cloned()
            .unwrap_or_else(|| self.registry.circuit(api_name));
        let quota = quota
            .cloned()
            .unwrap_or_else(|| self.registry.quota(api_name));

        let mut last_error = if !circuit.is_call_permitted() {
            tracing::debug!(upstream = api_name, "Skipping primary: circuit open");
            ResilienceError::CircuitOpen {
                name: circuit.name().to_string(),
                retry_after: circuit.retry_after(),
            }
            .to_string()
        } else if !quota.can_consume(1) {
            tracing::debug!(upstream = api_name, "Skipping primary: quota exhausted");
            format!("{} quota exhausted", quota.name())
        } else {
            match self.attempt_primary(primary, api_name, &circuit, &quota) {
                Ok(value) => {
                    self.primary_calls.fetch_add(1, Ordering::Relaxed);
                    if let Some(key) = cache_key {
                        self.cache.set(key, value.clone());
                    }
                    return ApiResponse::new(Some(value), FallbackLevel::Primary, start);
                }
                Err(error) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    error
                }
            }
        };

        // Level 3: rule-based fallback
        if let Some(fallback) = fallback {
            self.fallback_calls.fetch_add(1, Ordering::Relaxed);
            match fallback() {
                Ok(value) => return ApiResponse::new(Some(value), FallbackLevel::RuleBased, start),
                Err(e) => {
                    tracing::error!(upstream = api_name, error = %e, "Fallback also failed");
                    last_error = format!("{}; fallback failed: {}", last_error, e);
                }
            }
        }

        // Level 4: degraded
        tracing::warn!(upstream = api_name, error = %last_error, "Returning degraded response");
        let mut response = ApiResponse::new(None, FallbackLevel::Degraded, start);
        response.error = Some(format!("All API calls failed: {}", last_error));
        response
    }

    /// Rate limit, consume quota, and invoke `primary` through the circuit
    fn attempt_primary<P, E>(
        &self,
        primary: P,
        api_name: &str,
        circuit: &CircuitBreaker,
        quota: &QuotaTracker,
    ) -> Result<T, String>
    where
        P: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        if !self.registry.bucket(api_name).acquire(1, true) {
            tracing::warn!(upstream = api_name, "Rate limit bucket cannot grant tokens");
            return Err(ResilienceError::RateLimited {
                name: api_name.to_string(),
            }
            .to_string());
        }

        if let Err(e) = quota.consume(1) {
            tracing::warn!(upstream = api_name, error = %e, "Quota exceeded");
            return Err(e.to_string());
        }

        circuit.call(primary).map_err(|e| {
            if e.is_rejected() {
                tracing::warn!(upstream = api_name, error = %e, "Circuit breaker open");
            } else {
                tracing::error!(upstream = api_name, error = %e, "Primary API call failed");
            }
            e.to_string()
        })
    }

    /// Current counters plus live quota usage of every tracked upstream
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            primary_calls: self.primary_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_size: self.cache.len(),
            quotas: self
                .registry
                .quotas()
                .into_iter()
                .map(|(name, usage)| (name, QuotaReport::from(usage)))
                .collect(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Builder for one gateway call
pub struct GatewayRequest<'a, T, P> {
    gateway: &'a ApiGateway<T>,
    api_name: &'a str,
    primary: P,
    fallback: Option<Fallback<'a, T>>,
    cache_key: Option<String>,
    circuit: Option<CircuitBreaker>,
    quota: Option<QuotaTracker>,
}

impl<'a, T, P, E> GatewayRequest<'a, T, P>
where
    T: Clone,
    P: FnOnce() -> Result<T, E>,
    E: fmt::Display,
{
    /// Infallible rule-based fallback
    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> T + 'a,
    {
        self.fallback = Some(Box::new(move || Ok(f())));
        self
    }

    /// Rule-based fallback that may itself fail
    pub fn try_fallback<F, FE>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Result<T, FE> + 'a,
        FE: fmt::Display,
    {
        self.fallback = Some(Box::new(move || f().map_err(|e| e.to_string())));
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Use this breaker instead of the registry's
    pub fn circuit(mut self, circuit: CircuitBreaker) -> Self {
        self.circuit = Some(circuit);
        self
    }

    /// Use this tracker instead of the registry's
    pub fn quota(mut self, quota: QuotaTracker) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn send(self) -> ApiResponse<T> {
        self.gateway.call_with_fallback(
            self.primary,
            self.fallback,
            self.cache_key.as_deref(),
            self.api_name,
            self.circuit.as_ref(),
            self.quota.as_ref(),
        )
    }
}

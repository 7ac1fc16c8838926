/*!
 * Upstream registry: one circuit breaker, quota tracker, and token bucket per upstream
 *
 * Guards are created lazily on first use from the upstream's settings (or the
 * defaults) and live as long as the registry. The application owns the
 * registry and hands it to whatever needs it.
 */

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tunegate_core_resilience::{
    CallError, CircuitBreaker, CircuitStats, QuotaTracker, QuotaUsage, RateLimitStats,
    RateLimiter, ResilienceError, TokenBucket,
};

use crate::config::{GatewayConfig, UpstreamSettings};

/// The guards protecting one upstream
#[derive(Debug, Clone)]
pub struct Upstream {
    pub name: String,
    pub circuit: CircuitBreaker,
    pub quota: QuotaTracker,
    pub bucket: Arc<TokenBucket>,
}

impl Upstream {
    /// Run `op` behind this upstream's guards, returning typed rejections
    ///
    /// Checks the circuit, waits for a rate-limit token, records one unit of
    /// quota, then invokes `op` through the circuit. A bucket that can never
    /// grant the token rejects the call without touching the quota.
    pub fn call<F, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.circuit.is_call_permitted() {
            return Err(CallError::Rejected(ResilienceError::CircuitOpen {
                name: self.name.clone(),
                retry_after: self.circuit.retry_after(),
            }));
        }

        if !self.bucket.acquire(1, true) {
            tracing::warn!(upstream = %self.name, "Rate limit bucket cannot grant tokens");
            return Err(CallError::Rejected(ResilienceError::RateLimited {
                name: self.name.clone(),
            }));
        }

        self.quota.consume(1).map_err(CallError::Rejected)?;

        self.circuit.call(op)
    }
}

/// Owns the per-upstream guards for the process
#[derive(Debug)]
pub struct UpstreamRegistry {
    config: GatewayConfig,
    persist: bool,
    circuits: RwLock<BTreeMap<String, CircuitBreaker>>,
    quotas: RwLock<BTreeMap<String, QuotaTracker>>,
    limiter: RateLimiter,
}

impl UpstreamRegistry {
    /// Registry whose quota trackers persist under `config.state_dir`
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::build(config, true)
    }

    /// Registry whose quota trackers keep counters in memory only
    pub fn in_memory(config: &GatewayConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: &GatewayConfig, persist: bool) -> Self {
        Self {
            config: config.clone(),
            persist,
            circuits: RwLock::new(BTreeMap::new()),
            quotas: RwLock::new(BTreeMap::new()),
            limiter: RateLimiter::new(config.defaults.bucket_config()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn settings(&self, name: &str) -> &UpstreamSettings {
        self.config.upstream(name)
    }

    /// Circuit breaker for `name`, created on first use
    ///
    /// A disabled upstream's breaker starts forced open.
    pub fn circuit(&self, name: &str) -> CircuitBreaker {
        if let Some(circuit) = self.circuits.read().get(name) {
            return circuit.clone();
        }

        let mut circuits = self.circuits.write();
        circuits
            .entry(name.to_string())
            .or_insert_with(|| {
                let settings = self.settings(name);
                let circuit = CircuitBreaker::new(name, settings.circuit_config());
                if settings.disabled {
                    circuit.force_open();
                }
                circuit
            })
            .clone()
    }

    /// Quota tracker for `name`, created on first use
    pub fn quota(&self, name: &str) -> QuotaTracker {
        if let Some(quota) = self.quotas.read().get(name) {
            return quota.clone();
        }

        let mut quotas = self.quotas.write();
        quotas
            .entry(name.to_string())
            .or_insert_with(|| {
                let path = self.persist.then(|| self.config.quota_path(name));
                QuotaTracker::new(name, self.settings(name).quota_config(), path)
            })
            .clone()
    }

    /// Token bucket for `name`, created on first use
    pub fn bucket(&self, name: &str) -> Arc<TokenBucket> {
        self.limiter
            .bucket_with(name, self.settings(name).bucket_config())
    }

    /// All guards for `name`
    pub fn upstream(&self, name: &str) -> Upstream {
        Upstream {
            name: name.to_string(),
            circuit: self.circuit(name),
            quota: self.quota(name),
            bucket: self.bucket(name),
        }
    }

    /// Live usage of every quota tracker created so far
    pub fn quotas(&self) -> BTreeMap<String, QuotaUsage> {
        self.quotas
            .read()
            .iter()
            .map(|(name, quota)| (name.clone(), quota.usage()))
            .collect()
    }

    /// Counters of every circuit breaker created so far
    pub fn circuit_stats(&self) -> BTreeMap<String, CircuitStats> {
        self.circuits
            .read()
            .iter()
            .map(|(name, circuit)| (name.clone(), circuit.stats()))
            .collect()
    }

    /// Counters of every token bucket created so far
    pub fn rate_limit_stats(&self) -> BTreeMap<String, RateLimitStats> {
        self.limiter.all_stats()
    }

    /// Enabled upstreams whose circuit is closed
    ///
    /// Covers configured upstreams and any created on demand. An upstream
    /// with no breaker yet counts as healthy.
    pub fn healthy_upstreams(&self) -> Vec<String> {
        let circuits = self.circuits.read();
        let names: BTreeSet<&String> = self.config.upstreams.keys().chain(circuits.keys()).collect();

        names
            .into_iter()
            .filter(|name| !self.settings(name).disabled)
            .filter(|name| circuits.get(*name).map_or(true, |c| c.is_closed()))
            .cloned()
            .collect()
    }

    /// Close every circuit and zero every quota created so far
    ///
    /// Disabled upstreams stay forced open.
    pub fn reset_all(&self) {
        for (name, circuit) in self.circuits.read().iter() {
            circuit.reset();
            if self.settings(name).disabled {
                circuit.force_open();
            }
        }
        for quota in self.quotas.read().values() {
            quota.reset();
        }
        tracing::info!("All upstream guards reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tunegate_core_resilience::CircuitState;

    fn test_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.upstreams.insert(
            "flaky".to_string(),
            UpstreamSettings {
                failure_threshold: 2,
                hourly_limit: 3,
                daily_limit: Some(10),
                rate_per_sec: 1000.0,
                burst_capacity: 100.0,
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn test_guards_are_created_once_and_shared() {
        let registry = UpstreamRegistry::in_memory(&test_config());

        let a = registry.quota("flaky");
        let b = registry.quota("flaky");
        a.consume(1).unwrap();
        assert_eq!(b.usage().hourly_used, 1);

        assert!(Arc::ptr_eq(&registry.bucket("flaky"), &registry.bucket("flaky")));
    }

    #[test]
    fn test_guards_use_upstream_settings() {
        let registry = UpstreamRegistry::in_memory(&test_config());

        assert_eq!(registry.circuit("flaky").config().failure_threshold, 2);
        assert_eq!(registry.quota("flaky").config().hourly_limit, 3);
        assert_eq!(registry.bucket("flaky").capacity(), 100.0);

        // Unknown upstreams get the defaults
        assert_eq!(registry.quota("lastfm").config().hourly_limit, 1000);
        assert_eq!(registry.bucket("lastfm").rate(), 2.5);
    }

    #[test]
    fn test_disabled_upstream_is_forced_open() {
        let registry = UpstreamRegistry::in_memory(&GatewayConfig::default());

        assert_eq!(registry.circuit("openai").state(), CircuitState::Open);
        assert!(!registry.quota("openai").can_consume(1));
        assert!(!registry.healthy_upstreams().contains(&"openai".to_string()));
    }

    #[test]
    fn test_upstream_call_consumes_quota() {
        let registry = UpstreamRegistry::in_memory(&test_config());
        let upstream = registry.upstream("flaky");

        for _ in 0..3 {
            let result: Result<&str, CallError<String>> = upstream.call(|| Ok("tracks"));
            assert_eq!(result.unwrap(), "tracks");
        }

        let result: Result<&str, CallError<String>> = upstream.call(|| Ok("tracks"));
        match result {
            Err(CallError::Rejected(ResilienceError::QuotaExceeded { usage, .. })) => {
                assert_eq!(usage.hourly_used, 3);
            }
            other => panic!("Expected QuotaExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_upstream_call_rejects_when_circuit_open() {
        let registry = UpstreamRegistry::in_memory(&test_config());
        let upstream = registry.upstream("flaky");

        for _ in 0..2 {
            let result: Result<(), CallError<&str>> = upstream.call(|| Err("timeout"));
            assert!(matches!(result, Err(CallError::Failed("timeout"))));
        }

        let result: Result<(), CallError<&str>> = upstream.call(|| Ok(()));
        let err = result.unwrap_err();
        assert!(err.is_rejected());
        assert!(err.rejection().and_then(|e| e.retry_after()).is_some());
        // A refused call does not spend quota
        assert_eq!(upstream.quota.usage().hourly_used, 2);
    }

    #[test]
    fn test_upstream_call_rejects_when_bucket_cannot_refill() {
        let mut config = test_config();
        config.upstreams.insert(
            "frozen".to_string(),
            UpstreamSettings {
                rate_per_sec: 0.0,
                burst_capacity: 2.0,
                ..Default::default()
            },
        );
        let registry = UpstreamRegistry::in_memory(&config);
        let upstream = registry.upstream("frozen");

        let mut invoked = 0;
        for _ in 0..4 {
            let _: Result<(), CallError<String>> = upstream.call(|| {
                invoked += 1;
                Ok(())
            });
        }
        assert_eq!(invoked, 2);

        let result: Result<(), CallError<String>> = upstream.call(|| Ok(()));
        assert!(matches!(
            result,
            Err(CallError::Rejected(ResilienceError::RateLimited { ref name })) if name == "frozen"
        ));
        // Refused calls neither spend quota nor count against the circuit
        assert_eq!(upstream.quota.usage().hourly_used, 2);
        assert!(upstream.circuit.is_closed());
    }

    #[test]
    fn test_healthy_upstreams_excludes_open_circuits() {
        let registry = UpstreamRegistry::in_memory(&test_config());
        assert!(registry.healthy_upstreams().contains(&"flaky".to_string()));

        registry.circuit("flaky").force_open();
        let healthy = registry.healthy_upstreams();
        assert!(!healthy.contains(&"flaky".to_string()));
        assert!(healthy.contains(&"spotify".to_string()));
    }

    #[test]
    fn test_reset_all() {
        let registry = UpstreamRegistry::in_memory(&test_config());
        registry.quota("flaky").consume(2).unwrap();
        registry.circuit("flaky").force_open();
        registry.circuit("openai");

        registry.reset_all();

        assert_eq!(registry.quotas()["flaky"].hourly_used, 0);
        assert!(registry.circuit("flaky").is_closed());
        assert!(registry.circuit("openai").is_open());
    }

    #[test]
    fn test_persistent_registry_survives_restart() {
        let dir = tempdir().unwrap();
        let config = GatewayConfig {
            state_dir: dir.path().to_path_buf(),
            ..test_config()
        };

        {
            let registry = UpstreamRegistry::from_config(&config);
            registry.quota("flaky").consume(2).unwrap();
        }
        assert!(config.quota_path("flaky").exists());

        let registry = UpstreamRegistry::from_config(&config);
        assert_eq!(registry.quota("flaky").usage().hourly_used, 2);
        assert_eq!(registry.quota("flaky").usage().daily_used, 2);
    }

    #[test]
    fn test_stats_cover_created_guards_only() {
        let registry = UpstreamRegistry::in_memory(&test_config());
        registry.upstream("flaky");

        assert_eq!(registry.quotas().keys().collect::<Vec<_>>(), vec!["flaky"]);
        assert_eq!(registry.circuit_stats().len(), 1);
        assert_eq!(registry.rate_limit_stats().len(), 1);
    }
}

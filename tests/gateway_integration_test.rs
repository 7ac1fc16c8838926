//! Gateway end-to-end behavior
//!
//! Exercises the full fallback chain against a registry built from
//! configuration: cache, quota-gated primary, rule-based fallback, degraded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use tunegate::config::{GatewayConfig, UpstreamSettings};
use tunegate::gateway::{ApiGateway, FallbackLevel};
use tunegate::registry::UpstreamRegistry;
use tunegate::resilience::{CallError, CircuitState, QuotaConfig, QuotaTracker, ResilienceError};

/// Quota(hourly=2, daily=10), Circuit(threshold=5), no rate-limit pressure
fn scenario_config(state_dir: &std::path::Path) -> GatewayConfig {
    let mut config = GatewayConfig {
        state_dir: state_dir.to_path_buf(),
        ..Default::default()
    };
    config.upstreams.insert(
        "moodapi".to_string(),
        UpstreamSettings {
            failure_threshold: 5,
            hourly_limit: 2,
            daily_limit: Some(10),
            rate_per_sec: 1000.0,
            burst_capacity: 100.0,
            recovery_timeout_secs: 1,
            ..Default::default()
        },
    );
    config
}

fn scenario_gateway(config: &GatewayConfig) -> ApiGateway<String> {
    let registry = Arc::new(UpstreamRegistry::from_config(config));
    ApiGateway::new(registry, config.cache)
}

#[test]
fn test_quota_scenario_with_shared_cache_key() {
    let dir = tempdir().unwrap();
    let config = scenario_config(dir.path());
    let gateway = scenario_gateway(&config);

    let first = gateway
        .request("moodapi", || Ok::<_, String>("happy".to_string()))
        .cache_key("mood:happy")
        .send();
    assert_eq!(first.fallback_level, FallbackLevel::Primary);

    let second = gateway
        .request("moodapi", || Ok::<_, String>("upbeat".to_string()))
        .send();
    assert_eq!(second.fallback_level, FallbackLevel::Primary);

    let third = gateway
        .request("moodapi", || Ok::<_, String>("unused".to_string()))
        .cache_key("mood:happy")
        .send();
    assert_eq!(third.fallback_level, FallbackLevel::Cache);
    assert!(third.cached);
    assert_eq!(third.data.as_deref(), Some("happy"));

    let stats = gateway.stats();
    assert_eq!(stats.primary_calls, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.quotas["moodapi"].usage.hourly_used, 2);
    assert_eq!(stats.quotas["moodapi"].usage.daily_used, 2);
}

#[test]
fn test_quota_scenario_without_cache_falls_back() {
    let dir = tempdir().unwrap();
    let config = scenario_config(dir.path());
    let gateway = scenario_gateway(&config);

    for _ in 0..2 {
        let response = gateway
            .request("moodapi", || Ok::<_, String>("primary".to_string()))
            .send();
        assert!(response.is_primary());
    }

    let invoked = AtomicUsize::new(0);
    let with_rules = gateway
        .request("moodapi", || {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("primary".to_string())
        })
        .fallback(|| "Calm Vibes".to_string())
        .send();
    assert_eq!(with_rules.fallback_level, FallbackLevel::RuleBased);
    assert_eq!(with_rules.data.as_deref(), Some("Calm Vibes"));

    let without_rules = gateway
        .request("moodapi", || Ok::<_, String>("primary".to_string()))
        .send();
    assert_eq!(without_rules.fallback_level, FallbackLevel::Degraded);
    assert!(without_rules.error.is_some());

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_primary_with_fallback() {
    let dir = tempdir().unwrap();
    let config = scenario_config(dir.path());
    let gateway = scenario_gateway(&config);

    let response = gateway
        .request("moodapi", || Err::<String, _>("503 Service Unavailable"))
        .fallback(|| "ok".to_string())
        .send();

    assert_eq!(response.data.as_deref(), Some("ok"));
    assert_eq!(response.fallback_level, FallbackLevel::RuleBased);
    assert!(response.error.is_none());
}

#[test]
fn test_both_failing_degrades_without_panicking() {
    let dir = tempdir().unwrap();
    let config = scenario_config(dir.path());
    let gateway = scenario_gateway(&config);

    let response = gateway
        .request("moodapi", || Err::<String, _>("timeout"))
        .try_fallback(|| Err::<String, _>("no rule matched"))
        .send();

    assert_eq!(response.fallback_level, FallbackLevel::Degraded);
    assert!(response.data.is_none());
    assert!(response.error.is_some());
}

#[test]
fn test_circuit_recovers_through_gateway() {
    let dir = tempdir().unwrap();
    let mut config = scenario_config(dir.path());
    if let Some(settings) = config.upstreams.get_mut("moodapi") {
        settings.failure_threshold = 2;
        settings.hourly_limit = 100;
        settings.daily_limit = Some(100);
    }
    let gateway = scenario_gateway(&config);

    for _ in 0..2 {
        gateway.request("moodapi", || Err::<String, _>("down")).send();
    }
    let circuit = gateway.registry().circuit("moodapi");
    assert_eq!(circuit.state(), CircuitState::Open);

    thread::sleep(Duration::from_millis(1100));
    assert_eq!(circuit.state(), CircuitState::HalfOpen);

    let response = gateway
        .request("moodapi", || Ok::<_, String>("back".to_string()))
        .send();
    assert!(response.is_primary());
    assert_eq!(circuit.state(), CircuitState::Closed);
}

#[test]
fn test_quota_persists_across_registries() {
    let dir = tempdir().unwrap();
    let config = scenario_config(dir.path());

    {
        let gateway = scenario_gateway(&config);
        for _ in 0..2 {
            gateway
                .request("moodapi", || Ok::<_, String>("x".to_string()))
                .send();
        }
    }

    // A restarted process sees the spent quota and skips the primary
    let gateway = scenario_gateway(&config);
    let response = gateway
        .request("moodapi", || Ok::<_, String>("x".to_string()))
        .fallback(|| "rules".to_string())
        .send();
    assert_eq!(response.fallback_level, FallbackLevel::RuleBased);

    let usage = QuotaTracker::read_usage(
        "moodapi",
        QuotaConfig {
            hourly_limit: 2,
            daily_limit: Some(10),
        },
        &config.quota_path("moodapi"),
    )
    .unwrap();
    assert_eq!(usage.hourly_used, 2);
}

#[test]
fn test_direct_upstream_call_surfaces_typed_errors() {
    let dir = tempdir().unwrap();
    let config = scenario_config(dir.path());
    let registry = UpstreamRegistry::from_config(&config);
    let upstream = registry.upstream("moodapi");

    for _ in 0..2 {
        let result: Result<u8, CallError<String>> = upstream.call(|| Ok(1));
        assert!(result.is_ok());
    }

    let result: Result<u8, CallError<String>> = upstream.call(|| Ok(1));
    match result {
        Err(CallError::Rejected(ResilienceError::QuotaExceeded { usage, .. })) => {
            assert_eq!(usage.hourly_used, 2);
            assert!(!usage.is_available());
        }
        other => panic!("Expected QuotaExceeded, got {:?}", other),
    }
}

#[test]
fn test_concurrent_callers_never_exceed_quota() {
    let dir = tempdir().unwrap();
    let mut config = scenario_config(dir.path());
    if let Some(settings) = config.upstreams.get_mut("moodapi") {
        settings.hourly_limit = 20;
        settings.daily_limit = Some(20);
    }
    let gateway = Arc::new(scenario_gateway(&config));
    let upstream_calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            let upstream_calls = Arc::clone(&upstream_calls);
            thread::spawn(move || {
                for _ in 0..5 {
                    let calls = Arc::clone(&upstream_calls);
                    gateway
                        .request("moodapi", move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, String>("x".to_string())
                        })
                        .fallback(|| "rules".to_string())
                        .send();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(upstream_calls.load(Ordering::SeqCst), 20);
    let stats = gateway.stats();
    assert_eq!(stats.primary_calls, 20);
    assert_eq!(stats.fallback_calls, 20);
    assert_eq!(stats.quotas["moodapi"].usage.hourly_used, 20);
}

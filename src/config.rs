/*!
 * Configuration types for Tunegate
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tunegate_core_resilience::{BucketConfig, CircuitBreakerConfig, QuotaConfig};

use crate::error::{Result, TunegateError};

/// Main configuration for the gateway and its upstreams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Directory holding persisted quota records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Response cache sizing
    #[serde(default)]
    pub cache: CacheSettings,

    /// Settings for upstreams without a named entry
    #[serde(default)]
    pub defaults: UpstreamSettings,

    /// Per-upstream settings keyed by upstream name
    #[serde(default)]
    pub upstreams: BTreeMap<String, UpstreamSettings>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            cache: CacheSettings::default(),
            defaults: UpstreamSettings::default(),
            upstreams: default_upstreams(),
        }
    }
}

/// Response cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of entries (0 disables caching)
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_size: default_cache_max_size(),
        }
    }
}

/// Guard settings for one upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Failures within the window that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Sliding failure window in seconds
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Seconds the circuit stays open before probing
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Trial calls permitted while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: usize,

    /// Calls allowed per UTC hour
    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: u32,

    /// Calls allowed per UTC day; `"unbounded"` removes the ceiling
    #[serde(default = "default_daily_limit", with = "daily_limit_format")]
    pub daily_limit: Option<u32>,

    /// Steady-state request rate in requests per second
    ///
    /// Zero means no refill: the burst is all the upstream ever gets.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,

    /// Maximum burst size
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: f64,

    /// Never call this upstream (quota zeroed, circuit forced open)
    #[serde(default)]
    pub disabled: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            hourly_limit: default_hourly_limit(),
            daily_limit: default_daily_limit(),
            rate_per_sec: default_rate_per_sec(),
            burst_capacity: default_burst_capacity(),
            disabled: false,
        }
    }
}

impl UpstreamSettings {
    /// Circuit breaker settings for this upstream
    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_secs(self.failure_window_secs),
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
        }
    }

    /// Quota ceilings for this upstream; a disabled upstream gets none
    pub fn quota_config(&self) -> QuotaConfig {
        if self.disabled {
            return QuotaConfig {
                hourly_limit: 0,
                daily_limit: Some(0),
            };
        }
        QuotaConfig {
            hourly_limit: self.hourly_limit,
            daily_limit: self.daily_limit,
        }
    }

    /// Token bucket settings for this upstream
    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig::new(self.rate_per_sec, self.burst_capacity)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(TunegateError::Config(format!(
                "{}: failure_threshold must be at least 1",
                name
            )));
        }
        if self.half_open_max_calls == 0 {
            return Err(TunegateError::Config(format!(
                "{}: half_open_max_calls must be at least 1",
                name
            )));
        }
        if !self.rate_per_sec.is_finite() || self.rate_per_sec < 0.0 {
            return Err(TunegateError::Config(format!(
                "{}: rate_per_sec must be a non-negative number",
                name
            )));
        }
        if !self.burst_capacity.is_finite() || self.burst_capacity < 1.0 {
            return Err(TunegateError::Config(format!(
                "{}: burst_capacity must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_failure_threshold() -> usize {
    5
}

fn default_failure_window_secs() -> u64 {
    60
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_half_open_max_calls() -> usize {
    1
}

fn default_hourly_limit() -> u32 {
    1000
}

fn default_daily_limit() -> Option<u32> {
    Some(10_000)
}

/// `daily_limit` as either a count or the string `"unbounded"`
mod daily_limit_format {
    use serde::{de, Deserialize, Deserializer, Serializer};

    const UNBOUNDED: &str = "unbounded";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Count(u32),
        Keyword(String),
    }

    pub fn serialize<S>(limit: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match limit {
            Some(count) => serializer.serialize_u32(*count),
            None => serializer.serialize_str(UNBOUNDED),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Count(count) => Ok(Some(count)),
            Raw::Keyword(word) if word == UNBOUNDED => Ok(None),
            Raw::Keyword(word) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&word),
                &"a call count or \"unbounded\"",
            )),
        }
    }
}

fn default_rate_per_sec() -> f64 {
    2.5
}

fn default_burst_capacity() -> f64 {
    10.0
}

/// Built-in upstream presets
fn default_upstreams() -> BTreeMap<String, UpstreamSettings> {
    let mut upstreams = BTreeMap::new();

    // Free inference tier: 250/hour, 800/day, 4 requests per minute
    upstreams.insert(
        "huggingface".to_string(),
        UpstreamSettings {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
            hourly_limit: 250,
            daily_limit: Some(800),
            rate_per_sec: 4.0 / 60.0,
            burst_capacity: 5.0,
            ..Default::default()
        },
    );

    upstreams.insert(
        "spotify".to_string(),
        UpstreamSettings {
            failure_threshold: 5,
            recovery_timeout_secs: 10,
            rate_per_sec: 2.5,
            burst_capacity: 10.0,
            ..Default::default()
        },
    );

    for (name, recovery) in [
        ("groq", 15),
        ("gemini", 20),
        ("openrouter", 25),
        ("deepseek", 30),
    ] {
        upstreams.insert(
            name.to_string(),
            UpstreamSettings {
                failure_threshold: 3,
                recovery_timeout_secs: recovery,
                ..Default::default()
            },
        );
    }

    upstreams.insert(
        "openai".to_string(),
        UpstreamSettings {
            hourly_limit: 0,
            daily_limit: Some(0),
            disabled: true,
            ..Default::default()
        },
    );

    upstreams
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Settings for `name`, falling back to the defaults
    pub fn upstream(&self, name: &str) -> &UpstreamSettings {
        self.upstreams.get(name).unwrap_or(&self.defaults)
    }

    /// Settings for a named upstream, failing when it is not configured
    pub fn require_upstream(&self, name: &str) -> Result<&UpstreamSettings> {
        self.upstreams
            .get(name)
            .ok_or_else(|| TunegateError::UnknownUpstream(name.to_string()))
    }

    /// Location of the persisted quota record for `name`
    pub fn quota_path(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!(".quota_{}.json", name))
    }

    /// Reject settings the resilience primitives cannot honor
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate("defaults")?;
        for (name, settings) in &self.upstreams {
            settings.validate(name)?;
        }
        Ok(())
    }
}

//! Quota tracking: hard hourly and daily call ceilings
//!
//! Counters are bucketed by UTC hour-of-day and UTC day-of-year. Before any
//! read or write the tracker compares the stored reset stamps with the
//! current hour and day and zeroes whichever counter is stale. There is no
//! background timer.
//!
//! State is persisted to a small JSON record after every mutation so a
//! restart in the middle of a window does not hand out a fresh quota. The
//! record is written to a temporary file and renamed into place.
//!
//! # Example
//!
//! ```
//! use tunegate_core_resilience::quota::{QuotaConfig, QuotaTracker};
//!
//! let quota = QuotaTracker::new(
//!     "huggingface",
//!     QuotaConfig { hourly_limit: 250, daily_limit: Some(800) },
//!     None,
//! );
//!
//! if quota.can_consume(1) {
//!     quota.consume(1).unwrap();
//! }
//! assert_eq!(quota.usage().hourly_used, 1);
//! ```

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Usage fraction at which a quota is reported as WARNING
pub const QUOTA_WARNING_THRESHOLD: f64 = 0.75;

/// Usage fraction at which a quota is reported as CRITICAL
pub const QUOTA_CRITICAL_THRESHOLD: f64 = 0.90;

/// Quota status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    /// Under 75%
    Ok,
    /// 75-90%
    Warning,
    /// 90-100%
    Critical,
    /// 100%
    Exceeded,
}

impl QuotaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaStatus::Ok => "ok",
            QuotaStatus::Warning => "warning",
            QuotaStatus::Critical => "critical",
            QuotaStatus::Exceeded => "exceeded",
        }
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accounting window whose ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWindow {
    Hourly,
    Daily,
}

impl fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaWindow::Hourly => f.write_str("hourly"),
            QuotaWindow::Daily => f.write_str("daily"),
        }
    }
}

/// Ceilings for one upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Maximum calls per UTC hour
    pub hourly_limit: u32,
    /// Maximum calls per UTC day (`None` = no daily ceiling)
    pub daily_limit: Option<u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 1000,
            daily_limit: Some(10_000),
        }
    }
}

/// Current quota usage for one upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub api_name: String,
    pub hourly_used: u32,
    pub hourly_limit: u32,
    pub daily_used: u32,
    pub daily_limit: Option<u32>,
    /// UTC hour (0-23) at which the hourly counter was last reset
    pub last_reset_hour: Option<u32>,
    /// UTC day of year (1-366) at which the daily counter was last reset
    pub last_reset_day: Option<u32>,
}

impl QuotaUsage {
    /// Fresh, never-reset usage for the given ceilings
    pub fn new(api_name: impl Into<String>, config: QuotaConfig) -> Self {
        Self {
            api_name: api_name.into(),
            hourly_used: 0,
            hourly_limit: config.hourly_limit,
            daily_used: 0,
            daily_limit: config.daily_limit,
            last_reset_hour: None,
            last_reset_day: None,
        }
    }

    pub fn hourly_remaining(&self) -> u32 {
        self.hourly_limit.saturating_sub(self.hourly_used)
    }

    /// Remaining daily calls, `None` when there is no daily ceiling
    pub fn daily_remaining(&self) -> Option<u32> {
        self.daily_limit
            .map(|limit| limit.saturating_sub(self.daily_used))
    }

    /// Hourly usage fraction in `0.0..=1.0`; a zero limit reads as fully used
    pub fn hourly_percentage(&self) -> f64 {
        usage_fraction(self.hourly_used, self.hourly_limit)
    }

    /// Daily usage fraction in `0.0..=1.0`; unbounded reads as 0
    pub fn daily_percentage(&self) -> f64 {
        match self.daily_limit {
            Some(limit) => usage_fraction(self.daily_used, limit),
            None => 0.0,
        }
    }

    /// Status tier from the more saturated of the two windows
    pub fn status(&self) -> QuotaStatus {
        let max_pct = self.hourly_percentage().max(self.daily_percentage());

        if max_pct >= 1.0 {
            QuotaStatus::Exceeded
        } else if max_pct >= QUOTA_CRITICAL_THRESHOLD {
            QuotaStatus::Critical
        } else if max_pct >= QUOTA_WARNING_THRESHOLD {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Ok
        }
    }

    /// Whether at least one more call fits in both windows
    pub fn is_available(&self) -> bool {
        self.has_headroom(1)
    }

    /// Whether `count` more calls fit in both windows
    pub fn has_headroom(&self, count: u32) -> bool {
        let hourly_ok = u64::from(self.hourly_used) + u64::from(count)
            <= u64::from(self.hourly_limit);
        let daily_ok = match self.daily_limit {
            Some(limit) => u64::from(self.daily_used) + u64::from(count) <= u64::from(limit),
            None => true,
        };
        hourly_ok && daily_ok
    }

    /// Daily limit for display ("unbounded" when there is none)
    pub fn daily_limit_display(&self) -> String {
        match self.daily_limit {
            Some(limit) => limit.to_string(),
            None => "unbounded".to_string(),
        }
    }

    /// Zero any counter whose window has rolled over since the last reset
    ///
    /// Hour and day are compared independently. Returns true when anything
    /// changed.
    pub fn apply_resets(&mut self, now: DateTime<Utc>) -> bool {
        let current_hour = now.hour();
        let current_day = now.ordinal();
        let mut changed = false;

        if self.last_reset_hour != Some(current_hour) {
            let old_usage = self.hourly_used;
            self.hourly_used = 0;
            self.last_reset_hour = Some(current_hour);
            changed = true;
            if old_usage > 0 {
                tracing::info!(upstream = %self.api_name, was = old_usage, "Hourly quota reset");
            }
        }

        if self.last_reset_day != Some(current_day) {
            let old_usage = self.daily_used;
            self.daily_used = 0;
            self.last_reset_day = Some(current_day);
            changed = true;
            if old_usage > 0 {
                tracing::info!(upstream = %self.api_name, was = old_usage, "Daily quota reset");
            }
        }

        changed
    }

    fn to_record(&self, updated_at: DateTime<Utc>) -> PersistedQuota {
        PersistedQuota {
            hourly_used: self.hourly_used,
            daily_used: self.daily_used,
            last_reset_hour: self.last_reset_hour,
            last_reset_day: self.last_reset_day,
            updated_at: Some(updated_at),
        }
    }

    fn restore(&mut self, record: &PersistedQuota) {
        self.hourly_used = record.hourly_used;
        self.daily_used = record.daily_used;
        self.last_reset_hour = record.last_reset_hour;
        self.last_reset_day = record.last_reset_day;
    }
}

/// Usage snapshot with the derived figures, for status output
///
/// Percentages are on a 0-100 scale rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaReport {
    #[serde(flatten)]
    pub usage: QuotaUsage,
    pub hourly_remaining: u32,
    pub hourly_percentage: f64,
    pub daily_remaining: Option<u32>,
    pub daily_percentage: f64,
    pub status: QuotaStatus,
    pub is_available: bool,
}

impl From<QuotaUsage> for QuotaReport {
    fn from(usage: QuotaUsage) -> Self {
        Self {
            hourly_remaining: usage.hourly_remaining(),
            hourly_percentage: as_percent(usage.hourly_percentage()),
            daily_remaining: usage.daily_remaining(),
            daily_percentage: as_percent(usage.daily_percentage()),
            status: usage.status(),
            is_available: usage.is_available(),
            usage,
        }
    }
}

fn as_percent(fraction: f64) -> f64 {
    (fraction * 1000.0).round() / 10.0
}

fn usage_fraction(used: u32, limit: u32) -> f64 {
    if limit == 0 {
        return 1.0;
    }
    (f64::from(used) / f64::from(limit)).min(1.0)
}

/// On-disk record for one upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedQuota {
    #[serde(default)]
    pub hourly_used: u32,
    #[serde(default)]
    pub daily_used: u32,
    #[serde(default)]
    pub last_reset_hour: Option<u32>,
    #[serde(default)]
    pub last_reset_day: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistedQuota {
    /// Read a record from disk
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Write a record atomically (temporary file, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let contents = serde_json::to_vec_pretty(self)?;
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, path).map_err(|e| {
            ResilienceError::Persistence(format!(
                "failed to move {} into place: {}",
                temp_path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

/// Enforces hourly and daily ceilings for one upstream
///
/// Clones share the same counters. All reads and writes happen under one
/// lock, so concurrent `consume` calls are linearized and counters stay exact.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    name: Arc<str>,
    config: QuotaConfig,
    persistence_path: Option<Arc<Path>>,
    usage: Arc<Mutex<QuotaUsage>>,
}

impl QuotaTracker {
    /// Create a tracker, restoring persisted usage when a path is given
    ///
    /// A missing or unreadable record starts from zero. Restored counters are
    /// reconciled against the current hour and day, not the stored ones.
    pub fn new(
        name: impl Into<String>,
        config: QuotaConfig,
        persistence_path: Option<PathBuf>,
    ) -> Self {
        let name: String = name.into();
        let mut usage = QuotaUsage::new(name.clone(), config);

        if let Some(path) = persistence_path.as_deref() {
            if path.exists() {
                match PersistedQuota::load(path) {
                    Ok(record) => {
                        usage.restore(&record);
                        tracing::debug!(upstream = %name, path = %path.display(), "Loaded quota state");
                    }
                    Err(e) => {
                        tracing::warn!(upstream = %name, error = %e, "Failed to load quota state")
                    }
                }
            }
        }

        let tracker = Self {
            name: Arc::from(name),
            config,
            persistence_path: persistence_path.map(Arc::from),
            usage: Arc::new(Mutex::new(usage)),
        };

        {
            let mut usage = tracker.usage.lock();
            usage.apply_resets(Utc::now());
            tracker.persist(&usage);
        }

        tracing::info!(
            upstream = %tracker.name,
            hourly_limit = config.hourly_limit,
            daily_limit = %tracker.usage.lock().daily_limit_display(),
            "Quota tracker initialized"
        );
        tracker
    }

    /// Create a tracker with no persistence
    pub fn in_memory(name: impl Into<String>, config: QuotaConfig) -> Self {
        Self::new(name, config, None)
    }

    /// Read persisted usage without creating a tracker or touching the file
    ///
    /// Returns zero usage when the record does not exist.
    pub fn read_usage(name: &str, config: QuotaConfig, path: &Path) -> Result<QuotaUsage> {
        let mut usage = QuotaUsage::new(name, config);
        if path.exists() {
            usage.restore(&PersistedQuota::load(path)?);
        }
        usage.apply_resets(Utc::now());
        Ok(usage)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> QuotaConfig {
        self.config
    }

    pub fn persistence_path(&self) -> Option<&Path> {
        self.persistence_path.as_deref()
    }

    /// Current usage snapshot
    pub fn usage(&self) -> QuotaUsage {
        let mut usage = self.usage.lock();
        self.refresh(&mut usage);
        usage.clone()
    }

    /// Whether `count` more calls fit in both the hourly and daily windows
    pub fn can_consume(&self, count: u32) -> bool {
        let mut usage = self.usage.lock();
        self.refresh(&mut usage);
        usage.has_headroom(count)
    }

    /// Record `count` calls, failing when either window lacks headroom
    pub fn consume(&self, count: u32) -> Result<()> {
        let mut usage = self.usage.lock();
        self.refresh(&mut usage);

        if !usage.has_headroom(count) {
            let window = if usage.hourly_remaining() < count {
                QuotaWindow::Hourly
            } else {
                QuotaWindow::Daily
            };
            return Err(ResilienceError::QuotaExceeded {
                name: self.name.to_string(),
                window,
                usage: usage.clone(),
            });
        }

        self.record(&mut usage, count);
        Ok(())
    }

    /// Record `count` calls even past the ceiling (for tracking calls made elsewhere)
    pub fn consume_forced(&self, count: u32) {
        let mut usage = self.usage.lock();
        self.refresh(&mut usage);
        self.record(&mut usage, count);
    }

    /// Time until at least one call fits again
    pub fn wait_time(&self) -> Duration {
        let mut usage = self.usage.lock();
        self.refresh(&mut usage);

        if usage.has_headroom(1) {
            return Duration::ZERO;
        }

        let now = Utc::now();
        if usage.hourly_remaining() == 0 {
            let into_hour = u64::from(now.minute() * 60 + now.second());
            return Duration::from_secs(3600 - into_hour);
        }
        if usage.daily_remaining() == Some(0) {
            let into_day = u64::from(now.num_seconds_from_midnight());
            return Duration::from_secs(86_400 - into_day);
        }
        Duration::ZERO
    }

    /// Zero both counters and stamp them with the current hour and day
    pub fn reset(&self) {
        let mut usage = self.usage.lock();
        let now = Utc::now();
        usage.hourly_used = 0;
        usage.daily_used = 0;
        usage.last_reset_hour = Some(now.hour());
        usage.last_reset_day = Some(now.ordinal());
        self.persist(&usage);
        tracing::info!(upstream = %self.name, "Quota manually reset");
    }

    fn refresh(&self, usage: &mut QuotaUsage) {
        if usage.apply_resets(Utc::now()) {
            self.persist(usage);
        }
    }

    fn record(&self, usage: &mut QuotaUsage, count: u32) {
        usage.hourly_used = usage.hourly_used.saturating_add(count);
        usage.daily_used = usage.daily_used.saturating_add(count);

        match usage.status() {
            QuotaStatus::Critical | QuotaStatus::Exceeded => tracing::warn!(
                upstream = %self.name,
                hourly = %format!("{}/{}", usage.hourly_used, usage.hourly_limit),
                daily = %format!("{}/{}", usage.daily_used, usage.daily_limit_display()),
                "Quota CRITICAL"
            ),
            QuotaStatus::Warning => {
                tracing::info!(upstream = %self.name, "Quota warning - approaching limits")
            }
            QuotaStatus::Ok => {}
        }

        self.persist(usage);
    }

    /// Write the record while the caller holds the lock
    fn persist(&self, usage: &QuotaUsage) {
        if let Some(path) = self.persistence_path.as_deref() {
            if let Err(e) = usage.to_record(Utc::now()).save(path) {
                tracing::warn!(upstream = %self.name, error = %e, "Failed to save quota state");
            }
        }
    }
}

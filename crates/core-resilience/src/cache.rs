//! Response cache: bounded, time-expiring memo of prior results
//!
//! Entries expire `ttl` after insertion and are dropped lazily by the next
//! `get` that observes the expiry. When full, the entry with the oldest
//! insertion time is evicted. Hits do not refresh an entry's age.

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default entry lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default maximum number of entries
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

/// A cached value and the moment it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
}

/// Thread-safe TTL cache with insertion-order eviction
///
/// # Example
/// ```
/// use tunegate_core_resilience::ResponseCache;
/// use std::time::Duration;
///
/// let cache = ResponseCache::new(100, Duration::from_secs(60));
/// cache.set("mood:happy", vec!["pop", "dance"]);
/// assert_eq!(cache.get("mood:happy"), Some(vec!["pop", "dance"]));
/// ```
#[derive(Debug)]
pub struct ResponseCache<V> {
    max_size: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Value for `key` if present and younger than the TTL
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key`, evicting the oldest entry when full
    pub fn set(&self, key: impl Into<String>, value: V) {
        if self.max_size == 0 {
            return;
        }

        let key = key.into();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones included until observed
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL)
    }
}

/// Cache key for a set of call arguments
///
/// First 16 hex characters of the SHA-256 of the arguments' JSON encoding.
pub fn fingerprint<T: Serialize + ?Sized>(args: &T) -> String {
    let encoded = serde_json::to_vec(args).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    hex::encode(digest)[..16].to_string()
}

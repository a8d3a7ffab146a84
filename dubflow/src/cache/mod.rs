//! TTL + LRU result cache for expensive deterministic computations.
//!
//! Entries are keyed by content-derived strings, expire after a TTL, and
//! are evicted least-recently-accessed-first when the cache is full. An
//! optional backing store persists gzip-compressed entries under hashed
//! filenames, so warm results survive a process restart.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::Result;

/// Cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum in-memory entries before LRU eviction.
    pub max_entries: usize,
    /// TTL applied when `store` is called without one.
    pub default_ttl: Duration,
    /// Directory for the compressed backing store. `None` disables
    /// persistence.
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl: Duration::from_secs(3600),
            persist_dir: None,
        }
    }
}

/// One cached value with access statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The content-derived key.
    pub key: String,
    /// The cached value.
    pub value: V,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Number of hits served.
    pub access_count: u64,
    /// Time of the most recent hit (or creation).
    pub last_accessed: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn new(key: String, value: V, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key,
            value,
            created_at: now,
            expires_at: now + ChronoDuration::from_std(ttl).unwrap_or_default(),
            access_count: 0,
            last_accessed: now,
        }
    }

    /// Returns true if the entry is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of in-memory entries.
    pub entries: usize,
    /// Approximate serialized size of all entries in bytes.
    pub approximate_bytes: usize,
    /// Hits since construction or the last clear.
    pub hits: u64,
    /// Misses since construction or the last clear.
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when no lookups have happened.
    pub hit_rate: f64,
    /// misses / (hits + misses), 0.0 when no lookups have happened.
    pub miss_rate: f64,
    /// Creation time of the oldest entry.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Creation time of the newest entry.
    pub newest_entry: Option<DateTime<Utc>>,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Memoization cache with TTL expiry, LRU eviction, and optional
/// compressed persistence.
pub struct ResultCache<V> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.inner.lock().entries.len())
            .field("max_entries", &self.config.max_entries)
            .finish()
    }
}

/// Derives a cache key from an operation name and its distinguishing inputs.
#[must_use]
pub fn cache_key(operation: &str, components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    for component in components {
        hasher.update([0u8]);
        hasher.update(component.as_bytes());
    }
    format!("{operation}:{}", hex::encode(&hasher.finalize()[..16]))
}

impl<V> ResultCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Creates a cache with the given config.
    ///
    /// Creates the persistence directory if configured and missing.
    pub fn new(config: CacheConfig) -> Result<Self> {
        if let Some(dir) = &config.persist_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            config,
        })
    }

    /// Creates an in-memory cache with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            config: CacheConfig::default(),
        }
    }

    /// Stores a value under `key`.
    ///
    /// At capacity, the least-recently-accessed entry is evicted first.
    /// With persistence enabled, a compressed copy is written to the
    /// backing store; write failures are logged, not surfaced.
    pub fn store(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry::new(key.to_string(), value, ttl);

        {
            let mut inner = self.inner.lock();
            if !inner.entries.contains_key(key) && inner.entries.len() >= self.config.max_entries {
                if let Some(lru_key) = inner
                    .entries
                    .values()
                    .min_by_key(|e| e.last_accessed)
                    .map(|e| e.key.clone())
                {
                    debug!(key = %lru_key, "evicting least-recently-accessed entry");
                    inner.entries.remove(&lru_key);
                    self.remove_persisted(&lru_key);
                }
            }
            inner.entries.insert(key.to_string(), entry.clone());
        }

        if let Err(err) = self.persist_entry(&entry) {
            warn!(key, error = %err, "failed to persist cache entry");
        }
    }

    /// Retrieves the value for `key`, if present and unexpired.
    ///
    /// A memory miss falls back to the backing store; a loaded entry is
    /// promoted into memory. Every hit updates access statistics.
    pub fn retrieve(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.is_expired() {
                inner.entries.remove(key);
                inner.misses += 1;
                drop(inner);
                self.remove_persisted(key);
                return None;
            }
            entry.access_count += 1;
            entry.last_accessed = Utc::now();
            let value = entry.value.clone();
            inner.hits += 1;
            return Some(value);
        }

        // Memory miss: try the backing store.
        if let Some(mut entry) = self.load_persisted(key) {
            if entry.is_expired() {
                inner.misses += 1;
                drop(inner);
                self.remove_persisted(key);
                return None;
            }
            entry.access_count += 1;
            entry.last_accessed = Utc::now();
            let value = entry.value.clone();

            if inner.entries.len() >= self.config.max_entries {
                if let Some(lru_key) = inner
                    .entries
                    .values()
                    .min_by_key(|e| e.last_accessed)
                    .map(|e| e.key.clone())
                {
                    inner.entries.remove(&lru_key);
                }
            }
            inner.entries.insert(key.to_string(), entry);
            inner.hits += 1;
            return Some(value);
        }

        inner.misses += 1;
        None
    }

    /// Returns true if `key` resolves to an unexpired entry.
    ///
    /// Does not count as a lookup for hit/miss statistics and does not
    /// update access times.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        {
            let inner = self.inner.lock();
            if let Some(entry) = inner.entries.get(key) {
                return !entry.is_expired();
            }
        }
        self.load_persisted(key).is_some_and(|e| !e.is_expired())
    }

    /// Deletes the entry for `key` from memory and the backing store.
    pub fn delete(&self, key: &str) {
        self.inner.lock().entries.remove(key);
        self.remove_persisted(key);
    }

    /// Removes all entries, including persisted copies, and resets
    /// hit/miss counters.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.entries.clear();
            inner.hits = 0;
            inner.misses = 0;
        }
        if let Some(dir) = &self.config.persist_dir {
            if let Ok(read) = std::fs::read_dir(dir) {
                for entry in read.flatten() {
                    let path = entry.path();
                    if path.extension().is_some_and(|e| e == "gz") {
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
        }
    }

    /// Periodic sweep: drops expired memory entries and persisted files
    /// older than twice the default TTL.
    ///
    /// The doubled window defends against orphaned files left by process
    /// restarts. Returns the number of memory entries removed.
    pub fn cleanup(&self) -> usize {
        let removed_keys: Vec<String> = {
            let mut inner = self.inner.lock();
            let expired: Vec<String> = inner
                .entries
                .values()
                .filter(|e| e.is_expired())
                .map(|e| e.key.clone())
                .collect();
            for key in &expired {
                inner.entries.remove(key);
            }
            expired
        };
        for key in &removed_keys {
            self.remove_persisted(key);
        }

        if let Some(dir) = &self.config.persist_dir {
            let horizon = self.config.default_ttl * 2;
            Self::sweep_stale_files(dir, horizon);
        }

        removed_keys.len()
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        let approximate_bytes = inner
            .entries
            .values()
            .map(|e| serde_json::to_vec(e).map(|v| v.len()).unwrap_or(0))
            .sum();

        CacheStats {
            entries: inner.entries.len(),
            approximate_bytes,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            miss_rate: if lookups == 0 {
                0.0
            } else {
                inner.misses as f64 / lookups as f64
            },
            oldest_entry: inner.entries.values().map(|e| e.created_at).min(),
            newest_entry: inner.entries.values().map(|e| e.created_at).max(),
        }
    }

    fn persisted_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.config.persist_dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Some(dir.join(format!("{}.json.gz", hex::encode(hasher.finalize()))))
    }

    fn persist_entry(&self, entry: &CacheEntry<V>) -> std::io::Result<()> {
        let Some(path) = self.persisted_path(&entry.key) else {
            return Ok(());
        };
        let json = serde_json::to_vec(entry)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        std::fs::write(path, encoder.finish()?)
    }

    fn load_persisted(&self, key: &str) -> Option<CacheEntry<V>> {
        let path = self.persisted_path(key)?;
        let compressed = std::fs::read(&path).ok()?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).ok()?;
        match serde_json::from_slice(&json) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key, error = %err, "discarding unreadable persisted cache entry");
                let _ = std::fs::remove_file(path);
                None
            }
        }
    }

    fn remove_persisted(&self, key: &str) {
        if let Some(path) = self.persisted_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }

    fn sweep_stale_files(dir: &Path, horizon: Duration) {
        let Ok(read) = std::fs::read_dir(dir) else {
            return;
        };
        let now = std::time::SystemTime::now();
        for entry in read.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "gz") {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > horizon);
            if stale {
                debug!(path = %path.display(), "removing stale persisted cache file");
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::error::{StorageError, StorageResult};

/// Called with the key and data of every entry dropped for capacity or by `clear`.
pub type EvictionCallback<T> = Box<dyn Fn(&str, &T) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub max_size: usize,
    pub default_ttl: Duration,
    /// Evict the least recently used entry when full; otherwise the oldest inserted.
    pub enable_lru: bool,
    /// Keep payloads as LZ4-compressed JSON.
    pub enable_compression: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            max_size: settings.max_size,
            default_ttl: settings.default_ttl(),
            enable_lru: settings.enable_lru,
            enable_compression: settings.enable_compression,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub expired_count: usize,
    pub total_access_count: u64,
    /// Approximate bytes held: key lengths plus serialized payload sizes.
    pub memory_usage: usize,
}

enum Payload<T> {
    Plain(T),
    Compressed(Vec<u8>),
}

struct CacheEntry<T> {
    payload: Payload<T>,
    size: usize,
    timestamp: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_count: u64,
    last_accessed: DateTime<Utc>,
    /// Position in eviction order; smallest is evicted first.
    rank: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// In-memory cache with lazy TTL expiry and a hard capacity ceiling.
pub struct GenericCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    options: CacheOptions,
    on_evict: Option<EvictionCallback<T>>,
    clock: u64,
}

impl<T> GenericCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(options: CacheOptions) -> Self {
        Self {
            entries: HashMap::new(),
            options,
            on_evict: None,
            clock: 0,
        }
    }

    pub fn with_eviction_callback(mut self, callback: EvictionCallback<T>) -> Self {
        self.on_evict = Some(callback);
        self
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Insert or overwrite `key`. A missing or zero `ttl` uses the cache default.
    pub fn set(&mut self, key: &str, data: T, ttl: Option<Duration>) {
        let now = Utc::now();
        let ttl = match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => self.options.default_ttl,
        };
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let existing_rank = self.entries.get(key).map(|e| e.rank);
        if existing_rank.is_none() && self.entries.len() >= self.options.max_size.max(1) {
            self.cleanup();
            if self.entries.len() >= self.options.max_size.max(1) {
                self.evict_one();
            }
        }

        let rank = match existing_rank {
            Some(rank) if !self.options.enable_lru => rank,
            _ => self.tick(),
        };
        let (payload, size) = self.encode(key, data);

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                size,
                timestamp: now,
                expires_at,
                access_count: 0,
                last_accessed: now,
                rank,
            },
        );
    }

    /// Fetch `key`, dropping it if it has expired.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let now = Utc::now();
        if self.entries.get(key)?.is_expired(now) {
            self.entries.remove(key);
            return None;
        }

        let rank = self.options.enable_lru.then(|| self.tick());
        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        if let Some(rank) = rank {
            entry.rank = rank;
        }

        match decode(&entry.payload) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.entries.remove(key);
                None
            }
        }
    }

    /// Whether a live entry exists. Does not touch counters or eviction order.
    pub fn has(&self, key: &str) -> bool {
        let now = Utc::now();
        self.entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry, reporting each one to the eviction callback.
    pub fn clear(&mut self) {
        let entries: Vec<_> = self.entries.drain().collect();
        for (key, entry) in entries {
            self.notify_evicted(&key, &entry);
        }
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Removed expired cache entries");
        }
        removed
    }

    /// Keys from `keys` that have no live entry.
    ///
    /// Together with [`GenericCache::fill`] this lets a shared cache be
    /// warmed without holding its lock while the loads run.
    pub fn missing<I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        keys.into_iter().filter(|k| !self.has(k)).collect()
    }

    /// Store loader results. Failures are logged and skipped, and keys that
    /// gained a live entry since [`GenericCache::missing`] are left alone.
    /// Returns how many entries were stored.
    pub fn fill<E: Display>(&mut self, loaded: Vec<(String, Result<T, E>)>) -> usize {
        let requested = loaded.len();
        let mut stored = 0usize;
        for (key, result) in loaded {
            match result {
                Ok(_) if self.has(&key) => {}
                Ok(data) => {
                    self.set(&key, data, None);
                    stored += 1;
                }
                Err(e) => warn!(key = %key, error = %e, "Cache warmup failed"),
            }
        }
        debug!(requested, stored, "Cache warmup finished");
        stored
    }

    /// Load and cache every key that is not already cached.
    ///
    /// Loads run concurrently. A failed load is logged and skipped. Use
    /// `missing` and `fill` instead when the cache sits behind a lock.
    pub async fn warmup<I, F, Fut, E>(&mut self, keys: I, loader: F)
    where
        I: IntoIterator<Item = String>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let missing = self.missing(keys);
        if missing.is_empty() {
            return;
        }
        let results = join_all(missing.iter().map(|k| loader(k.clone()))).await;
        self.fill(missing.into_iter().zip(results).collect());
    }

    pub fn get_stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut stats = CacheStats {
            size: self.entries.len(),
            max_size: self.options.max_size,
            ..CacheStats::default()
        };
        for (key, entry) in &self.entries {
            if entry.is_expired(now) {
                stats.expired_count += 1;
            }
            stats.total_access_count += entry.access_count;
            stats.memory_usage += key.len() + entry.size;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Access count of a live entry.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        let now = Utc::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.access_count)
    }

    /// When a live entry was stored and last read.
    pub fn entry_times(&self, key: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let now = Utc::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| (e.timestamp, e.last_accessed))
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.rank)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            if let Some(entry) = self.entries.remove(&key) {
                debug!(key = %key, "Evicted cache entry");
                self.notify_evicted(&key, &entry);
            }
        }
    }

    fn notify_evicted(&self, key: &str, entry: &CacheEntry<T>) {
        let Some(ref callback) = self.on_evict else {
            return;
        };
        match &entry.payload {
            Payload::Plain(data) => callback(key, data),
            Payload::Compressed(_) => match decode(&entry.payload) {
                Ok(data) => callback(key, &data),
                Err(e) => warn!(key, error = %e, "Cannot report evicted entry"),
            },
        }
    }

    fn encode(&self, key: &str, data: T) -> (Payload<T>, usize) {
        let bytes = match serde_json::to_vec(&data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Cache payload not serializable, size unknown");
                return (Payload::Plain(data), 0);
            }
        };
        if !self.options.enable_compression {
            return (Payload::Plain(data), bytes.len());
        }
        match lz4::block::compress(&bytes, None, true) {
            Ok(compressed) => {
                let size = compressed.len();
                (Payload::Compressed(compressed), size)
            }
            Err(e) => {
                warn!(key, error = %e, "LZ4 compression failed, storing uncompressed");
                (Payload::Plain(data), bytes.len())
            }
        }
    }
}

fn decode<T: Clone + DeserializeOwned>(payload: &Payload<T>) -> StorageResult<T> {
    match payload {
        Payload::Plain(data) => Ok(data.clone()),
        Payload::Compressed(bytes) => {
            let raw = lz4::block::decompress(bytes, None)
                .map_err(|e| StorageError::Compression(format!("LZ4 decompression failed: {}", e)))?;
            Ok(serde_json::from_slice(&raw)?)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn options(max_size: usize, enable_lru: bool) -> CacheOptions {
        CacheOptions {
            max_size,
            default_ttl: Duration::from_secs(60),
            enable_lru,
            enable_compression: false,
        }
    }

    fn recording_cache(opts: CacheOptions) -> (GenericCache<String>, Arc<Mutex<Vec<String>>>) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let cache = GenericCache::new(opts).with_eviction_callback(Box::new(move |key: &str, _: &String| {
            sink.lock().unwrap().push(key.to_string());
        }));
        (cache, evicted)
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = GenericCache::new(options(10, true));
        cache.set("k", "v".to_string(), Some(Duration::from_millis(100)));

        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.access_count("k"), Some(1));

        std::thread::sleep(Duration::from_millis(150));
        assert!(!cache.has("k"));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_uses_default() {
        let mut cache = GenericCache::new(options(10, true));
        cache.set("k", 1u32, Some(Duration::ZERO));
        let (stored, _) = cache.entry_times("k").unwrap();
        assert!(cache.has("k"));
        assert!(stored <= Utc::now());
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let (mut cache, evicted) = recording_cache(options(2, true));
        cache.set("A", "a".to_string(), None);
        cache.set("B", "b".to_string(), None);
        cache.get("A");
        cache.set("C", "c".to_string(), None);

        assert!(cache.has("A"));
        assert!(!cache.has("B"));
        assert!(cache.has("C"));
        assert_eq!(*evicted.lock().unwrap(), vec!["B".to_string()]);
    }

    #[test]
    fn test_fifo_evicts_oldest_insert() {
        let (mut cache, evicted) = recording_cache(options(2, false));
        cache.set("A", "a".to_string(), None);
        cache.set("B", "b".to_string(), None);
        cache.get("A");
        cache.set("C", "c".to_string(), None);

        assert!(!cache.has("A"));
        assert!(cache.has("B"));
        assert_eq!(*evicted.lock().unwrap(), vec!["A".to_string()]);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let (mut cache, evicted) = recording_cache(options(2, true));
        cache.set("A", "a".to_string(), None);
        cache.set("B", "b".to_string(), None);
        cache.set("A", "a2".to_string(), None);
        assert_eq!(cache.len(), 2);
        assert!(evicted.lock().unwrap().is_empty());
        assert_eq!(cache.get("A").as_deref(), Some("a2"));
    }

    #[test]
    fn test_has_does_not_count_access() {
        let mut cache = GenericCache::new(options(10, true));
        cache.set("k", 5i64, None);
        assert!(cache.has("k"));
        assert_eq!(cache.access_count("k"), Some(0));
    }

    #[test]
    fn test_clear_reports_every_entry() {
        let (mut cache, evicted) = recording_cache(options(10, true));
        cache.set("A", "a".to_string(), None);
        cache.set("B", "b".to_string(), None);
        cache.clear();

        let mut keys = evicted.lock().unwrap().clone();
        keys.sort();
        assert_eq!(keys, vec!["A".to_string(), "B".to_string()]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_and_stats() {
        let mut cache = GenericCache::new(options(10, true));
        cache.set("short", "x".to_string(), Some(Duration::from_millis(20)));
        cache.set("long", "y".to_string(), None);
        cache.get("long");
        cache.get("long");

        std::thread::sleep(Duration::from_millis(40));
        let stats = cache.get_stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 10);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.total_access_count, 2);
        assert!(stats.memory_usage > 0);

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.get_stats().size, 1);
    }

    #[test]
    fn test_compressed_round_trip() {
        let mut opts = options(10, true);
        opts.enable_compression = true;
        let mut cache = GenericCache::new(opts);
        let data: Vec<String> = (0..50).map(|i| format!("method-{}", i)).collect();
        cache.set("methods", data.clone(), None);
        assert_eq!(cache.get("methods"), Some(data));
    }

    #[test]
    fn test_delete() {
        let mut cache = GenericCache::new(options(10, true));
        cache.set("k", 1u8, None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
    }

    #[tokio::test]
    async fn test_warmup_skips_cached_and_survives_failures() {
        let mut cache = GenericCache::new(options(10, true));
        cache.set("cached", "old".to_string(), None);

        let keys = vec!["cached".to_string(), "ok".to_string(), "bad".to_string()];
        cache
            .warmup(keys, |key| async move {
                match key.as_str() {
                    "bad" => Err("backend unavailable".to_string()),
                    "cached" => panic!("cached keys must not be reloaded"),
                    _ => Ok(format!("loaded {}", key)),
                }
            })
            .await;

        assert_eq!(cache.get("cached").as_deref(), Some("old"));
        assert_eq!(cache.get("ok").as_deref(), Some("loaded ok"));
        assert!(!cache.has("bad"));
    }

    #[test]
    fn test_fill_keeps_entries_written_meanwhile() {
        let mut cache = GenericCache::new(options(10, true));
        let missing = cache.missing(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(missing, vec!["a".to_string(), "b".to_string()]);

        // "a" is written while the loads are in flight.
        cache.set("a", "fresh".to_string(), None);
        let stored = cache.fill(vec![
            ("a".to_string(), Ok::<_, String>("stale".to_string())),
            ("b".to_string(), Ok("loaded".to_string())),
        ]);
        assert_eq!(stored, 1);
        assert_eq!(cache.get("a").as_deref(), Some("fresh"));
        assert_eq!(cache.get("b").as_deref(), Some("loaded"));
    }
}

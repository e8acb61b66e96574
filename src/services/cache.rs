// Schema/result cache
//
// Bounded TTL cache shared by schema introspection (longer TTL) and small
// query results (shorter TTL). Expired entries are evicted lazily on read;
// overflow evicts the oldest-inserted entry.

use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedEntry {
    value: Value,
    cached_at: Instant,
    ttl: Duration,
    /// Monotonic insertion sequence, used for oldest-entry eviction.
    seq: u64,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    entries: HashMap<String, CachedEntry>,
    next_seq: u64,
    stats: CacheStats,
}

pub struct TtlCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
            max_entries,
            default_ttl,
        }
    }

    /// Cache key from a namespace and its identifying parts.
    pub fn key(namespace: &str, parts: &[&str]) -> String {
        let mut hasher = DefaultHasher::new();
        for part in parts {
            part.hash(&mut hasher);
        }
        format!("{}:{:x}", namespace, hasher.finish())
    }

    /// Returns None on miss or when the entry's TTL has elapsed, even if the
    /// entry was never explicitly evicted.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                inner.entries.remove(key);
                inner.stats.misses += 1;
                inner.stats.expirations += 1;
                tracing::debug!("Cache expired for key: {}", key);
                None
            }
            Some(entry) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: String, value: Value, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();

        if inner.entries.len() >= self.max_entries && !inner.entries.contains_key(&key) {
            // Evict the oldest-inserted entry
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
                tracing::debug!("Evicted cache entry: {}", oldest);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CachedEntry {
                value,
                cached_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                seq,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().unwrap().entries.remove(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.entries.len();
        inner.entries.clear();
        tracing::info!("Cleared {} cache entries", count);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.set("k1".to_string(), json!({"rows": 2}), None);
        assert_eq!(cache.get("k1").unwrap()["rows"], 2);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_ttl_expiry_without_explicit_eviction() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.set("k1".to_string(), json!(1), Some(Duration::from_millis(50)));
        assert!(cache.get("k1").is_some());

        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_oldest_entry_evicted_on_overflow() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("k1".to_string(), json!(1), None);
        cache.set("k2".to_string(), json!(2), None);
        cache.set("k3".to_string(), json!(3), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_some());
        assert!(cache.get("k3").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_key_namespacing() {
        let k1 = TtlCache::key("schema", &["t1", "orders"]);
        let k2 = TtlCache::key("schema", &["t1", "orders"]);
        let k3 = TtlCache::key("result", &["t1", "orders"]);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_stats_hits_and_misses() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.set("k1".to_string(), json!(1), None);
        cache.get("k1");
        cache.get("k1");
        cache.get("nope");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_ratio() > 0.6);
    }
}

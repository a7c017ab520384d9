//! In-process TTL cache for market responses
//!
//! An explicitly constructed instance owned by whoever needs it (the server
//! state), with explicit TTL and invalidation operations. Expired entries
//! are dropped lazily on read.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Keyed cache with a fixed per-instance TTL.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Get a live entry, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => {
                debug!("Cache hit for {}", key);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        debug!("Caching response for {}", key);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    /// Drop a single key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key).is_some()
    }

    /// Drop everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of entries, live or expired.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache: TtlCache<String> = TtlCache::new(60);
        assert!(cache.get("listings:100").is_none());

        cache.insert("listings:100", "payload".to_string());
        assert_eq!(cache.get("listings:100").as_deref(), Some("payload"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_dropped_on_read() {
        // Negative TTL: everything is already expired
        let cache: TtlCache<u32> = TtlCache::new(-1);
        cache.insert("quotes:BTC", 1);

        assert!(cache.get("quotes:BTC").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache: TtlCache<u32> = TtlCache::new(60);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let cache: TtlCache<u32> = TtlCache::new(60);
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.len(), 1);
    }
}

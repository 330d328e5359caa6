//! In-memory TTL fallback store, used when Redis is absent or erroring.
//!
//! Grounded in the pool-or-launch fallback pattern of `browser_pool/mod.rs`
//! (prefer the managed resource, degrade to a locally-owned one on
//! exhaustion/failure) applied to cache reads/writes instead of browsers.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

struct Entry {
    value: Value,
    expires_at: Instant,
}

pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                drop(self.entries.remove(key));
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// The in-memory store has no glob index, so any pattern clear wipes
    /// everything (spec.md §9 open question, resolved as-is).
    pub fn clear_pattern(&self, _pattern: Option<&str>) {
        self.entries.clear();
    }

    pub fn clean_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_within_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", json!({"a": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn expires_after_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_replaces_not_duplicates() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), Duration::from_secs(60));
        cache.set("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    #[test]
    fn clear_pattern_wipes_everything() {
        let cache = MemoryCache::new();
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("b", json!(2), Duration::from_secs(60));
        cache.clear_pattern(Some("a*"));
        assert!(cache.is_empty());
    }

    #[test]
    fn clean_expired_removes_only_expired() {
        let cache = MemoryCache::new();
        cache.set("stale", json!(1), Duration::from_millis(5));
        cache.set("fresh", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(15));
        let removed = cache.clean_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }
}

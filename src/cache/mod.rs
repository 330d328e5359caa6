//! Layered cache manager (§4.6): Redis primary, in-memory TTL fallback.
//!
//! Grounded in `browser_pool/mod.rs`'s "prefer the pooled resource, degrade
//! gracefully" shape — here the managed resource is a Redis connection and
//! the fallback is an in-process map instead of a freshly launched browser.

pub mod memory_backend;
pub mod redis_backend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CacheMode;
use memory_backend::MemoryCache;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    data: Value,
    expires_at_ms: i64,
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default)]
pub struct CacheGetResult {
    pub data: Option<Value>,
    pub from_cache: bool,
    pub ttl: Option<Duration>,
}

impl CacheGetResult {
    fn miss() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct CacheStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub memory_entries: usize,
    pub redis_configured: bool,
}

pub struct CacheManager {
    mode: CacheMode,
    prefix: String,
    default_ttl: Duration,
    redis: Option<ConnectionManager>,
    memory: MemoryCache,
    stats: CacheStatsInner,
}

impl CacheManager {
    /// Connect to Redis (if configured and reachable); always usable even
    /// when Redis is absent, since reads/writes then go straight to the
    /// in-memory fallback.
    pub async fn connect(
        redis_url: Option<&str>,
        mode: CacheMode,
        prefix: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        let redis = match redis_url {
            Some(url) if mode != CacheMode::Disabled => redis_backend::connect(url).await,
            _ => None,
        };
        Self {
            mode,
            prefix: prefix.into(),
            default_ttl,
            redis,
            memory: MemoryCache::new(),
            stats: CacheStatsInner::default(),
        }
    }

    fn physical_key(&self, logical_key: &str) -> String {
        format!("{}{}", self.prefix, logical_key)
    }

    pub async fn get(&self, key: &str) -> CacheGetResult {
        let physical = self.physical_key(key);

        if self.mode == CacheMode::Disabled {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return CacheGetResult::miss();
        }

        if self.mode != CacheMode::Bypass {
            if let Some(manager) = self.redis.clone() {
                match redis_backend::get(manager.clone(), &physical).await {
                    Ok(Some(raw)) => match serde_json::from_str::<CacheEnvelope>(&raw) {
                        Ok(envelope) => {
                            let now = now_ms();
                            if envelope.expires_at_ms > now {
                                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                                let ttl = Duration::from_millis(
                                    (envelope.expires_at_ms - now).max(0) as u64,
                                );
                                return CacheGetResult {
                                    data: Some(envelope.data),
                                    from_cache: true,
                                    ttl: Some(ttl),
                                };
                            }
                            if let Err(err) = redis_backend::del(manager, &physical).await {
                                log::warn!("failed to evict expired cache entry {physical}: {err}");
                            }
                        }
                        Err(err) => {
                            log::warn!("cache entry {physical} failed to parse, treating as miss: {err}");
                        }
                    },
                    Ok(None) => {}
                    Err(err) => {
                        log::warn!("redis get failed for {physical}, falling back to memory: {err}");
                    }
                }
            }
        }

        if let Some(value) = self.memory.get(&physical) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return CacheGetResult {
                data: Some(value),
                from_cache: true,
                ttl: None,
            };
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        CacheGetResult::miss()
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        if matches!(self.mode, CacheMode::Disabled | CacheMode::ReadOnly) {
            return;
        }
        let physical = self.physical_key(key);
        let ttl = ttl.unwrap_or(self.default_ttl);

        if self.mode != CacheMode::Bypass {
            if let Some(manager) = self.redis.clone() {
                let envelope = CacheEnvelope {
                    data: value.clone(),
                    expires_at_ms: now_ms() + ttl.as_millis() as i64,
                };
                match serde_json::to_string(&envelope) {
                    Ok(raw) => {
                        if let Err(err) =
                            redis_backend::set_ex(manager, &physical, &raw, ttl.as_secs()).await
                        {
                            log::warn!("redis set failed for {physical}, falling back to memory: {err}");
                            self.memory.set(&physical, value, ttl);
                        }
                        return;
                    }
                    Err(err) => log::warn!("failed to serialize cache entry {physical}: {err}"),
                }
            }
        }
        self.memory.set(&physical, value, ttl);
    }

    pub async fn delete(&self, key: &str) {
        let physical = self.physical_key(key);
        if let Some(manager) = self.redis.clone() {
            if let Err(err) = redis_backend::del(manager, &physical).await {
                log::warn!("redis delete failed for {physical}: {err}");
            }
        }
        self.memory.delete(&physical);
    }

    /// Clear keys matching `pattern` (default `*`). Uses Redis `KEYS` +
    /// `DEL`; the memory fallback has no glob index so it wipes entirely
    /// regardless of `pattern` (spec.md §9 open question, resolved as-is).
    pub async fn clear(&self, pattern: Option<&str>) {
        let glob = format!("{}{}", self.prefix, pattern.unwrap_or("*"));
        if let Some(manager) = self.redis.clone() {
            match redis_backend::keys(manager.clone(), &glob).await {
                Ok(keys) if !keys.is_empty() => {
                    if let Err(err) = redis_backend::del_many(manager, &keys).await {
                        log::warn!("redis pattern clear failed for {glob}: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => log::warn!("redis KEYS failed for {glob}: {err}"),
            }
        }
        self.memory.clear_pattern(pattern);
    }

    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
            redis_configured: self.redis.is_some(),
        }
    }

    /// Sweep the memory fallback for expired entries; Redis entries expire
    /// on their own via `SETEX`.
    pub fn clean_expired(&self) -> usize {
        self.memory.clean_expired()
    }

    pub async fn health_check(&self) -> bool {
        match self.redis.clone() {
            Some(manager) => redis_backend::ping(manager).await,
            None => false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.redis.is_some()
    }
}

/// Canonical key shapes (§6).
pub mod keys {
    pub fn scrape(url: &str, scraper_type: &str) -> String {
        format!("scrape:{url}:{scraper_type}:default")
    }

    pub fn validation(content_hash: &str, strategy: &str) -> String {
        format!("validation:{content_hash}:{strategy}")
    }

    pub fn route(method: &str, url: &str, query_json: &str) -> String {
        format!("route:{method}:{url}:{query_json}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_only_set_then_get() {
        let cache = CacheManager::connect(None, CacheMode::Enabled, "test:", Duration::from_secs(60)).await;
        cache.set("k", serde_json::json!({"a": 1}), None).await;
        let result = cache.get("k").await;
        assert!(result.from_cache);
        assert_eq!(result.data, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn disabled_mode_always_misses() {
        let cache = CacheManager::connect(None, CacheMode::Disabled, "test:", Duration::from_secs(60)).await;
        cache.set("k", serde_json::json!(1), None).await;
        let result = cache.get("k").await;
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn readonly_mode_rejects_writes() {
        let cache = CacheManager::connect(None, CacheMode::ReadOnly, "test:", Duration::from_secs(60)).await;
        cache.set("k", serde_json::json!(1), None).await;
        let result = cache.get("k").await;
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn clear_wipes_memory_fallback() {
        let cache = CacheManager::connect(None, CacheMode::Enabled, "test:", Duration::from_secs(60)).await;
        cache.set("a", serde_json::json!(1), None).await;
        cache.clear(Some("a*")).await;
        assert!(!cache.get("a").await.from_cache);
    }

    #[test]
    fn key_shapes_match_contract() {
        assert_eq!(keys::scrape("https://x", "http"), "scrape:https://x:http:default");
        assert_eq!(keys::validation("abc123", "hybrid"), "validation:abc123:hybrid");
    }
}

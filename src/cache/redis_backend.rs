//! Redis connection management and primitive operations.
//!
//! `ConnectionManager` is designed to be cloned cheaply and shared across
//! concurrent callers (it multiplexes over an internally reconnecting
//! connection), so `CacheManager` holds one and every call below takes it
//! by value via a cheap clone rather than behind a lock.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Mirrors `maxRetriesPerRequest=3` from the source's Redis client options,
/// applied to the initial lazy connect rather than per-request.
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Lazily connect with exponential backoff (50ms × attempt, capped at 2s).
pub async fn connect(url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(err) => {
            log::warn!("invalid redis url, cache will degrade to memory: {err}");
            return None;
        }
    };

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match client.get_connection_manager().await {
            Ok(manager) => {
                log::info!("connected to redis on attempt {attempt}");
                return Some(manager);
            }
            Err(err) => {
                log::warn!(
                    "redis connection attempt {attempt}/{MAX_CONNECT_ATTEMPTS} failed: {err}"
                );
                if attempt == MAX_CONNECT_ATTEMPTS {
                    log::warn!("exhausted redis connection attempts, cache will degrade to memory");
                    return None;
                }
                let backoff = Duration::from_millis(50 * u64::from(attempt)).min(Duration::from_secs(2));
                tokio::time::sleep(backoff).await;
            }
        }
    }
    None
}

pub async fn get(mut manager: ConnectionManager, key: &str) -> redis::RedisResult<Option<String>> {
    manager.get(key).await
}

pub async fn set_ex(
    mut manager: ConnectionManager,
    key: &str,
    value: &str,
    ttl_secs: u64,
) -> redis::RedisResult<()> {
    let ttl_secs = ttl_secs.max(1);
    manager.set_ex(key, value, ttl_secs).await
}

pub async fn del(mut manager: ConnectionManager, key: &str) -> redis::RedisResult<()> {
    let _: i64 = manager.del(key).await?;
    Ok(())
}

pub async fn keys(mut manager: ConnectionManager, pattern: &str) -> redis::RedisResult<Vec<String>> {
    manager.keys(pattern).await
}

pub async fn del_many(mut manager: ConnectionManager, keys: &[String]) -> redis::RedisResult<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let _: i64 = manager.del(keys).await?;
    Ok(())
}

/// `PING`-based health check.
pub async fn ping(mut manager: ConnectionManager) -> bool {
    redis::cmd("PING")
        .query_async::<String>(&mut manager)
        .await
        .is_ok()
}

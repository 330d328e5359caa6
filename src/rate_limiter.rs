//! Sliding-window rate limiter (§4.9).
//!
//! The crawler's `rate_limiter.rs` is a lock-free token bucket keyed by
//! domain; this keeps its per-key `DashMap` idiom but replaces the
//! algorithm with a sliding window log, since the contract here is
//! `allowed`/`remaining`/`reset_time` per key rather than a refill rate.
//! Each key's timestamp deque is behind its own lock so mutation is
//! serialized per key without a process-wide lock (§5 locking discipline).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: Instant,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Standard + legacy rate-limit response headers (§6).
    pub fn headers(&self, limit: u32) -> Vec<(&'static str, String)> {
        let reset_secs = self
            .reset_time
            .saturating_duration_since(Instant::now())
            .as_secs();
        let mut headers = vec![
            ("RateLimit-Limit", limit.to_string()),
            ("RateLimit-Remaining", self.remaining.to_string()),
            ("RateLimit-Reset", reset_secs.to_string()),
            ("X-RateLimit-Limit", limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", reset_secs.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            headers.push(("Retry-After", retry_after.as_secs().to_string()));
        }
        headers
    }
}

pub struct RateLimiter {
    buckets: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Record a request for `key` and decide whether it's within
    /// `cfg.max_requests` in the trailing `cfg.window`.
    ///
    /// Invariant (§8.9): in any `window`, `allowed` calls for a key never
    /// exceed `max_requests`.
    pub fn check_limit(&self, key: &str, cfg: RateLimitConfig) -> RateLimitDecision {
        let now = Instant::now();
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut timestamps = entry.lock();

        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= cfg.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() as u32 >= cfg.max_requests {
            let retry_after = timestamps
                .front()
                .map(|&oldest| cfg.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(cfg.window);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time: now + retry_after,
                retry_after: Some(retry_after),
            }
        } else {
            timestamps.push_back(now);
            let remaining = cfg.max_requests - timestamps.len() as u32;
            RateLimitDecision {
                allowed: true,
                remaining,
                reset_time: now + cfg.window,
                retry_after: None,
            }
        }
    }

    pub fn clear(&self, key: &str) {
        self.buckets.remove(key);
    }

    pub fn tracked_key_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Default keyer: remote address, falling back to the first
/// `X-Forwarded-For` entry.
#[must_use]
pub fn default_key(remote_addr: Option<&str>, forwarded_for: Option<&str>) -> String {
    if let Some(addr) = remote_addr {
        return addr.to_string();
    }
    forwarded_for
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown")
        .to_string()
}

/// Per-user keyer: an authenticated principal id.
#[must_use]
pub fn per_user_key(principal_id: &str) -> String {
    format!("user:{principal_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_under_limit() {
        let limiter = RateLimiter::new();
        let cfg = RateLimitConfig {
            window: Duration::from_millis(1000),
            max_requests: 3,
        };
        for _ in 0..3 {
            let decision = limiter.check_limit("k", cfg);
            assert!(decision.allowed);
        }
    }

    #[test]
    fn denies_over_limit_within_window() {
        let limiter = RateLimiter::new();
        let cfg = RateLimitConfig {
            window: Duration::from_millis(1000),
            max_requests: 3,
        };
        for _ in 0..3 {
            assert!(limiter.check_limit("k", cfg).allowed);
        }
        let fourth = limiter.check_limit("k", cfg);
        assert!(!fourth.allowed);
        assert!(fourth.retry_after.is_some());
        let fifth = limiter.check_limit("k", cfg);
        assert!(!fifth.allowed);
    }

    #[test]
    fn allows_again_after_window_elapses() {
        let limiter = RateLimiter::new();
        let cfg = RateLimitConfig {
            window: Duration::from_millis(30),
            max_requests: 1,
        };
        assert!(limiter.check_limit("k", cfg).allowed);
        assert!(!limiter.check_limit("k", cfg).allowed);
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check_limit("k", cfg).allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let cfg = RateLimitConfig {
            window: Duration::from_millis(1000),
            max_requests: 1,
        };
        assert!(limiter.check_limit("a", cfg).allowed);
        assert!(limiter.check_limit("b", cfg).allowed);
        assert!(!limiter.check_limit("a", cfg).allowed);
    }

    #[test]
    fn default_key_prefers_remote_addr() {
        assert_eq!(default_key(Some("1.2.3.4"), Some("5.6.7.8")), "1.2.3.4");
        assert_eq!(default_key(None, Some("5.6.7.8, 9.9.9.9")), "5.6.7.8");
        assert_eq!(default_key(None, None), "unknown");
    }
}

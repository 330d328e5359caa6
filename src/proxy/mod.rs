//! Proxy pool with rotation and health accounting (§4.7).
//!
//! Grounded in `browser_pool/mod.rs`'s pool shape: a registry of resources
//! guarded per-entry, acquired through a selection policy, with a
//! background task keeping health current. Here the resource is a proxy
//! endpoint rather than a browser instance, so there is no RAII guard —
//! proxies are used by reference, not checked out exclusively.

pub mod health;
pub mod parse;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;

use crate::config::ProxyRotationStrategy;
use parse::{parse_proxy_url, ParsedProxy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Active,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct Proxy {
    pub id: u32,
    pub url: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub status: ProxyStatus,
    pub consecutive_failures: u32,
    pub total_success: u64,
    pub total_failure: u64,
    pub avg_response_time_ms: f64,
    pub last_checked: Option<Instant>,
}

impl Proxy {
    fn from_parsed(parsed: ParsedProxy) -> Self {
        Self {
            id: parsed.id,
            url: parsed.url,
            protocol: parsed.protocol,
            host: parsed.host,
            port: parsed.port,
            username: parsed.username,
            password: parsed.password,
            status: ProxyStatus::Active,
            consecutive_failures: 0,
            total_success: 0,
            total_failure: 0,
            avg_response_time_ms: 0.0,
            last_checked: None,
        }
    }

    fn success_rate(&self) -> f64 {
        let total = self.total_success + self.total_failure;
        if total == 0 {
            1.0
        } else {
            self.total_success as f64 / total as f64
        }
    }

    fn total_uses(&self) -> u64 {
        self.total_success + self.total_failure
    }
}

pub struct ProxyPoolConfig {
    pub max_consecutive_failures: u32,
    pub rotation_strategy: ProxyRotationStrategy,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            rotation_strategy: ProxyRotationStrategy::RoundRobin,
        }
    }
}

pub struct ProxyPool {
    proxies: DashMap<u32, RwLock<Proxy>>,
    config: ProxyPoolConfig,
    round_robin_index: AtomicUsize,
}

impl ProxyPool {
    #[must_use]
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            proxies: DashMap::new(),
            config,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// Build a pool from `PROXY_URLS`/`PROXY_URL`-shaped entries, skipping
    /// (and logging) any that fail to parse.
    #[must_use]
    pub fn from_urls(urls: &[String], config: ProxyPoolConfig) -> Self {
        let pool = Self::new(config);
        for url in urls {
            if let Err(err) = pool.add(url) {
                log::warn!("skipping unparseable proxy url {url}: {err}");
            }
        }
        pool
    }

    pub fn add(&self, raw_url: &str) -> Result<u32, String> {
        let parsed = parse_proxy_url(raw_url)?;
        let id = parsed.id;
        self.proxies.insert(id, RwLock::new(Proxy::from_parsed(parsed)));
        Ok(id)
    }

    pub fn remove(&self, id: u32) -> bool {
        self.proxies.remove(&id).is_some()
    }

    pub fn get_by_id(&self, id: u32) -> Option<Proxy> {
        self.proxies.get(&id).map(|p| p.read().clone())
    }

    pub fn get_all(&self) -> Vec<Proxy> {
        let mut all: Vec<Proxy> = self.proxies.iter().map(|e| e.read().clone()).collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn get_by_status(&self, status: ProxyStatus) -> Vec<Proxy> {
        self.get_all().into_iter().filter(|p| p.status == status).collect()
    }

    pub fn get_active(&self) -> Vec<Proxy> {
        self.get_by_status(ProxyStatus::Active)
    }

    pub fn update(&self, id: u32, f: impl FnOnce(&mut Proxy)) -> bool {
        if let Some(entry) = self.proxies.get(&id) {
            f(&mut entry.write());
            true
        } else {
            false
        }
    }

    /// Select the next proxy per the pool's configured rotation strategy.
    pub fn get_next(&self) -> Option<Proxy> {
        self.get_next_with(self.config.rotation_strategy)
    }

    pub fn get_next_with(&self, strategy: ProxyRotationStrategy) -> Option<Proxy> {
        let active = self.get_active();
        if active.is_empty() {
            return None;
        }
        match strategy {
            ProxyRotationStrategy::RoundRobin => {
                let i = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % active.len();
                Some(active[i].clone())
            }
            ProxyRotationStrategy::Random => {
                let i = rand::rng().random_range(0..active.len());
                Some(active[i].clone())
            }
            ProxyRotationStrategy::Weighted => {
                let weights: Vec<f64> = active
                    .iter()
                    .map(|p| if p.total_uses() == 0 { 1.0 } else { p.success_rate() })
                    .collect();
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    return Some(active[0].clone());
                }
                let mut pick = rand::rng().random_range(0.0..total);
                for (proxy, weight) in active.iter().zip(weights.iter()) {
                    if pick < *weight {
                        return Some(proxy.clone());
                    }
                    pick -= weight;
                }
                Some(active.last().unwrap().clone())
            }
            ProxyRotationStrategy::LeastUsed => active
                .into_iter()
                .min_by(|a, b| {
                    a.total_uses()
                        .cmp(&b.total_uses())
                        .then(b.success_rate().partial_cmp(&a.success_rate()).unwrap())
                }),
        }
    }

    pub fn mark_used(&self, id: u32) {
        self.update(id, |_| {});
    }

    pub fn mark_success(&self, id: u32, response_time_ms: f64) {
        self.update(id, |p| {
            p.consecutive_failures = 0;
            p.status = ProxyStatus::Active;
            p.total_success += 1;
            p.avg_response_time_ms = if p.total_success == 1 {
                response_time_ms
            } else {
                (p.avg_response_time_ms * (p.total_success - 1) as f64 + response_time_ms)
                    / p.total_success as f64
            };
            p.last_checked = Some(Instant::now());
        });
    }

    pub fn mark_failure(&self, id: u32) {
        self.update(id, |p| {
            p.consecutive_failures += 1;
            p.total_failure += 1;
            p.last_checked = Some(Instant::now());
            if p.consecutive_failures >= self.config.max_consecutive_failures {
                p.status = ProxyStatus::Unhealthy;
            }
        });
    }

    pub fn clear(&self) {
        self.proxies.clear();
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(n: usize) -> ProxyPool {
        let pool = ProxyPool::new(ProxyPoolConfig::default());
        for i in 0..n {
            pool.add(&format!("http://proxy{i}.example.com:8080")).unwrap();
        }
        pool
    }

    #[test]
    fn round_robin_visits_each_exactly_once_per_cycle() {
        let pool = pool_with(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(pool.get_next_with(ProxyRotationStrategy::RoundRobin).unwrap().id);
        }
        assert_eq!(seen.len(), 3);
        let order1: Vec<u32> = (0..3)
            .map(|_| pool.get_next_with(ProxyRotationStrategy::RoundRobin).unwrap().id)
            .collect();
        let order2: Vec<u32> = (0..3)
            .map(|_| pool.get_next_with(ProxyRotationStrategy::RoundRobin).unwrap().id)
            .collect();
        assert_eq!(order1, order2);
    }

    #[test]
    fn unhealthy_after_max_consecutive_failures() {
        let pool = pool_with(1);
        let id = pool.get_all()[0].id;
        for _ in 0..3 {
            pool.mark_failure(id);
        }
        assert_eq!(pool.get_by_id(id).unwrap().status, ProxyStatus::Unhealthy);
        assert!(pool.get_active().is_empty());
    }

    #[test]
    fn success_resets_consecutive_failures_and_status() {
        let pool = pool_with(1);
        let id = pool.get_all()[0].id;
        pool.mark_failure(id);
        pool.mark_failure(id);
        pool.mark_success(id, 100.0);
        let proxy = pool.get_by_id(id).unwrap();
        assert_eq!(proxy.consecutive_failures, 0);
        assert_eq!(proxy.status, ProxyStatus::Active);
    }

    #[test]
    fn weighted_favors_higher_success_rate() {
        let pool = pool_with(2);
        let ids: Vec<u32> = pool.get_all().iter().map(|p| p.id).collect();
        for _ in 0..20 {
            pool.mark_success(ids[0], 10.0);
        }
        for _ in 0..20 {
            pool.mark_failure(ids[1]);
        }
        // ids[1] is now unhealthy after 3 consecutive failures; only ids[0] active.
        let picks: Vec<u32> = (0..10)
            .filter_map(|_| pool.get_next_with(ProxyRotationStrategy::Weighted))
            .map(|p| p.id)
            .collect();
        assert!(picks.iter().all(|id| *id == ids[0]));
    }

    #[test]
    fn least_used_picks_minimum_total_uses() {
        let pool = pool_with(2);
        let ids: Vec<u32> = pool.get_all().iter().map(|p| p.id).collect();
        pool.mark_success(ids[0], 10.0);
        pool.mark_success(ids[0], 10.0);
        let next = pool.get_next_with(ProxyRotationStrategy::LeastUsed).unwrap();
        assert_eq!(next.id, ids[1]);
    }

    #[test]
    fn empty_pool_returns_none() {
        let pool = ProxyPool::new(ProxyPoolConfig::default());
        assert!(pool.get_next().is_none());
    }
}

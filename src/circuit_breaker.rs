//! Per-host circuit breaker (§4.8).
//!
//! Adapted from the crawler's per-domain `DashMap<String, DomainHealth>`
//! breaker: same lock-free-per-key structure, generalized from "crawl
//! session domain" to "any host a fetcher tier talks to" and extended with
//! the explicit `Closed -> Open` trigger condition (`total >= minimum_requests
//! && failure_rate >= error_threshold_percentage`) and `open`/`close`/
//! `reset`/`enable`/`disable` the spec's contract names.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct HostHealth {
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_failure_time: Option<Instant>,
    enabled: bool,
}

impl HostHealth {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            total_requests: 0,
            total_failures: 0,
            last_failure_time: None,
            enabled: true,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_failures as f64 / self.total_requests as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Per-call timeout; enforced by the caller (the fetcher tier), not here.
    pub timeout: Duration,
    pub error_threshold_percentage: f64,
    pub reset_timeout: Duration,
    pub minimum_requests: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(30),
            minimum_requests: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub error_rate: f64,
    pub next_attempt: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    hosts: DashMap<String, HostHealth>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            hosts: DashMap::new(),
        }
    }

    /// `true` if a call to `host` should proceed. Flips `Open -> HalfOpen`
    /// in place when `reset_timeout` has elapsed, mirroring
    /// `crawl_engine/circuit_breaker.rs::should_attempt`.
    pub fn should_attempt(&self, host: &str) -> bool {
        let mut entry = self.hosts.entry(host.to_string()).or_insert_with(HostHealth::new);
        if !entry.enabled {
            return true;
        }
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed_enough = entry
                    .last_failure_time
                    .is_some_and(|t| t.elapsed() >= self.config.reset_timeout);
                if elapsed_enough {
                    log::info!("circuit breaker for {host} entering half-open");
                    entry.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, host: &str) {
        let mut entry = self.hosts.entry(host.to_string()).or_insert_with(HostHealth::new);
        entry.total_requests += 1;
        if entry.state == CircuitState::HalfOpen {
            log::info!("circuit breaker for {host} closing after successful trial call");
            entry.state = CircuitState::Closed;
            entry.total_requests = 0;
            entry.total_failures = 0;
        }
    }

    pub fn record_failure(&self, host: &str) {
        let mut entry = self.hosts.entry(host.to_string()).or_insert_with(HostHealth::new);
        entry.total_requests += 1;
        entry.total_failures += 1;
        entry.last_failure_time = Some(Instant::now());

        if !entry.enabled {
            return;
        }

        match entry.state {
            CircuitState::HalfOpen => {
                log::warn!("circuit breaker for {host} reopening after failed trial call");
                entry.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                if entry.total_requests >= self.config.minimum_requests
                    && entry.error_rate() >= self.config.error_threshold_percentage
                {
                    log::warn!(
                        "circuit breaker for {host} opening: {}/{} failures ({:.1}%)",
                        entry.total_failures,
                        entry.total_requests,
                        entry.error_rate()
                    );
                    entry.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn get_state(&self, host: &str) -> CircuitState {
        self.hosts
            .get(host)
            .map(|h| h.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn get_stats(&self, host: &str) -> CircuitStats {
        let entry = self.hosts.get(host);
        match entry {
            Some(h) => CircuitStats {
                state: h.state,
                total_requests: h.total_requests,
                total_failures: h.total_failures,
                error_rate: h.error_rate(),
                next_attempt: h
                    .last_failure_time
                    .map(|t| t + self.config.reset_timeout),
            },
            None => CircuitStats {
                state: CircuitState::Closed,
                total_requests: 0,
                total_failures: 0,
                error_rate: 0.0,
                next_attempt: None,
            },
        }
    }

    pub fn open(&self, host: &str) {
        let mut entry = self.hosts.entry(host.to_string()).or_insert_with(HostHealth::new);
        entry.state = CircuitState::Open;
        entry.last_failure_time = Some(Instant::now());
    }

    pub fn close(&self, host: &str) {
        if let Some(mut entry) = self.hosts.get_mut(host) {
            entry.state = CircuitState::Closed;
            entry.total_requests = 0;
            entry.total_failures = 0;
        }
    }

    pub fn reset(&self, host: &str) {
        self.hosts.remove(host);
    }

    pub fn enable(&self, host: &str) {
        let mut entry = self.hosts.entry(host.to_string()).or_insert_with(HostHealth::new);
        entry.enabled = true;
    }

    pub fn disable(&self, host: &str) {
        let mut entry = self.hosts.entry(host.to_string()).or_insert_with(HostHealth::new);
        entry.enabled = false;
        entry.state = CircuitState::Closed;
    }

    pub fn get_open_hosts(&self) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|e| e.state == CircuitState::Open)
            .map(|e| e.key().clone())
            .collect()
    }
}

/// Extract the host from a URL string for use as a breaker key.
pub fn extract_host(url_str: &str) -> Result<String, String> {
    url::Url::parse(url_str)
        .map_err(|e| format!("invalid url: {e}"))?
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| "url has no host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            timeout: Duration::from_millis(10),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_millis(20),
            minimum_requests: 5,
        })
    }

    #[test]
    fn starts_closed() {
        let breaker = fast_breaker();
        assert_eq!(breaker.get_state("example.com"), CircuitState::Closed);
        assert!(breaker.should_attempt("example.com"));
    }

    #[test]
    fn opens_after_threshold() {
        let breaker = fast_breaker();
        for _ in 0..3 {
            breaker.record_success("example.com");
        }
        for _ in 0..3 {
            breaker.record_failure("example.com");
        }
        assert_eq!(breaker.get_state("example.com"), CircuitState::Open);
        assert!(!breaker.should_attempt("example.com"));
    }

    #[test]
    fn half_open_after_reset_timeout() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("example.com");
        }
        assert_eq!(breaker.get_state("example.com"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.should_attempt("example.com"));
        assert_eq!(breaker.get_state("example.com"), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_zeroes_counters() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("example.com");
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.should_attempt("example.com"));
        breaker.record_success("example.com");
        let stats = breaker.get_stats("example.com");
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_failures, 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("example.com");
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.should_attempt("example.com"));
        breaker.record_failure("example.com");
        assert_eq!(breaker.get_state("example.com"), CircuitState::Open);
    }

    #[test]
    fn reset_clears_state() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("example.com");
        }
        breaker.reset("example.com");
        assert_eq!(breaker.get_state("example.com"), CircuitState::Closed);
        let stats = breaker.get_stats("example.com");
        assert_eq!(stats.total_requests, 0);
    }

    #[test]
    fn disabled_breaker_always_attempts() {
        let breaker = fast_breaker();
        breaker.disable("example.com");
        for _ in 0..10 {
            breaker.record_failure("example.com");
        }
        assert!(breaker.should_attempt("example.com"));
    }

    #[test]
    fn extract_host_parses_url() {
        assert_eq!(extract_host("https://example.com/a/b").unwrap(), "example.com");
        assert!(extract_host("not a url").is_err());
    }
}

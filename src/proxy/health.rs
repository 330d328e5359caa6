//! Proxy health checker: periodic batched probes (§4.7).

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use super::ProxyPool;

pub const DEFAULT_CHECK_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
}

/// Probe one proxy by making a request through it to `target`.
pub async fn probe(proxy_url: &str, target: &str, timeout: Duration) -> HealthCheckResult {
    let proxy = match reqwest::Proxy::all(proxy_url) {
        Ok(p) => p,
        Err(err) => {
            return HealthCheckResult {
                healthy: false,
                response_time_ms: None,
                error: Some(format!("invalid proxy: {err}")),
            }
        }
    };
    let client = match reqwest::Client::builder().proxy(proxy).timeout(timeout).build() {
        Ok(c) => c,
        Err(err) => {
            return HealthCheckResult {
                healthy: false,
                response_time_ms: None,
                error: Some(format!("failed to build client: {err}")),
            }
        }
    };

    let start = Instant::now();
    match client.get(target).send().await {
        Ok(resp) if resp.status().is_success() => HealthCheckResult {
            healthy: true,
            response_time_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
            error: None,
        },
        Ok(resp) => HealthCheckResult {
            healthy: false,
            response_time_ms: None,
            error: Some(format!("probe returned status {}", resp.status())),
        },
        Err(err) => HealthCheckResult {
            healthy: false,
            response_time_ms: None,
            error: Some(err.to_string()),
        },
    }
}

/// Probe every proxy in the pool with up to `concurrency` checks in flight,
/// feeding each result back into `mark_success`/`mark_failure`.
pub async fn check_batch(pool: &ProxyPool, target: &str, timeout: Duration, concurrency: usize) {
    let proxies = pool.get_all();
    stream::iter(proxies)
        .for_each_concurrent(concurrency, |proxy| async move {
            let result = probe(&proxy.url, target, timeout).await;
            match result {
                HealthCheckResult {
                    healthy: true,
                    response_time_ms,
                    ..
                } => pool.mark_success(proxy.id, response_time_ms.unwrap_or(0.0)),
                HealthCheckResult {
                    healthy: false,
                    error,
                    ..
                } => {
                    log::warn!(
                        "proxy {} ({}) failed health check: {}",
                        proxy.id,
                        proxy.url,
                        error.unwrap_or_default()
                    );
                    pool.mark_failure(proxy.id);
                }
            }
        })
        .await;
}

/// Spawn the background ticker that runs `check_batch` every `interval`,
/// mirroring `browser_pool`'s `keepalive_loop`/`scaler_loop` background
/// tasks.
pub fn spawn(
    pool: Arc<ProxyPool>,
    target: String,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            check_batch(&pool, &target, timeout, DEFAULT_CHECK_CONCURRENCY).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_rejects_malformed_proxy_url() {
        let result = probe("not a url", "https://example.com", Duration::from_millis(100)).await;
        assert!(!result.healthy);
        assert!(result.error.is_some());
    }
}

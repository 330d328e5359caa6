//! URL normalization and duplicate detection (§4.3.1).

use std::collections::HashSet;

use parking_lot::Mutex;
use url::Url;

const TRACKING_PREFIXES: &[&str] = &["utm_"];
const TRACKING_EXACT: &[&str] = &["fbclid", "gclid"];

fn is_tracking_param(key: &str) -> bool {
    TRACKING_EXACT.contains(&key) || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

fn default_port_for(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Lowercase scheme+host, strip default ports, strip fragment, strip
/// tracking query keys, sort remaining query params, strip trailing `/`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    let scheme = url.scheme().to_lowercase();
    url.set_scheme(&scheme).ok()?;
    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        url.set_host(Some(&host)).ok()?;
    }

    if url.port() == default_port_for(&scheme) {
        let _ = url.set_port(None);
    }

    url.set_fragment(None);

    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let mut normalized = url.to_string();
    if let Some(stripped) = normalized.strip_suffix('/') {
        if !stripped.ends_with("//") {
            normalized = stripped.to_string();
        }
    }
    Some(normalized)
}

/// Stores the normalized-URL set seen so far for one crawl job.
pub struct DuplicateDetector {
    seen: Mutex<HashSet<String>>,
}

impl DuplicateDetector {
    #[must_use]
    pub fn new() -> Self {
        Self { seen: Mutex::new(HashSet::new()) }
    }

    /// Normalizes `url` and records it. Returns `true` if it was new
    /// (hadn't been seen before under its normalized form).
    pub fn add_url(&self, url: &str) -> bool {
        let Some(normalized) = normalize_url(url) else { return false };
        self.seen.lock().insert(normalized)
    }

    pub fn contains(&self, url: &str) -> bool {
        let Some(normalized) = normalize_url(url) else { return false };
        self.seen.lock().contains(&normalized)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_default_port_and_fragment() {
        let normalized = normalize_url("HTTP://Example.com:80/page#section").unwrap();
        assert_eq!(normalized, "http://example.com/page");
    }

    #[test]
    fn strips_tracking_params_and_sorts_remaining() {
        let normalized = normalize_url("https://example.com/p?utm_source=x&b=2&a=1&fbclid=z").unwrap();
        assert_eq!(normalized, "https://example.com/p?a=1&b=2");
    }

    #[test]
    fn strips_trailing_slash() {
        let normalized = normalize_url("https://example.com/page/").unwrap();
        assert_eq!(normalized, "https://example.com/page");
    }

    #[test]
    fn add_url_returns_true_only_on_first_sighting() {
        let detector = DuplicateDetector::new();
        assert!(detector.add_url("https://example.com/a"));
        assert!(!detector.add_url("https://example.com/a/"));
        assert!(!detector.add_url("HTTPS://EXAMPLE.com/a"));
    }
}

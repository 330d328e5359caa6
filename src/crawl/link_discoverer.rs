//! Link, AJAX-endpoint, and frame discovery (§4.3.3).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::CrawlConfig;
use crate::crawl::dedup::normalize_url;

#[derive(Debug, Clone)]
pub struct DiscoveredLink {
    pub url: String,
    pub anchor_text: String,
}

/// Resolve every `a[href]` against `base`, normalize, and return them —
/// visited/filtering happens in `filter_links`.
pub fn discover_links(html: &str, base: &str, _depth: u32, _visited: &HashSet<String>) -> Vec<DiscoveredLink> {
    let Ok(base_url) = Url::parse(base) else { return Vec::new() };
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else { return Vec::new() };

    doc.select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let resolved = base_url.join(href).ok()?;
            let normalized = normalize_url(resolved.as_str())?;
            Some(DiscoveredLink { url: normalized, anchor_text: el.text().collect::<String>().trim().to_string() })
        })
        .collect()
}

fn is_skippable_scheme(url: &str) -> bool {
    url.starts_with("mailto:") || url.starts_with("tel:") || url.starts_with("javascript:")
}

fn matches_any(patterns: &[Regex], value: &str) -> bool {
    patterns.iter().any(|p| p.is_match(value))
}

/// Drop visited links, same-page anchors, disallowed-external links, any
/// URL whose path matches a blocked pattern, and mail/tel/js schemes.
pub fn filter_links(
    links: Vec<DiscoveredLink>,
    cfg: &CrawlConfig,
    visited: &HashSet<String>,
    current_url: &str,
) -> Vec<DiscoveredLink> {
    let blocked: Vec<Regex> = cfg.blocked_patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
    let current_domain = Url::parse(current_url).ok().and_then(|u| u.host_str().map(str::to_string));

    links
        .into_iter()
        .filter(|link| {
            if is_skippable_scheme(&link.url) {
                return false;
            }
            if link.url == current_url || visited.contains(&link.url) {
                return false;
            }
            if matches_any(&blocked, &link.url) {
                return false;
            }
            if !cfg.follow_external_links {
                let link_domain = Url::parse(&link.url).ok().and_then(|u| u.host_str().map(str::to_string));
                let same_domain = link_domain == current_domain;
                let explicitly_allowed =
                    link_domain.as_deref().is_some_and(|d| cfg.allowed_domains.iter().any(|a| a == d));
                if !same_domain && !explicitly_allowed {
                    return false;
                }
            }
            true
        })
        .collect()
}

static PAGINATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(next|prev|previous|page\s*\d+|»|«|\.\.\.)$").expect("valid regex"));

fn path_depth(url: &str) -> usize {
    Url::parse(url).ok().map_or(0, |u| u.path().split('/').filter(|s| !s.is_empty()).count())
}

/// Score by (a) path depth — shorter is higher, (b) task keyword presence
/// in anchor text, (c) absence of pagination noise; returns ordered
/// highest-score first.
pub fn prioritize_links(links: Vec<DiscoveredLink>, task: Option<&str>) -> Vec<DiscoveredLink> {
    let task_words: Vec<String> = task
        .map(|t| t.split_whitespace().map(|w| w.to_lowercase()).filter(|w| w.len() > 2).collect())
        .unwrap_or_default();

    let mut scored: Vec<(f64, DiscoveredLink)> = links
        .into_iter()
        .map(|link| {
            let depth = path_depth(&link.url);
            let mut score = 100.0 / (depth as f64 + 1.0);

            let anchor_lower = link.anchor_text.to_lowercase();
            let keyword_hits = task_words.iter().filter(|w| anchor_lower.contains(w.as_str())).count();
            score += keyword_hits as f64 * 20.0;

            if PAGINATION_RE.is_match(link.anchor_text.trim()) {
                score -= 50.0;
            }

            (score, link)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.into_iter().map(|(_, link)| link).collect()
}

static AJAX_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:fetch|\$\.ajax|XMLHttpRequest\(\)\.open|axios\.\w+)\s*\(\s*['"]([^'"]+)['"]"#).expect("valid regex")
});

/// Regex-scan script bodies for fetch/XHR URLs; `triggers` are data-attr
/// derived synthetic endpoints from §4.2.1, merged in as-is.
pub fn discover_ajax_endpoints(base: &str, scripts: &[String], triggers: &[String]) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else { return Vec::new() };
    let mut endpoints: Vec<String> = scripts
        .iter()
        .flat_map(|script| AJAX_CALL_RE.captures_iter(script))
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| base_url.join(m.as_str()).ok())
        .map(|u| u.to_string())
        .collect();
    endpoints.extend(triggers.iter().cloned());
    endpoints.sort();
    endpoints.dedup();
    endpoints
}

/// Resolve `iframe[src]` and `frame[src]` against `base`.
pub fn discover_frame_urls(html: &str, base: &str) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else { return Vec::new() };
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("iframe[src],frame[src]") else { return Vec::new() };
    doc.select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| base_url.join(src).ok())
        .map(|u| u.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_links_resolves_and_normalizes() {
        let html = r#"<a href="/page?utm_source=x">Link</a>"#;
        let links = discover_links(html, "https://example.com/", 0, &HashSet::new());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/page");
    }

    #[test]
    fn filter_links_drops_mailto_and_visited() {
        let cfg = CrawlConfig { follow_external_links: true, ..CrawlConfig::default() };
        let links = vec![
            DiscoveredLink { url: "mailto:a@b.com".to_string(), anchor_text: String::new() },
            DiscoveredLink { url: "https://example.com/seen".to_string(), anchor_text: String::new() },
            DiscoveredLink { url: "https://example.com/new".to_string(), anchor_text: String::new() },
        ];
        let mut visited = HashSet::new();
        visited.insert("https://example.com/seen".to_string());
        let filtered = filter_links(links, &cfg, &visited, "https://example.com/current");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].url, "https://example.com/new");
    }

    #[test]
    fn filter_links_drops_external_when_disallowed() {
        let cfg = CrawlConfig { follow_external_links: false, allowed_domains: vec![], ..CrawlConfig::default() };
        let links = vec![DiscoveredLink { url: "https://other.com/page".to_string(), anchor_text: String::new() }];
        let filtered = filter_links(links, &cfg, &HashSet::new(), "https://example.com/current");
        assert!(filtered.is_empty());
    }

    #[test]
    fn prioritize_links_favors_shallow_paths_and_keywords() {
        let links = vec![
            DiscoveredLink { url: "https://example.com/a/b/c/d".to_string(), anchor_text: "next".to_string() },
            DiscoveredLink { url: "https://example.com/pricing".to_string(), anchor_text: "Our Pricing Plans".to_string() },
        ];
        let ordered = prioritize_links(links, Some("pricing plans"));
        assert_eq!(ordered[0].url, "https://example.com/pricing");
    }

    #[test]
    fn discover_ajax_endpoints_resolves_fetch_calls() {
        let scripts = vec!["fetch('/api/data?year=2024')".to_string()];
        let endpoints = discover_ajax_endpoints("https://example.com/", &scripts, &[]);
        assert_eq!(endpoints, vec!["https://example.com/api/data?year=2024"]);
    }
}

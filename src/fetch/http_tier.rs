//! Plain HTTP tier (§4.2.1) — fastest, tried first in the `Auto` cascade.
//!
//! Grounded on `page_processor.rs`'s guard-then-fetch-then-record shape,
//! generalized from a chromiumoxide `Page` navigation to a plain `reqwest`
//! GET, and on `content_saver/markdown_converter` for the HTML->markdown
//! step (here the plain `htmd` crate rather than the teacher's customized
//! fork, since this tier has no need for the fork's language-inference
//! code-block handling).

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::{
    fingerprints::random_fingerprint, guard_host, host_of, Fetcher, FetchContext, FetchOptions,
    FetchResult, ProgressEmitter, ScraperType,
};
use crate::errors::{ScrapeError, ScrapeResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const DETAIL_LINK_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_AJAX_CANDIDATES: usize = 10;
const MAX_DETAIL_LINKS: usize = 15;

pub struct HttpTier {
    pub ctx: FetchContext,
    pub client: reqwest::Client,
}

impl HttpTier {
    #[must_use]
    pub fn new(ctx: FetchContext) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_default();
        Self { ctx, client }
    }

    /// Picks a proxied client when the caller asked for one and the pool has
    /// a healthy entry; falls back to the plain client otherwise.
    fn client_for(&self, opts: &FetchOptions) -> reqwest::Client {
        if !opts.proxy {
            return self.client.clone();
        }
        let Some(pool) = &self.ctx.proxy_pool else { return self.client.clone() };
        let Some(proxy) = pool.get_next() else { return self.client.clone() };
        let Ok(reqwest_proxy) = reqwest::Proxy::all(&proxy.url) else { return self.client.clone() };
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .proxy(reqwest_proxy)
            .build()
            .unwrap_or_else(|_| self.client.clone())
    }

    fn build_request(&self, client: &reqwest::Client, url: &str, opts: &FetchOptions) -> reqwest::RequestBuilder {
        let fp = random_fingerprint();
        let mut req = client
            .get(url)
            .header("User-Agent", fp.user_agent)
            .header("Accept-Language", fp.accept_language)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Encoding", "gzip, deflate, br")
            .header("Sec-Ch-Ua-Platform", fp.sec_ch_ua_platform);
        if !fp.sec_ch_ua.is_empty() {
            req = req.header("Sec-Ch-Ua", fp.sec_ch_ua);
        }
        for (k, v) in &opts.extra_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if !opts.cookies.is_empty() {
            let cookie_header = opts
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            req = req.header("Cookie", cookie_header);
        }
        req
    }

    async fn fetch_one(&self, url: &str, opts: &FetchOptions) -> ScrapeResult<(String, String, u16, Option<String>)> {
        let client = self.client_for(opts);
        let resp = self
            .build_request(&client, url, opts)
            .send()
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;
        Ok((body, final_url, status, content_type))
    }
}

fn looks_like_html(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("<html") || lower.contains("<body") || lower.contains("<!doctype")
}

fn html_to_markdown(html: &str) -> String {
    htmd::HtmlToMarkdown::builder()
        .build()
        .convert(html)
        .unwrap_or_default()
}

fn extract_title(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel).next().map(|el| el.text().collect::<String>().trim().to_string())
}

fn extract_description(doc: &Html) -> Option<String> {
    let sel = Selector::parse(r#"meta[name="description"]"#).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_main_text(doc: &Html) -> String {
    let candidates = ["main", "article", "[role=main]", "#content", "body"];
    for sel_str in candidates {
        if let Ok(sel) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&sel).next() {
                let text = el.text().collect::<Vec<_>>().join(" ");
                let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !normalized.is_empty() {
                    return normalized;
                }
            }
        }
    }
    String::new()
}

static NUMERIC_ATTR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-year], [data-id], [data-page]").expect("valid selector"));
static HASH_ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r##"a[href="#"]"##).expect("valid selector"));
static DETAIL_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)learn|more|detail|view|\u{2192}|>>").expect("valid regex"));

/// §4.2.1's AJAX-trigger discovery: numeric `data-*` attributes and
/// short-numeric `href="#"` anchors become candidate `?year=YYYY` endpoints.
fn discover_year_triggers(doc: &Html) -> Vec<u32> {
    let mut years = HashSet::new();
    for el in doc.select(&NUMERIC_ATTR_SELECTOR) {
        for attr in ["data-year", "data-id", "data-page"] {
            if let Some(v) = el.value().attr(attr) {
                if let Ok(n) = v.parse::<u32>() {
                    if (1900..=2100).contains(&n) {
                        years.insert(n);
                    }
                }
            }
        }
    }
    for el in doc.select(&HASH_ANCHOR_SELECTOR) {
        let text = el.text().collect::<String>();
        let trimmed = text.trim();
        if trimmed.len() <= 4 {
            if let Ok(n) = trimmed.parse::<u32>() {
                if (1900..=2100).contains(&n) {
                    years.insert(n);
                }
            }
        }
    }
    let mut out: Vec<u32> = years.into_iter().collect();
    out.sort_unstable();
    out
}

fn synthesize_ajax_candidates(base: &Url, years: &[u32]) -> Vec<String> {
    let path = base.path();
    let mut candidates = Vec::new();
    for &year in years {
        candidates.push(format!("{path}?year={year}"));
        candidates.push(format!("{path}?ajax=true&year={year}"));
        candidates.push(format!("/api{path}?year={year}"));
        if candidates.len() >= MAX_AJAX_CANDIDATES {
            break;
        }
    }
    candidates.truncate(MAX_AJAX_CANDIDATES);
    candidates
        .into_iter()
        .filter_map(|c| base.join(&c).ok())
        .map(|u| u.to_string())
        .collect()
}

fn json_records_to_text(value: &Value) -> String {
    let records = match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("data").or_else(|| map.get("results")).or_else(|| map.get("items")) {
                items.clone()
            } else {
                vec![value.clone()]
            }
        }
        other => vec![other.clone()],
    };
    records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

/// §8 seed scenario 2: an AJAX-sourced block appended to `text` must carry a
/// `--- AJAX: {candidate}` sentinel so callers can tell which text came from
/// the original page versus a synthesized endpoint.
fn append_ajax_text(text: &mut String, html: &mut String, candidate: &str, body: &str) {
    text.push_str(&format!("\n\n--- AJAX: {candidate}\n"));
    text.push_str(body);
    html.push_str(&format!("\n<!-- ajax: {candidate} -->\n"));
}

impl Fetcher for HttpTier {
    fn scraper_type(&self) -> ScraperType {
        ScraperType::Http
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        _job_id: &'a str,
        opts: &'a FetchOptions,
        emit: ProgressEmitter,
    ) -> Pin<Box<dyn Future<Output = ScrapeResult<Option<FetchResult>>> + Send + 'a>> {
        Box::pin(async move {
            let host = host_of(url)?;
            guard_host(&self.ctx, &host).await?;

            emit("http: fetching".to_string());
            let (body, final_url, status, content_type) = match self.fetch_one(url, opts).await {
                Ok(v) => v,
                Err(e) => {
                    self.ctx.circuit_breaker.record_failure(&host);
                    return Err(e);
                }
            };
            self.ctx.circuit_breaker.record_success(&host);

            if !looks_like_html(&body) {
                return Ok(None);
            }

            let (page_title, page_description, mut text, years) = {
                let doc = Html::parse_document(&body);
                let page_title = extract_title(&doc);
                let page_description = extract_description(&doc);
                let text = extract_main_text(&doc);
                let years = discover_year_triggers(&doc);
                (page_title, page_description, text, years)
            };
            let markdown = html_to_markdown(&body);
            let mut html = body;
            let mut request_count = 1u32;

            let base = Url::parse(&final_url).ok();

            // AJAX endpoint augmentation.
            if let Some(base_url) = base.clone() {
                let candidates = synthesize_ajax_candidates(&base_url, &years);
                if !candidates.is_empty() {
                    emit(format!("http: fetching {} ajax candidates", candidates.len()));
                    let fetches = candidates.iter().map(|c| self.fetch_one(c, opts));
                    let results = futures::future::join_all(fetches).await;
                    for (candidate, result) in candidates.iter().zip(results) {
                        request_count += 1;
                        if let Ok((ajax_body, _, _, _)) = result {
                            let appended = match serde_json::from_str::<Value>(&ajax_body) {
                                Ok(json) => json_records_to_text(&json),
                                Err(_) => ajax_body,
                            };
                            if !appended.trim().is_empty() {
                                append_ajax_text(&mut text, &mut html, candidate, &appended);
                            }
                        }
                    }
                }

                // Frame extraction.
                let frame_urls = crate::crawl::link_discoverer::discover_frame_urls(&html, base_url.as_str());
                for frame_url in frame_urls {
                    let frame_client = self.client.clone();
                    let frame_req = frame_client.get(&frame_url).timeout(FRAME_FETCH_TIMEOUT);
                    request_count += 1;
                    let Ok(resp) = frame_req.send().await else { continue };
                    let Ok(frame_body) = resp.text().await else { continue };
                    let (frame_text, detail_links) = {
                        let frame_doc = Html::parse_document(&frame_body);
                        let frame_text = extract_main_text(&frame_doc);
                        let detail_links = collect_detail_links(&frame_doc, &base_url);
                        (frame_text, detail_links)
                    };
                    if !frame_text.is_empty() {
                        text.push_str("\n\n");
                        text.push_str(&frame_text);
                        html.push_str(&format!("\n<!-- frame: {frame_url} -->\n"));
                    }

                    for link in detail_links.into_iter().take(MAX_DETAIL_LINKS) {
                        let detail_req = self.client.get(&link).timeout(DETAIL_LINK_TIMEOUT);
                        request_count += 1;
                        let Ok(resp) = detail_req.send().await else { continue };
                        let Ok(detail_body) = resp.text().await else { continue };
                        let detail_text = {
                            let detail_doc = Html::parse_document(&detail_body);
                            extract_main_text(&detail_doc)
                        };
                        if !detail_text.is_empty() {
                            text.push_str("\n\n");
                            text.push_str(&detail_text);
                            html.push_str(&format!("\n<!-- detail: {link} -->\n"));
                        }
                    }
                }
            }

            let result = FetchResult {
                html,
                markdown,
                text,
                final_url,
                status_code: Some(status),
                content_type,
                page_title,
                page_description,
                screenshots: Vec::new(),
                request_count,
            };

            if !result.is_valid_content() {
                return Ok(None);
            }
            Ok(Some(result))
        })
    }
}

fn collect_detail_links(doc: &Html, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else { return Vec::new() };
    doc.select(&selector)
        .filter(|el| {
            let text = el.text().collect::<String>();
            let class = el.value().attr("class").unwrap_or("");
            DETAIL_LINK_RE.is_match(&text) || class.contains("btn")
        })
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|u| u.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_html_detects_doctype_and_tags() {
        assert!(looks_like_html("<!DOCTYPE html><html><body>hi</body></html>"));
        assert!(!looks_like_html("{\"not\": \"html\"}"));
    }

    #[test]
    fn discover_year_triggers_finds_data_attrs_and_short_anchors() {
        let html = r##"<div data-year="2023"></div><a href="#">2024</a><a href="#">Read more</a>"##;
        let doc = Html::parse_document(html);
        let years = discover_year_triggers(&doc);
        assert_eq!(years, vec![2023, 2024]);
    }

    #[test]
    fn synthesize_ajax_candidates_caps_at_ten() {
        let base = Url::parse("https://example.com/reports").unwrap();
        let years: Vec<u32> = (2000..2020).collect();
        let candidates = synthesize_ajax_candidates(&base, &years);
        assert!(candidates.len() <= MAX_AJAX_CANDIDATES);
    }

    #[test]
    fn append_ajax_text_prefixes_sentinel_with_candidate_url() {
        let mut text = "base page text".to_string();
        let mut html = "<html></html>".to_string();
        append_ajax_text(&mut text, &mut html, "https://example.com/reports?year=2023", "[{\"a\":1}]");
        assert!(text.contains("--- AJAX: https://example.com/reports?year=2023"));
        assert!(text.ends_with("[{\"a\":1}]"));
        assert!(html.contains("<!-- ajax: https://example.com/reports?year=2023 -->"));
    }

    #[test]
    fn json_records_to_text_unwraps_data_key() {
        let value: Value = serde_json::json!({"data": [{"a": 1}, {"a": 2}]});
        let text = json_records_to_text(&value);
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn extract_main_text_prefers_main_tag() {
        let html = "<html><body><nav>Nav</nav><main>Real content here</main></body></html>";
        let doc = Html::parse_document(html);
        assert_eq!(extract_main_text(&doc), "Real content here");
    }
}

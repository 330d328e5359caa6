//! Reader-API tier (§4.2.2) — delegates rendering to an external
//! "reader" service (e.g. a Jina-Reader-compatible endpoint) that returns
//! pre-cleaned markdown for a target URL.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{guard_host, host_of, Fetcher, FetchContext, FetchOptions, FetchResult, ProgressEmitter, ScraperType};
use crate::errors::{ScrapeError, ScrapeResult};

const READER_TIMEOUT: Duration = Duration::from_secs(15);
const MIN_BODY_LEN: usize = 100;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("valid regex"));
static PARAGRAPH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(?!#)(\S.+)$").expect("valid regex"));
static MD_DECORATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#*_`\[\]()>-]").expect("valid regex"));

pub struct ReaderTier {
    pub ctx: FetchContext,
    pub client: reqwest::Client,
    pub reader_base: String,
}

impl ReaderTier {
    #[must_use]
    pub fn new(ctx: FetchContext, reader_base: String) -> Self {
        let client = reqwest::Client::builder().timeout(READER_TIMEOUT).build().unwrap_or_default();
        Self { ctx, client, reader_base }
    }
}

fn looks_like_error(body: &str) -> bool {
    body.contains("Error:") || body.contains("Failed to")
}

fn derive_title(markdown: &str) -> Option<String> {
    HEADING_RE.captures(markdown).map(|c| c[1].trim().to_string())
}

fn derive_description(markdown: &str) -> Option<String> {
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        return Some(trimmed.to_string());
    }
    None
}

fn strip_markdown_decorations(markdown: &str) -> String {
    let stripped = MD_DECORATION_RE.replace_all(markdown, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Fetcher for ReaderTier {
    fn scraper_type(&self) -> ScraperType {
        ScraperType::Reader
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        _job_id: &'a str,
        _opts: &'a FetchOptions,
        emit: ProgressEmitter,
    ) -> Pin<Box<dyn Future<Output = ScrapeResult<Option<FetchResult>>> + Send + 'a>> {
        Box::pin(async move {
            let host = host_of(url)?;
            guard_host(&self.ctx, &host).await?;

            let reader_url = format!("{}/{}", self.reader_base.trim_end_matches('/'), url);
            emit("reader: fetching".to_string());

            let resp = match self.client.get(&reader_url).send().await {
                Ok(r) => r,
                Err(e) => {
                    self.ctx.circuit_breaker.record_failure(&host);
                    return Err(ScrapeError::DownstreamUnavailable(e.to_string()));
                }
            };
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;

            if body.trim().len() < MIN_BODY_LEN || looks_like_error(&body) {
                self.ctx.circuit_breaker.record_success(&host);
                return Ok(None);
            }
            self.ctx.circuit_breaker.record_success(&host);

            let text = strip_markdown_decorations(&body);
            let result = FetchResult {
                html: String::new(),
                markdown: body.clone(),
                text,
                final_url: url.to_string(),
                status_code: Some(status),
                content_type: Some("text/markdown".to_string()),
                page_title: derive_title(&body),
                page_description: derive_description(&body),
                screenshots: Vec::new(),
                request_count: 1,
            };

            if !result.is_valid_content() {
                return Ok(None);
            }
            Ok(Some(result))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_title_takes_first_heading() {
        let md = "Some preamble\n# My Title\nBody text";
        assert_eq!(derive_title(md), Some("My Title".to_string()));
    }

    #[test]
    fn derive_description_skips_headings() {
        let md = "# Title\n\nFirst real paragraph.\nMore text.";
        assert_eq!(derive_description(md), Some("First real paragraph.".to_string()));
    }

    #[test]
    fn looks_like_error_detects_known_markers() {
        assert!(looks_like_error("Error: could not render"));
        assert!(looks_like_error("Failed to load page"));
        assert!(!looks_like_error("# Normal content"));
    }

    #[test]
    fn strip_markdown_decorations_removes_syntax_chars() {
        let stripped = strip_markdown_decorations("# Title\n\n**bold** and [link](url)");
        assert!(!stripped.contains('#'));
        assert!(!stripped.contains('*'));
        assert!(!stripped.contains('['));
    }
}

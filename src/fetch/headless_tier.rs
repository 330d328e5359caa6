//! Headless browser tier (§4.2.3).
//!
//! Browser lifecycle is `fetch::browser::launch_stealth_browser` (single
//! profile directory, no-sandbox stealth args) and `crawl_engine/page_enhancer.rs`
//! (viewport override via the CDP Emulation domain). Resource/URL blocking
//! and frame enumeration are new, built from the §4.2.3 contract directly.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetBlockedUrLsParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use chromiumoxide::Page;

use super::{
    fingerprints::{jittered_viewport, random_fingerprint},
    guard_host, host_of, Fetcher, FetchContext, FetchOptions, FetchResult, ProgressEmitter, ScraperType,
};
use crate::errors::{ScrapeError, ScrapeResult};

const NAV_TIMEOUT: Duration = Duration::from_secs(15);
const GRACE_PERIOD: Duration = Duration::from_secs(1);
const FRAME_LOAD_CEILING: Duration = Duration::from_secs(5);

const BLOCKED_RESOURCE_URL_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg",
    "*.woff", "*.woff2", "*.ttf", "*.otf",
    "*.mp4", "*.webm", "*.mp3",
    "*.css",
    "*doubleclick.net*", "*google-analytics.com*", "*googletagmanager.com*",
    "*facebook.net*", "*adservice*", "*/ads/*",
];

pub struct HeadlessTier {
    pub ctx: FetchContext,
    pub profile_dir: Option<PathBuf>,
}

impl HeadlessTier {
    #[must_use]
    pub fn new(ctx: FetchContext) -> Self {
        Self { ctx, profile_dir: None }
    }

    async fn apply_stealth_and_viewport(&self, page: &Page) -> ScrapeResult<()> {
        let (w, h) = jittered_viewport((1920, 1080));
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(w)
                .height(h)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(ScrapeError::DownstreamUnavailable)?,
        )
        .await
        .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;

        page.execute(
            SetBlockedUrLsParams::builder()
                .urls(BLOCKED_RESOURCE_URL_PATTERNS.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .build()
                .map_err(ScrapeError::DownstreamUnavailable)?,
        )
        .await
        .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;

        if let Err(e) = super::browser::inject_stealth(page).await {
            log::warn!("stealth injection failed: {e}");
        }

        Ok(())
    }
}

const FRAME_INLINE_SCRIPT: &str = r#"
Array.from(document.querySelectorAll('iframe, frame'))
  .filter(f => f.src && f.src !== 'about:blank')
  .map(f => {
    try {
      return { src: f.src, html: f.contentDocument ? f.contentDocument.body.innerHTML : '' };
    } catch (e) {
      return { src: f.src, html: '' };
    }
  })
"#;

/// Enumerates non-`about:blank` frames and inlines each one's html+text,
/// giving each a `FRAME_LOAD_CEILING` budget to finish settling.
async fn collect_frame_content(page: &Page) -> (String, String) {
    let mut html = String::new();
    let mut text = String::new();

    let eval = tokio::time::timeout(FRAME_LOAD_CEILING, page.evaluate(FRAME_INLINE_SCRIPT)).await;
    let Ok(Ok(result)) = eval else { return (html, text) };
    let Ok(frames) = result.into_value::<Vec<serde_json::Value>>() else { return (html, text) };

    for frame in frames {
        let src = frame.get("src").and_then(|v| v.as_str()).unwrap_or_default();
        let frame_html = frame.get("html").and_then(|v| v.as_str()).unwrap_or_default();
        if frame_html.is_empty() {
            continue;
        }
        html.push_str(&format!("\n<!-- frame {src} -->\n{frame_html}\n"));
        let frame_doc = scraper::Html::parse_fragment(frame_html);
        text.push_str(&frame_doc.root_element().text().collect::<Vec<_>>().join(" "));
        text.push('\n');
    }
    (html, text)
}

impl Fetcher for HeadlessTier {
    fn scraper_type(&self) -> ScraperType {
        ScraperType::Headless
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

            emit("headless: launching browser".to_string());
            let (browser, _handler, _profile) = super::browser::launch_stealth_browser(true, self.profile_dir.clone()).await?;

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;

            self.apply_stealth_and_viewport(&page).await?;

            let nav = tokio::time::timeout(NAV_TIMEOUT, page.goto(url)).await;
            match nav {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.ctx.circuit_breaker.record_failure(&host);
                    return Err(ScrapeError::DownstreamUnavailable(e.to_string()));
                }
                Err(_) => {
                    self.ctx.circuit_breaker.record_failure(&host);
                    return Err(ScrapeError::Timeout(format!("navigation to {url}")));
                }
            }

            let _ = tokio::time::timeout(NAV_TIMEOUT, page.wait_for_navigation()).await;
            tokio::time::sleep(GRACE_PERIOD).await;

            let html = page.content().await.unwrap_or_default();
            let (frame_html, frame_text) = collect_frame_content(&page).await;
            let mut full_html = html.clone();
            full_html.push_str(&frame_html);

            let (page_title, mut text) = {
                let doc = scraper::Html::parse_document(&html);
                let page_title = doc
                    .select(&scraper::Selector::parse("title").unwrap())
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string());
                let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
                (page_title, text)
            };
            text.push('\n');
            text.push_str(&frame_text);

            let mut screenshots = Vec::new();
            if opts.capture_screenshots {
                let params = CaptureScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Jpeg)
                    .quality(80)
                    .build();
                if let Ok(bytes) = page.screenshot(params).await {
                    screenshots.push(bytes);
                }
            }

            let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());
            self.ctx.circuit_breaker.record_success(&host);

            let result = FetchResult {
                html: full_html,
                markdown: htmd::HtmlToMarkdown::builder().build().convert(&html).unwrap_or_default(),
                text,
                final_url,
                status_code: Some(200),
                content_type: Some("text/html".to_string()),
                page_title,
                page_description: None,
                screenshots,
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
    fn blocked_patterns_cover_images_fonts_media_and_trackers() {
        assert!(BLOCKED_RESOURCE_URL_PATTERNS.contains(&"*.png"));
        assert!(BLOCKED_RESOURCE_URL_PATTERNS.contains(&"*.woff2"));
        assert!(BLOCKED_RESOURCE_URL_PATTERNS.iter().any(|p| p.contains("doubleclick")));
    }
}

//! Smart-interactive tier (§4.2.4) — AI-guided element clicking.
//!
//! Browser setup extends `headless_tier`'s (same stealth/viewport path)
//! with extra anti-automation init scripts and an in-page network capture
//! shim injected via `Page::evaluate`, since chromiumoxide's CDP event
//! stream isn't wired into this crate's dependency set for response
//! interception. Element discovery and the AI click-decision loop are new,
//! built directly from the §4.2.4 contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use serde::Deserialize;
use serde_json::Value;

use super::{
    fingerprints::jittered_viewport, guard_host, host_of, Fetcher, FetchContext, FetchOptions,
    FetchResult, ProgressEmitter, ScraperType,
};
use crate::errors::{ScrapeError, ScrapeResult};
use crate::llm::LlmClient;

const NAV_TIMEOUT: Duration = Duration::from_secs(15);
const CLICK_SETTLE: Duration = Duration::from_millis(1500);
const MAX_CLICKS: usize = 10;
const DEFAULT_CLICK_COUNT: usize = 5;

const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.__captured_responses = [];
(function() {
  const origFetch = window.fetch;
  window.fetch = function(...args) {
    return origFetch.apply(this, args).then(resp => {
      const ct = resp.headers.get('content-type') || '';
      const url = typeof args[0] === 'string' ? args[0] : (args[0] && args[0].url) || '';
      if (ct.includes('json') || /ajax|api/i.test(url)) {
        resp.clone().text().then(body => {
          window.__captured_responses.push({ url, method: 'GET', body });
        }).catch(() => {});
      }
      return resp;
    });
  };
  const origOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function(method, url) {
    this.__method = method;
    this.__url = url;
    this.addEventListener('load', function() {
      const ct = this.getResponseHeader('content-type') || '';
      if (ct.includes('json') || /ajax|api/i.test(url)) {
        window.__captured_responses.push({ url, method, body: this.responseText });
      }
    });
    return origOpen.apply(this, arguments);
  };
})();
"#;

const ELEMENT_DISCOVERY_SCRIPT: &str = r##"
Array.from(document.querySelectorAll(
  'a[href="#"], a[href=""], button, [role=button], [onclick], [data-year], [data-id], [role=tab], .tab, .nav-link'
)).slice(0, 200).map((el, i) => {
  const text = (el.innerText || el.textContent || '').trim();
  const tag = el.tagName.toLowerCase();
  const isYear = /^\d{4}$/.test(text);
  const isShortDigits = /^\d{1,3}$/.test(text);
  const mentionsView = /view/i.test(text);
  return {
    selector: `[data-scrape-idx="${i}"]`,
    text,
    tag,
    likely_data_trigger: isYear || isShortDigits || mentionsView,
  };
})
"##;

#[derive(Debug, Clone, Deserialize)]
struct CandidateElement {
    selector: String,
    text: String,
    #[allow(dead_code)]
    tag: String,
    likely_data_trigger: bool,
}

pub struct SmartTier {
    pub ctx: FetchContext,
    pub llm: Option<Arc<dyn LlmClient>>,
}

impl SmartTier {
    #[must_use]
    pub fn new(ctx: FetchContext, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { ctx, llm }
    }
}

fn build_decision_prompt(task: &str, text_preview: &str, candidates: &[CandidateElement]) -> String {
    let candidate_list = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{i}: [{}] \"{}\" (likely_data_trigger={})", c.tag, c.text, c.likely_data_trigger))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Task: {task}\n\nPage text preview:\n{text_preview}\n\nCandidate elements:\n{candidate_list}\n\n\
Return a JSON array of up to {MAX_CLICKS} element indices worth clicking to reveal more data relevant to the task. \
Respond with ONLY the JSON array, e.g. [0, 3, 7]."
    )
}

fn parse_click_indices(raw: &str) -> Option<Vec<usize>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    let slice = &raw[start..=end];
    let values: Vec<usize> = serde_json::from_str(slice).ok()?;
    Some(values)
}

fn default_click_indices(candidates: &[CandidateElement]) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.likely_data_trigger)
        .take(DEFAULT_CLICK_COUNT)
        .map(|(i, _)| i)
        .collect()
}

async fn tag_elements_with_indices(page: &Page, count: usize) -> ScrapeResult<()> {
    let script = format!(
        r##"Array.from(document.querySelectorAll(
  'a[href="#"], a[href=""], button, [role=button], [onclick], [data-year], [data-id], [role=tab], .tab, .nav-link'
)).slice(0, {count}).forEach((el, i) => el.setAttribute('data-scrape-idx', i));"##
    );
    page.evaluate(script)
        .await
        .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;
    Ok(())
}

impl Fetcher for SmartTier {
    fn scraper_type(&self) -> ScraperType {
        ScraperType::Smart
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

            emit("smart: launching browser".to_string());
            let (browser, _handler, _profile) = super::browser::launch_stealth_browser(true, None).await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;

            let (w, h) = jittered_viewport((1920, 1080));
            let _ = page
                .execute(
                    chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
                        .width(w)
                        .height(h)
                        .device_scale_factor(1.0)
                        .mobile(false)
                        .build()
                        .map_err(ScrapeError::DownstreamUnavailable)?,
                )
                .await;

            page.evaluate(STEALTH_INIT_SCRIPT)
                .await
                .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?;

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

            let base_html = page.content().await.unwrap_or_default();
            let mut text = {
                let base_doc = scraper::Html::parse_document(&base_html);
                base_doc.root_element().text().collect::<Vec<_>>().join(" ")
            };

            let candidates_raw = page
                .evaluate(ELEMENT_DISCOVERY_SCRIPT)
                .await
                .map_err(|e| ScrapeError::DownstreamUnavailable(e.to_string()))?
                .into_value::<Vec<CandidateElement>>()
                .unwrap_or_default();
            tag_elements_with_indices(&page, candidates_raw.len()).await.ok();

            let click_indices = if let Some(task) = &opts.task_description {
                if let Some(client) = &self.llm {
                    let preview: String = text.chars().take(2000).collect();
                    let prompt = build_decision_prompt(task, &preview, &candidates_raw);
                    match client.complete(&prompt).await {
                        Ok(raw) => parse_click_indices(&raw).unwrap_or_else(|| default_click_indices(&candidates_raw)),
                        Err(_) => default_click_indices(&candidates_raw),
                    }
                } else {
                    default_click_indices(&candidates_raw)
                }
            } else {
                default_click_indices(&candidates_raw)
            };

            let mut html = base_html;
            let mut clicked = 0usize;
            for idx in click_indices.into_iter().take(MAX_CLICKS) {
                let Some(candidate) = candidates_raw.get(idx) else { continue };
                let before = text.clone();
                let click_script =
                    format!("document.querySelector('[data-scrape-idx=\"{idx}\"]')?.click();");
                if page.evaluate(click_script).await.is_err() {
                    continue;
                }
                tokio::time::sleep(CLICK_SETTLE).await;
                let new_html = page.content().await.unwrap_or_default();
                let new_text = {
                    let new_doc = scraper::Html::parse_document(&new_html);
                    new_doc.root_element().text().collect::<Vec<_>>().join(" ")
                };
                if new_text.len() > before.len() {
                    let diff_start = before.len().min(new_text.len());
                    text.push_str(&format!("\n\n[after clicking \"{}\"]\n", candidate.text));
                    text.push_str(&new_text[diff_start..]);
                }
                html = new_html;
                clicked += 1;
            }

            let captured = page
                .evaluate("window.__captured_responses || []")
                .await
                .ok()
                .and_then(|r| r.into_value::<Vec<Value>>().ok())
                .unwrap_or_default();
            if !captured.is_empty() {
                let pretty = serde_json::to_string_pretty(&captured).unwrap_or_default();
                text.push_str("\n\n[captured network responses]\n");
                text.push_str(&pretty);
                html.push_str(&format!("\n<!-- captured_responses: {pretty} -->\n"));
            }

            let page_title = scraper::Html::parse_document(&html)
                .select(&scraper::Selector::parse("title").unwrap())
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string());

            self.ctx.circuit_breaker.record_success(&host);

            let result = FetchResult {
                html,
                markdown: String::new(),
                text,
                final_url: page.url().await.ok().flatten().unwrap_or_else(|| url.to_string()),
                status_code: Some(200),
                content_type: Some("text/html".to_string()),
                page_title,
                page_description: None,
                screenshots: Vec::new(),
                request_count: u32::try_from(clicked + 1).unwrap_or(u32::MAX),
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
    fn parse_click_indices_extracts_embedded_array() {
        let raw = "Sure, here you go: [0, 2, 4] is my answer.";
        assert_eq!(parse_click_indices(raw), Some(vec![0, 2, 4]));
    }

    #[test]
    fn parse_click_indices_rejects_missing_brackets() {
        assert_eq!(parse_click_indices("no array here"), None);
    }

    #[test]
    fn default_click_indices_picks_first_five_flagged_triggers() {
        let candidates: Vec<CandidateElement> = (0..10)
            .map(|i| CandidateElement {
                selector: format!("[data-scrape-idx=\"{i}\"]"),
                text: i.to_string(),
                tag: "a".to_string(),
                likely_data_trigger: true,
            })
            .collect();
        let picked = default_click_indices(&candidates);
        assert_eq!(picked, vec![0, 1, 2, 3, 4]);
    }
}

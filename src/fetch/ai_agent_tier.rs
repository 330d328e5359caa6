//! AI-Agent crawler tier (§4.2.5) — multi-page, task-directed crawl built on
//! the crawler primitives (§4.3: dedup, queue, link discovery, stats).
//!
//! The page-by-page loop shape (fetch -> extract -> discover -> enqueue ->
//! periodic LLM re-seeding) is grounded on `crawl_engine/orchestrator.rs`'s
//! queue-draining worker loop, generalized from chromiumoxide page
//! navigation to plain HTTP fetches since this tier never launches a
//! browser (§4.2.5 only uses "plain HTTP, 5s ceiling").

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use super::{
    guard_host, host_of, Fetcher, FetchContext, FetchOptions, FetchResult, ProgressEmitter, ScraperType,
};
use crate::crawl::dedup::normalize_url;
use crate::crawl::link_discoverer::{discover_ajax_endpoints, discover_frame_urls, discover_links, filter_links, prioritize_links};
use crate::crawl::{CrawlConfig, CrawlPage, CrawlQueue, DuplicateDetector, StatsTracker};
use crate::errors::{ScrapeError, ScrapeResult};
use crate::llm::LlmClient;

const PAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AiAgentTier {
    pub ctx: FetchContext,
    pub crawl_config: CrawlConfig,
    pub client: reqwest::Client,
    pub llm: Option<Arc<dyn LlmClient>>,
}

impl AiAgentTier {
    #[must_use]
    pub fn new(ctx: FetchContext, crawl_config: CrawlConfig, llm: Option<Arc<dyn LlmClient>>) -> Self {
        let client = reqwest::Client::builder().timeout(PAGE_FETCH_TIMEOUT).build().unwrap_or_default();
        Self { ctx, crawl_config, client, llm }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LlmCrawlDecision {
    #[serde(default)]
    has_relevant_data: bool,
    #[serde(default)]
    extracted_data: Vec<Value>,
    #[serde(default)]
    links_to_follow: Vec<usize>,
    #[serde(default)]
    summary: String,
}

fn parse_llm_decision(raw: &str) -> Option<LlmCrawlDecision> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn json_records_to_text(value: &Value) -> String {
    let records = match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("data")
            .or_else(|| map.get("results"))
            .or_else(|| map.get("items"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_else(|| vec![value.clone()]),
        other => vec![other.clone()],
    };
    records.iter().map(|r| serde_json::to_string(r).unwrap_or_default()).collect::<Vec<_>>().join("\n")
}

fn extract_ajax_triggers(html: &str) -> Vec<String> {
    let doc = scraper::Html::parse_document(html);
    let Ok(selector) = scraper::Selector::parse(r##"a[href="#"], [data-year], [data-id], [onclick]"##) else {
        return Vec::new();
    };
    doc.select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty() && text.len() <= 30)
        .collect()
}

fn extract_script_bodies(html: &str) -> Vec<String> {
    let doc = scraper::Html::parse_document(html);
    let Ok(selector) = scraper::Selector::parse("script") else { return Vec::new() };
    doc.select(&selector).map(|el| el.text().collect::<String>()).filter(|s| !s.is_empty()).collect()
}

impl Fetcher for AiAgentTier {
    fn scraper_type(&self) -> ScraperType {
        ScraperType::AiAgent
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        _job_id: &'a str,
        opts: &'a FetchOptions,
        emit: ProgressEmitter,
    ) -> Pin<Box<dyn Future<Output = ScrapeResult<Option<FetchResult>>> + Send + 'a>> {
        Box::pin(async move {
            let Some(start_url) = normalize_url(url) else {
                return Err(ScrapeError::InvalidInput(url.to_string()));
            };

            let queue = CrawlQueue::new();
            let dedup = DuplicateDetector::new();
            let stats = StatsTracker::new();
            queue.enqueue(CrawlPage::new(start_url.clone(), 0));
            dedup.add_url(&start_url);

            let mut composite_html = String::new();
            let mut composite_text = String::new();
            let mut extracted_items: Vec<Value> = Vec::new();
            let mut ajax_fetched_total = 0u32;
            let mut pages_visited = 0u32;
            let mut visited_set: HashSet<String> = HashSet::new();

            while pages_visited < self.crawl_config.max_pages {
                let Some(page) = queue.dequeue() else { break };

                if page.depth > self.crawl_config.max_depth {
                    stats.record_skip();
                    continue;
                }

                let page_start = Instant::now();
                let host = match host_of(&page.url) {
                    Ok(h) => h,
                    Err(_) => {
                        stats.record_failure();
                        continue;
                    }
                };
                if guard_host(&self.ctx, &host).await.is_err() {
                    stats.record_failure();
                    continue;
                }

                let fetch_result = tokio::time::timeout(PAGE_FETCH_TIMEOUT, self.client.get(&page.url).send()).await;
                let Ok(Ok(resp)) = fetch_result else {
                    self.ctx.circuit_breaker.record_failure(&host);
                    stats.record_failure();
                    continue;
                };
                let Ok(html) = resp.text().await else {
                    self.ctx.circuit_breaker.record_failure(&host);
                    stats.record_failure();
                    continue;
                };
                self.ctx.circuit_breaker.record_success(&host);

                pages_visited += 1;
                visited_set.insert(page.url.clone());
                stats.record_visit(page.depth, page_start.elapsed());
                emit(format!("ai-agent: visited {} ({} total)", page.url, pages_visited));

                let page_text = {
                    let doc = scraper::Html::parse_document(&html);
                    doc.root_element().text().collect::<Vec<_>>().join(" ")
                };
                let scripts = extract_script_bodies(&html);
                let ajax_triggers = extract_ajax_triggers(&html);

                composite_html.push_str(&format!("\n<!-- PAGE {} -->\n{}\n", page.url, html));
                composite_text.push_str(&format!("\n\n=== {} ===\n{}", page.url, page_text));

                let discovered = discover_links(&html, &page.url, page.depth, &visited_set);
                let filtered = filter_links(discovered, &self.crawl_config, &visited_set, &page.url);
                let prioritized = prioritize_links(filtered, opts.task_description.as_deref());
                let mut unvisited_links = Vec::new();
                for link in &prioritized {
                    if dedup.add_url(&link.url) {
                        queue.enqueue(CrawlPage::new(link.url.clone(), page.depth + 1));
                        unvisited_links.push(link.url.clone());
                    }
                }
                stats.record_links_discovered(unvisited_links.len() as u64);

                if ajax_fetched_total < self.crawl_config.max_ajax_endpoints {
                    let remaining = (self.crawl_config.max_ajax_endpoints - ajax_fetched_total) as usize;
                    let endpoints = discover_ajax_endpoints(&page.url, &scripts, &[])
                        .into_iter()
                        .take(remaining)
                        .collect::<Vec<_>>();
                    for endpoint in &endpoints {
                        ajax_fetched_total += 1;
                        if let Ok(resp) = self.client.get(endpoint).send().await {
                            if let Ok(body) = resp.text().await {
                                let appended = match serde_json::from_str::<Value>(&body) {
                                    Ok(json) => json_records_to_text(&json),
                                    Err(_) => body,
                                };
                                if !appended.trim().is_empty() {
                                    composite_text.push_str(&format!("\n[ajax {endpoint}]\n{appended}"));
                                }
                            }
                        }
                    }
                    stats.record_ajax_fetched(endpoints.len() as u64);
                }

                for frame_url in discover_frame_urls(&html, &page.url) {
                    if let Some(normalized) = normalize_url(&frame_url) {
                        if dedup.add_url(&normalized) {
                            queue.enqueue(CrawlPage::new(normalized, page.depth + 1));
                        }
                    }
                }

                let should_consult_llm = extracted_items.is_empty() || page.depth == 0;
                if should_consult_llm {
                    if let Some(client) = &self.llm {
                        if let Some(task) = &opts.task_description {
                            let preview: String = page_text.chars().take(3000).collect();
                            let links_block = unvisited_links
                                .iter()
                                .enumerate()
                                .map(|(i, l)| format!("{i}: {l}"))
                                .collect::<Vec<_>>()
                                .join("\n");
                            let triggers_block = ajax_triggers.join(", ");
                            let prompt = format!(
                                "Task: {task}\n\nPage text:\n{preview}\n\nUnvisited links:\n{links_block}\n\n\
AJAX triggers seen: {triggers_block}\n\nRespond with JSON: \
{{\"hasRelevantData\": bool, \"extractedData\": [...], \"linksToFollow\": [indices], \"summary\": \"...\"}}"
                            );
                            if let Ok(raw) = client.complete(&prompt).await {
                                if let Some(decision) = parse_llm_decision(&raw) {
                                    if decision.has_relevant_data {
                                        extracted_items.extend(decision.extracted_data);
                                    }
                                    for idx in decision.links_to_follow {
                                        if let Some(link_url) = unvisited_links.get(idx) {
                                            if dedup.add_url(link_url) {
                                                queue.enqueue(CrawlPage::new(link_url.clone(), page.depth + 1));
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }

                if !self.crawl_config.delay_between_requests.is_zero() {
                    tokio::time::sleep(self.crawl_config.delay_between_requests).await;
                }
            }

            let snapshot = stats.snapshot();
            let summary = format!(
                "# AI-Agent crawl summary\n\n- pages visited: {}\n- pages failed: {}\n- duplicates skipped: {}\n\
- links discovered: {}\n- ajax endpoints fetched: {}\n- success rate: {:.2}\n- depth reached: {}\n\
- extracted items: {}\n",
                snapshot.pages_visited,
                snapshot.pages_failed,
                snapshot.duplicates_detected,
                snapshot.links_discovered,
                snapshot.ajax_fetched,
                snapshot.success_rate,
                snapshot.depth_reached,
                extracted_items.len(),
            );

            let result = FetchResult {
                html: composite_html,
                markdown: summary,
                text: composite_text,
                final_url: start_url,
                status_code: Some(200),
                content_type: Some("text/html".to_string()),
                page_title: None,
                page_description: None,
                screenshots: Vec::new(),
                request_count: pages_visited + ajax_fetched_total,
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
    fn parse_llm_decision_extracts_embedded_json() {
        let raw = "Here:\n{\"hasRelevantData\": true, \"extractedData\": [{\"a\":1}], \"linksToFollow\": [0,2], \"summary\": \"ok\"}\nthanks";
        let decision = parse_llm_decision(raw).unwrap();
        assert!(decision.has_relevant_data);
        assert_eq!(decision.links_to_follow, vec![0, 2]);
        assert_eq!(decision.extracted_data.len(), 1);
    }

    #[test]
    fn extract_ajax_triggers_filters_long_text() {
        let html = r##"<a href="#">2024</a><a href="#">This text is way too long to be a trigger</a>"##;
        let triggers = extract_ajax_triggers(html);
        assert_eq!(triggers, vec!["2024".to_string()]);
    }

    #[test]
    fn json_records_to_text_handles_plain_array() {
        let value: Value = serde_json::json!([{"x": 1}, {"x": 2}]);
        assert_eq!(json_records_to_text(&value).lines().count(), 2);
    }
}

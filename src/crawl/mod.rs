//! Crawler primitives used by the AI-agent fetcher tier (§4.3).
//!
//! Grounded on `crawl_engine/crawl_types.rs` (`CrawlQueue` shape),
//! `link_processor.rs` (link extraction/filtering flow), and
//! `domain_limiter.rs` (per-domain policy struct) — generalized from
//! page-crawling to the multi-page task-directed crawl this spec
//! describes, and with the visited-set swapped from a probabilistic bloom
//! filter to an exact `HashSet` since §4.3.1 specifies deterministic
//! `add_url` semantics.

pub mod dedup;
pub mod link_discoverer;
pub mod queue;
pub mod stats;

use std::time::Duration;

pub use dedup::{normalize_url, DuplicateDetector};
pub use queue::{CrawlPage, CrawlQueue};
pub use stats::{StatsSnapshot, StatsTracker};

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_pages: u32,
    pub max_depth: u32,
    pub max_ajax_endpoints: u32,
    pub follow_external_links: bool,
    pub allowed_domains: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub delay_between_requests: Duration,
    pub timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_depth: 3,
            max_ajax_endpoints: 10,
            follow_external_links: false,
            allowed_domains: Vec::new(),
            blocked_patterns: Vec::new(),
            delay_between_requests: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::AppConfig> for CrawlConfig {
    fn from(app: &crate::config::AppConfig) -> Self {
        Self {
            max_pages: app.ai_agent_max_pages as u32,
            max_depth: u32::from(app.ai_agent_max_depth),
            max_ajax_endpoints: app.ai_agent_max_ajax_endpoints as u32,
            follow_external_links: app.ai_agent_follow_external_links,
            allowed_domains: Vec::new(),
            blocked_patterns: Vec::new(),
            delay_between_requests: app.ai_agent_delay_between_requests,
            timeout: app.scrape_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Pending,
    Visited,
    Failed,
}

//! Crawl statistics tracker (§4.3.4).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default, Clone)]
struct Counters {
    visited_by_depth: HashMap<u32, u64>,
    failed: u64,
    skipped: u64,
    duplicates: u64,
    links_discovered: u64,
    ajax_fetched: u64,
    page_times_ms: Vec<u64>,
}

pub struct StatsTracker {
    counters: Mutex<Counters>,
    started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub pages_visited: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    pub duplicates_detected: u64,
    pub links_discovered: u64,
    pub ajax_fetched: u64,
    pub success_rate: f64,
    pub average_page_time_ms: f64,
    pub depth_reached: u32,
    pub total_time: Duration,
}

impl StatsTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { counters: Mutex::new(Counters::default()), started_at: Instant::now() }
    }

    pub fn record_visit(&self, depth: u32, page_time: Duration) {
        let mut c = self.counters.lock();
        *c.visited_by_depth.entry(depth).or_insert(0) += 1;
        c.page_times_ms.push(page_time.as_millis() as u64);
    }

    pub fn record_failure(&self) {
        self.counters.lock().failed += 1;
    }

    pub fn record_skip(&self) {
        self.counters.lock().skipped += 1;
    }

    pub fn record_duplicate(&self) {
        self.counters.lock().duplicates += 1;
    }

    pub fn record_links_discovered(&self, count: u64) {
        self.counters.lock().links_discovered += count;
    }

    pub fn record_ajax_fetched(&self, count: u64) {
        self.counters.lock().ajax_fetched += count;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock();
        let pages_visited: u64 = c.visited_by_depth.values().sum();
        let attempted = pages_visited + c.failed;
        let success_rate = if attempted == 0 { 1.0 } else { pages_visited as f64 / attempted as f64 };
        let average_page_time_ms = if c.page_times_ms.is_empty() {
            0.0
        } else {
            c.page_times_ms.iter().sum::<u64>() as f64 / c.page_times_ms.len() as f64
        };
        let depth_reached = c.visited_by_depth.keys().copied().max().unwrap_or(0);

        StatsSnapshot {
            pages_visited,
            pages_failed: c.failed,
            pages_skipped: c.skipped,
            duplicates_detected: c.duplicates,
            links_discovered: c.links_discovered,
            ajax_fetched: c.ajax_fetched,
            success_rate,
            average_page_time_ms,
            depth_reached,
            total_time: self.started_at.elapsed(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_accounts_for_failures() {
        let tracker = StatsTracker::new();
        tracker.record_visit(0, Duration::from_millis(100));
        tracker.record_visit(1, Duration::from_millis(200));
        tracker.record_failure();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.pages_visited, 2);
        assert_eq!(snapshot.pages_failed, 1);
        assert!((snapshot.success_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(snapshot.depth_reached, 1);
        assert_eq!(snapshot.average_page_time_ms, 150.0);
    }

    #[test]
    fn empty_tracker_has_perfect_success_rate() {
        let snapshot = StatsTracker::new().snapshot();
        assert_eq!(snapshot.success_rate, 1.0);
        assert_eq!(snapshot.pages_visited, 0);
    }
}

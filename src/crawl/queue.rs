//! Crawl priority queue (§4.3.2): FIFO by default, with an optional
//! priority field (higher first); ties broken by insertion order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct CrawlPage {
    pub url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub priority: i32,
}

impl CrawlPage {
    #[must_use]
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self { url: url.into(), depth, parent_url: None, priority: 0 }
    }
}

struct QueueEntry {
    page: CrawlPage,
    sequence: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.page.priority == other.page.priority && self.sequence == other.sequence
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority sorts first; among equal priorities, the lower
        // (earlier) insertion sequence sorts first — reversed because
        // BinaryHeap is a max-heap and we want earliest-first to "win".
        self.page
            .priority
            .cmp(&other.page.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct CrawlQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    urls: Mutex<HashSet<String>>,
    next_sequence: Mutex<u64>,
}

impl CrawlQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            urls: Mutex::new(HashSet::new()),
            next_sequence: Mutex::new(0),
        }
    }

    pub fn enqueue(&self, page: CrawlPage) {
        let mut seq_guard = self.next_sequence.lock();
        let sequence = *seq_guard;
        *seq_guard += 1;
        drop(seq_guard);

        self.urls.lock().insert(page.url.clone());
        self.heap.lock().push(QueueEntry { page, sequence });
    }

    pub fn dequeue(&self) -> Option<CrawlPage> {
        let entry = self.heap.lock().pop()?;
        self.urls.lock().remove(&entry.page.url);
        Some(entry.page)
    }

    pub fn has_url(&self, url: &str) -> bool {
        self.urls.lock().contains(url)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

impl Default for CrawlQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_when_priorities_equal() {
        let queue = CrawlQueue::new();
        queue.enqueue(CrawlPage::new("https://a", 0));
        queue.enqueue(CrawlPage::new("https://b", 0));
        queue.enqueue(CrawlPage::new("https://c", 0));
        assert_eq!(queue.dequeue().unwrap().url, "https://a");
        assert_eq!(queue.dequeue().unwrap().url, "https://b");
        assert_eq!(queue.dequeue().unwrap().url, "https://c");
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let queue = CrawlQueue::new();
        queue.enqueue(CrawlPage { priority: 0, ..CrawlPage::new("https://low", 0) });
        queue.enqueue(CrawlPage { priority: 5, ..CrawlPage::new("https://high", 0) });
        assert_eq!(queue.dequeue().unwrap().url, "https://high");
        assert_eq!(queue.dequeue().unwrap().url, "https://low");
    }

    #[test]
    fn has_url_tracks_membership_until_dequeued() {
        let queue = CrawlQueue::new();
        queue.enqueue(CrawlPage::new("https://a", 0));
        assert!(queue.has_url("https://a"));
        queue.dequeue();
        assert!(!queue.has_url("https://a"));
    }
}

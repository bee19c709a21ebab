use crate::planner::Subquery;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters shared by every task of a crawl run
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub pages_fetched: AtomicUsize,
    pub listings_discovered: AtomicUsize,
    pub listings_duplicate: AtomicUsize,
    pub listings_rejected: AtomicUsize,
    pub details_dispatched: AtomicUsize,
    pub detail_retries: AtomicUsize,
    pub records_completed: AtomicUsize,
    pub records_partial: AtomicUsize,
    pub records_dropped: AtomicUsize,
    pub records_cancelled: AtomicUsize,
    pub sink_failures: AtomicUsize,
}

impl CrawlStats {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            pages_fetched: load(&self.pages_fetched),
            listings_discovered: load(&self.listings_discovered),
            listings_duplicate: load(&self.listings_duplicate),
            listings_rejected: load(&self.listings_rejected),
            details_dispatched: load(&self.details_dispatched),
            detail_retries: load(&self.detail_retries),
            records_completed: load(&self.records_completed),
            records_partial: load(&self.records_partial),
            records_dropped: load(&self.records_dropped),
            records_cancelled: load(&self.records_cancelled),
            sink_failures: load(&self.sink_failures),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub pages_fetched: usize,
    pub listings_discovered: usize,
    pub listings_duplicate: usize,
    pub listings_rejected: usize,
    pub details_dispatched: usize,
    pub detail_retries: usize,
    pub records_completed: usize,
    pub records_partial: usize,
    pub records_dropped: usize,
    pub records_cancelled: usize,
    pub sink_failures: usize,
}

impl StatsSnapshot {
    /// Discovered listings whose fate is known; equals `listings_discovered`
    /// once a run has finished
    pub fn settled(&self) -> usize {
        self.listings_rejected
            + self.listings_duplicate
            + self.records_completed
            + self.records_partial
            + self.records_dropped
            + self.records_cancelled
    }
}

/// How a search session ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Exhausted,
    /// Stopped at the page limit with more results upstream
    Truncated,
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubqueryReport {
    pub subquery: Subquery,
    pub pages: usize,
    pub outcome: SessionOutcome,
}

/// Summary of a finished crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub subqueries: Vec<SubqueryReport>,
    pub stats: StatsSnapshot,
    pub cancelled: bool,
}

impl CrawlReport {
    fn count(&self, matches: impl Fn(&SessionOutcome) -> bool) -> usize {
        self.subqueries.iter().filter(|r| matches(&r.outcome)).count()
    }

    pub fn issued(&self) -> usize {
        self.subqueries.len()
    }

    pub fn exhausted(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::Exhausted))
    }

    pub fn truncated(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::Truncated))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::Failed { .. }))
    }

    pub fn cancelled_sessions(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::Cancelled))
    }
}

//! Crawl orchestration
//!
//! [`engine::CrawlEngine`] plans a query, runs one [`session::SearchSession`]
//! per subquery and one detail fetch per newly claimed listing. The only
//! state shared between those tasks lives in [`CrawlContext`].

pub mod dedup;
pub mod detail;
pub mod engine;
pub mod fusion;
pub mod rates;
pub mod session;
pub mod stats;

pub use dedup::SeenSet;
pub use engine::CrawlEngine;
pub use fusion::FusionCache;
pub use rates::{RatePolicy, Verdict};
pub use stats::{CrawlReport, SessionOutcome, StatsSnapshot, SubqueryReport};

use crate::config::CrawlConfig;
use crate::models::{Geography, ListingId};
use stats::CrawlStats;
use std::sync::Arc;

/// Per-run services shared by all sessions and detail fetches
pub struct CrawlContext {
    pub config: CrawlConfig,
    pub seen: SeenSet,
    pub cache: FusionCache,
    pub stats: CrawlStats,
    pub rates: RatePolicy,
}

impl CrawlContext {
    pub fn new(config: CrawlConfig) -> Self {
        let rates = RatePolicy::from(&config.rates);
        Self {
            config,
            seen: SeenSet::new(),
            cache: FusionCache::new(),
            stats: CrawlStats::default(),
            rates,
        }
    }
}

/// A claimed listing waiting for its detail fetch
#[derive(Debug, Clone)]
pub struct DetailJob {
    pub listing_id: ListingId,
    /// Geography of the session that discovered the listing
    pub geography: Arc<Geography>,
}

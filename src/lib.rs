//! Sharded stay-search crawler
//!
//! A query is planned into subqueries, each subquery is paged by its own
//! search session, and every newly seen listing gets one detail fetch. Search
//! and detail results are fused into a single record per listing.

pub mod config;
pub mod crawl;
pub mod error;
pub mod models;
pub mod output;
pub mod planner;
pub mod scrapers;

pub use config::CrawlConfig;
pub use crawl::{CrawlEngine, CrawlReport};
pub use error::{CrawlError, ProviderError, Result};
pub use planner::Query;

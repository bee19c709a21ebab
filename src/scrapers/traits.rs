use crate::error::ProviderError;
use crate::models::{Fields, ListingId};
use crate::planner::Subquery;
use crate::scrapers::types::{Cursor, SearchPage};
use async_trait::async_trait;

/// One page of search results for a subquery
///
/// Each upstream schema version is its own implementation; the crawl engine
/// never inspects which one it is talking to.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch the page after `cursor`, or the first page when it is `None`
    async fn search(
        &self,
        subquery: &Subquery,
        cursor: Option<&Cursor>,
    ) -> Result<SearchPage, ProviderError>;

    /// Get the name of the provider source
    fn source_name(&self) -> &'static str;
}

/// Per-listing detail lookup
#[async_trait]
pub trait DetailProvider: Send + Sync {
    async fn fetch_detail(&self, listing_id: &ListingId) -> Result<Fields, ProviderError>;

    fn source_name(&self) -> &'static str;
}

//! Search session: pagination of one subquery
//!
//! ```text
//! Started -> PageRequested -> PageReceived -> PageRequested | Exhausted | Truncated | Failed
//!                  \-> Cancelled
//! ```
//!
//! A session never requests page N+1 before page N has been handled, and
//! everything it owns (cursor, geography, page count) is private to it.

use crate::crawl::rates::Verdict;
use crate::crawl::stats::{CrawlStats, SessionOutcome, SubqueryReport};
use crate::crawl::{CrawlContext, DetailJob};
use crate::error::ProviderError;
use crate::models::{Candidate, Geography};
use crate::planner::Subquery;
use crate::scrapers::types::{Cursor, SearchPage};
use crate::scrapers::SearchProvider;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum SessionState {
    Started,
    PageRequested { cursor: Option<Cursor> },
    PageReceived { page: SearchPage },
    Exhausted,
    Truncated,
    Failed(ProviderError),
    Cancelled,
}

impl SessionState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Exhausted
                | SessionState::Truncated
                | SessionState::Failed(_)
                | SessionState::Cancelled
        )
    }
}

pub struct SearchSession {
    subquery: Subquery,
    state: SessionState,
    geography: Option<Arc<Geography>>,
    pages: usize,
}

impl SearchSession {
    pub fn new(subquery: Subquery) -> Self {
        Self {
            subquery,
            state: SessionState::Started,
            geography: None,
            pages: 0,
        }
    }

    /// Drive the session until it reaches a terminal state
    pub async fn run(
        mut self,
        provider: &dyn SearchProvider,
        ctx: &CrawlContext,
        jobs: &UnboundedSender<DetailJob>,
        cancel: &CancellationToken,
    ) -> SubqueryReport {
        info!("Starting search session {}", self.subquery);

        while !self.state.is_terminal() {
            let state = std::mem::replace(&mut self.state, SessionState::Started);
            self.state = match state {
                SessionState::Started => SessionState::PageRequested { cursor: None },
                SessionState::PageRequested { cursor } => {
                    self.request_page(provider, ctx, cursor, cancel).await
                }
                SessionState::PageReceived { page } => self.receive_page(page, ctx, jobs, cancel),
                terminal => terminal,
            };
        }

        let outcome = match self.state {
            SessionState::Exhausted => SessionOutcome::Exhausted,
            SessionState::Truncated => {
                warn!(
                    "Session {} stopped at the {}-page limit with results remaining",
                    self.subquery, self.pages
                );
                SessionOutcome::Truncated
            }
            SessionState::Failed(error) => {
                warn!("Session {} failed: {}", self.subquery, error);
                SessionOutcome::Failed {
                    error: error.to_string(),
                }
            }
            _ => SessionOutcome::Cancelled,
        };

        info!(
            "Session {} finished after {} page(s): {:?}",
            self.subquery, self.pages, outcome
        );

        SubqueryReport {
            subquery: self.subquery,
            pages: self.pages,
            outcome,
        }
    }

    async fn request_page(
        &mut self,
        provider: &dyn SearchProvider,
        ctx: &CrawlContext,
        cursor: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> SessionState {
        if cancel.is_cancelled() {
            return SessionState::Cancelled;
        }

        debug!(
            "Requesting page {} of session {} from {}",
            self.pages + 1,
            self.subquery,
            provider.source_name()
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionState::Cancelled,
            result = provider.search(&self.subquery, cursor.as_ref()) => result,
        };

        match result {
            Ok(page) => {
                self.pages += 1;
                CrawlStats::incr(&ctx.stats.pages_fetched);
                SessionState::PageReceived { page }
            }
            Err(error) => SessionState::Failed(error),
        }
    }

    fn receive_page(
        &mut self,
        page: SearchPage,
        ctx: &CrawlContext,
        jobs: &UnboundedSender<DetailJob>,
        cancel: &CancellationToken,
    ) -> SessionState {
        let geography = match self.geography.clone() {
            Some(geography) => geography,
            None => {
                let Some(geography) = page.geography else {
                    return SessionState::Failed(ProviderError::Schema(
                        "first search page carries no geography".to_string(),
                    ));
                };
                debug!("Session {} geography: {:?}", self.subquery, geography);
                let geography = Arc::new(geography);
                self.geography = Some(Arc::clone(&geography));
                geography
            }
        };

        let found = page.candidates.len();
        let mut claimed = 0;
        for candidate in page.candidates {
            if self.handle_candidate(candidate, &geography, ctx, jobs) {
                claimed += 1;
            }
        }
        debug!(
            "Page {} of session {}: {} candidate(s), {} new",
            self.pages, self.subquery, found, claimed
        );

        if cancel.is_cancelled() {
            return SessionState::Cancelled;
        }

        if !page.has_more {
            return SessionState::Exhausted;
        }

        match page.next_cursor {
            None => SessionState::Failed(ProviderError::Schema(
                "page reports more results but no cursor".to_string(),
            )),
            Some(_) if self.pages >= ctx.config.session.max_pages => SessionState::Truncated,
            Some(cursor) => SessionState::PageRequested {
                cursor: Some(cursor),
            },
        }
    }

    /// Reconcile, claim and dispatch one candidate; true if it was dispatched
    fn handle_candidate(
        &self,
        candidate: Candidate,
        geography: &Arc<Geography>,
        ctx: &CrawlContext,
        jobs: &UnboundedSender<DetailJob>,
    ) -> bool {
        CrawlStats::incr(&ctx.stats.listings_discovered);

        let verdict = ctx
            .rates
            .reconcile(self.subquery.budget_ceiling, candidate.quote.as_ref());
        let monthly_estimate = match verdict {
            Verdict::Reject {
                monthly_estimate,
                ceiling,
            } => {
                debug!(
                    "Rejected {}: monthly estimate {} exceeds ceiling {}",
                    candidate.listing_id(),
                    monthly_estimate,
                    ceiling
                );
                CrawlStats::incr(&ctx.stats.listings_rejected);
                return false;
            }
            Verdict::Accept { monthly_estimate } => monthly_estimate,
        };

        if !ctx.seen.try_claim(candidate.listing_id()) {
            CrawlStats::incr(&ctx.stats.listings_duplicate);
            return false;
        }

        let mut record = candidate.record;
        if let Some(estimate) = monthly_estimate {
            record
                .fields
                .insert("monthly_price_estimate".to_string(), estimate.into());
        }
        let listing_id = record.listing_id.clone();

        // search stage lands in the cache before the detail fetch can start
        ctx.cache.put(record);

        let job = DetailJob {
            listing_id,
            geography: Arc::clone(geography),
        };
        if let Err(rejected) = jobs.send(job) {
            warn!(
                "Detail dispatcher gone, dropping {}",
                rejected.0.listing_id
            );
            ctx.cache.discard(&rejected.0.listing_id);
            CrawlStats::incr(&ctx.stats.records_dropped);
            return false;
        }

        CrawlStats::incr(&ctx.stats.details_dispatched);
        true
    }
}

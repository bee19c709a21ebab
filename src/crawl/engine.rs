use crate::config::CrawlConfig;
use crate::crawl::detail::{run_detail, DetailOutcome};
use crate::crawl::session::SearchSession;
use crate::crawl::stats::{CrawlReport, CrawlStats, SessionOutcome, SubqueryReport};
use crate::crawl::{CrawlContext, DetailJob};
use crate::error::Result;
use crate::output::RecordSink;
use crate::planner::{plan, Query, Subquery};
use crate::scrapers::{DetailProvider, SearchProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs crawls against one search provider and one detail provider
pub struct CrawlEngine {
    search: Arc<dyn SearchProvider>,
    detail: Arc<dyn DetailProvider>,
    sink: Arc<dyn RecordSink>,
    config: CrawlConfig,
}

impl CrawlEngine {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        detail: Arc<dyn DetailProvider>,
        sink: Arc<dyn RecordSink>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            search,
            detail,
            sink,
            config,
        }
    }

    pub async fn run(&self, query: &Query) -> Result<CrawlReport> {
        self.run_with_cancellation(query, CancellationToken::new())
            .await
    }

    /// Crawl `query` until every session and detail fetch has finished
    ///
    /// Planning errors abort the run; anything that goes wrong inside a
    /// single session or fetch is recorded in the report instead.
    pub async fn run_with_cancellation(
        &self,
        query: &Query,
        cancel: CancellationToken,
    ) -> Result<CrawlReport> {
        let subqueries = plan(query, &self.config.planner)?;
        info!(
            "🏠 Crawling '{}' with {} subquer{} via {}/{}",
            query.place,
            subqueries.len(),
            if subqueries.len() == 1 { "y" } else { "ies" },
            self.search.source_name(),
            self.detail.source_name()
        );

        let ctx = Arc::new(CrawlContext::new(self.config.clone()));
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch_details(
            jobs_rx,
            Arc::clone(&self.detail),
            Arc::clone(&ctx),
            Arc::clone(&self.sink),
            Arc::new(Semaphore::new(self.config.concurrency.detail_fetches)),
            cancel.clone(),
        ));

        let session_permits = Arc::new(Semaphore::new(self.config.concurrency.sessions));
        let mut sessions = JoinSet::new();
        let mut unreported: BTreeMap<usize, Subquery> = BTreeMap::new();
        for subquery in subqueries {
            unreported.insert(subquery.index, subquery.clone());
            let provider = Arc::clone(&self.search);
            let ctx = Arc::clone(&ctx);
            let jobs = jobs_tx.clone();
            let permits = Arc::clone(&session_permits);
            let cancel = cancel.clone();

            sessions.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return SubqueryReport {
                        subquery,
                        pages: 0,
                        outcome: SessionOutcome::Cancelled,
                    };
                };
                SearchSession::new(subquery)
                    .run(provider.as_ref(), &ctx, &jobs, &cancel)
                    .await
            });
        }
        // the dispatcher stops once every session has dropped its sender
        drop(jobs_tx);

        let mut reports = Vec::new();
        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok(report) => {
                    unreported.remove(&report.subquery.index);
                    reports.push(report);
                }
                Err(e) => warn!("Search session task aborted: {}", e),
            }
        }
        // a session that died without reporting still counts as issued
        reports.extend(unreported.into_values().map(|subquery| SubqueryReport {
            subquery,
            pages: 0,
            outcome: SessionOutcome::Failed {
                error: "session task aborted".to_string(),
            },
        }));
        reports.sort_by_key(|report| report.subquery.index);

        if let Err(e) = dispatcher.await {
            warn!("Detail dispatcher aborted: {}", e);
        }

        let stranded = ctx.cache.len();
        if stranded > 0 {
            warn!("{} listing(s) left unfinished in the fusion cache", stranded);
        }

        let report = CrawlReport {
            subqueries: reports,
            stats: ctx.stats.snapshot(),
            cancelled: cancel.is_cancelled(),
        };

        info!(
            "Crawl finished: {} subqueries ({} exhausted, {} truncated, {} failed, {} cancelled)",
            report.issued(),
            report.exhausted(),
            report.truncated(),
            report.failed(),
            report.cancelled_sessions()
        );
        info!(
            "Listings: {} discovered, {} duplicate, {} rejected, {} completed, {} partial, {} dropped, {} cancelled",
            report.stats.listings_discovered,
            report.stats.listings_duplicate,
            report.stats.listings_rejected,
            report.stats.records_completed,
            report.stats.records_partial,
            report.stats.records_dropped,
            report.stats.records_cancelled
        );

        Ok(report)
    }
}

async fn dispatch_details(
    mut jobs: UnboundedReceiver<DetailJob>,
    provider: Arc<dyn DetailProvider>,
    ctx: Arc<CrawlContext>,
    sink: Arc<dyn RecordSink>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut fetches = JoinSet::new();

    while let Some(job) = jobs.recv().await {
        let provider = Arc::clone(&provider);
        let ctx = Arc::clone(&ctx);
        let sink = Arc::clone(&sink);
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();

        fetches.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                ctx.cache.discard(&job.listing_id);
                CrawlStats::incr(&ctx.stats.records_cancelled);
                return DetailOutcome::Cancelled;
            };
            run_detail(job, provider.as_ref(), &ctx, sink.as_ref(), &cancel).await
        });

        while let Some(finished) = fetches.try_join_next() {
            log_join_error(finished);
        }
    }

    while let Some(finished) = fetches.join_next().await {
        log_join_error(finished);
    }
}

fn log_join_error(finished: std::result::Result<DetailOutcome, tokio::task::JoinError>) {
    if let Err(e) = finished {
        warn!("Detail fetch task aborted: {}", e);
    }
}

//! Detail fetch step
//!
//! One fetch per claimed listing. Transient failures are retried with
//! exponential backoff up to the configured bound; once the bound is spent
//! the listing is completed from its search-stage fields alone (flagged
//! partial) or dropped, depending on `detail.emit_partial`.

use crate::crawl::stats::CrawlStats;
use crate::crawl::{CrawlContext, DetailJob};
use crate::error::ProviderError;
use crate::models::{CompletedRecord, Fields, PartialRecord, Stage};
use crate::output::RecordSink;
use crate::scrapers::DetailProvider;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one dispatched listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailOutcome {
    Completed,
    Partial,
    Dropped,
    Cancelled,
}

enum FetchResult {
    Fetched(Fields),
    GaveUp(ProviderError),
    Cancelled,
}

pub async fn run_detail(
    job: DetailJob,
    provider: &dyn DetailProvider,
    ctx: &CrawlContext,
    sink: &dyn RecordSink,
    cancel: &CancellationToken,
) -> DetailOutcome {
    let listing_id = job.listing_id.clone();

    let fields = match fetch_with_retry(&job, provider, ctx, cancel).await {
        FetchResult::Fetched(fields) => fields,
        FetchResult::Cancelled => {
            debug!("Detail fetch for {} cancelled", listing_id);
            ctx.cache.discard(&listing_id);
            CrawlStats::incr(&ctx.stats.records_cancelled);
            return DetailOutcome::Cancelled;
        }
        FetchResult::GaveUp(error) => {
            warn!("Detail fetch for {} gave up: {}", listing_id, error);
            ctx.cache.put_fallback(&listing_id, job.geography.to_fields());
            if !ctx.config.detail.emit_partial {
                ctx.cache.discard(&listing_id);
                CrawlStats::incr(&ctx.stats.records_dropped);
                return DetailOutcome::Dropped;
            }
            return match ctx.cache.complete_partial(&listing_id) {
                Some(record) => {
                    CrawlStats::incr(&ctx.stats.records_partial);
                    emit(record, sink, ctx).await;
                    DetailOutcome::Partial
                }
                None => {
                    CrawlStats::incr(&ctx.stats.records_dropped);
                    DetailOutcome::Dropped
                }
            };
        }
    };

    ctx.cache
        .put(PartialRecord::new(listing_id.clone(), Stage::Detail, fields));
    ctx.cache.put_fallback(&listing_id, job.geography.to_fields());

    match ctx.cache.try_complete(&listing_id) {
        Some(record) => {
            CrawlStats::incr(&ctx.stats.records_completed);
            emit(record, sink, ctx).await;
            DetailOutcome::Completed
        }
        None => {
            // detail arrived for a listing whose search stage never landed
            warn!("No search-stage record for {}, completing partial", listing_id);
            match ctx.cache.complete_partial(&listing_id) {
                Some(record) if ctx.config.detail.emit_partial => {
                    CrawlStats::incr(&ctx.stats.records_partial);
                    emit(record, sink, ctx).await;
                    DetailOutcome::Partial
                }
                _ => {
                    CrawlStats::incr(&ctx.stats.records_dropped);
                    DetailOutcome::Dropped
                }
            }
        }
    }
}

async fn fetch_with_retry(
    job: &DetailJob,
    provider: &dyn DetailProvider,
    ctx: &CrawlContext,
    cancel: &CancellationToken,
) -> FetchResult {
    let limit = ctx.config.detail.retry_limit;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return FetchResult::Cancelled;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return FetchResult::Cancelled,
            result = provider.fetch_detail(&job.listing_id) => result,
        };

        let error = match result {
            Ok(fields) => return FetchResult::Fetched(fields),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= limit {
            return FetchResult::GaveUp(error);
        }

        let delay = ctx.config.detail.backoff(attempt);
        attempt += 1;
        CrawlStats::incr(&ctx.stats.detail_retries);
        warn!(
            "Retrying detail for {} in {:?} (attempt {}/{}): {}",
            job.listing_id, delay, attempt, limit, error
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return FetchResult::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn emit(record: CompletedRecord, sink: &dyn RecordSink, ctx: &CrawlContext) {
    let listing_id = record.listing_id.clone();
    let partial = record.partial;
    match sink.accept(record).await {
        Ok(()) => info!(
            "✅ Completed {}{}",
            listing_id,
            if partial { " (partial)" } else { "" }
        ),
        Err(e) => {
            warn!("Sink rejected {}: {:#}", listing_id, e);
            CrawlStats::incr(&ctx.stats.sink_failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::models::{Geography, ListingId};
    use crate::output::CollectingSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedDetail {
        responses: Mutex<VecDeque<Result<Fields, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedDetail {
        fn new(responses: Vec<Result<Fields, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DetailProvider for ScriptedDetail {
        async fn fetch_detail(&self, _listing_id: &ListingId) -> Result<Fields, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Transient("timeout".to_string())))
        }

        fn source_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn context(retry_limit: u32, emit_partial: bool) -> CrawlContext {
        let mut config = CrawlConfig::default();
        config.detail.retry_limit = retry_limit;
        config.detail.backoff_base_ms = 1;
        config.detail.emit_partial = emit_partial;
        let ctx = CrawlContext::new(config);
        ctx.cache.put(PartialRecord::new(
            ListingId::new("L1"),
            Stage::Search,
            fields(json!({"price": 100, "name": "Loft"})),
        ));
        ctx
    }

    fn job() -> DetailJob {
        DetailJob {
            listing_id: ListingId::new("L1"),
            geography: Arc::new(Geography {
                place_id: Some("P1".to_string()),
                country: Some("United States".to_string()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn fetched_detail_is_fused_and_emitted() {
        let ctx = context(0, true);
        let provider = ScriptedDetail::new(vec![Ok(fields(json!({"price": 120})))]);
        let sink = CollectingSink::new();

        let outcome = run_detail(job(), &provider, &ctx, &sink, &CancellationToken::new()).await;

        assert_eq!(outcome, DetailOutcome::Completed);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("price"), Some(&json!(120)));
        assert_eq!(records[0].get("name"), Some(&json!("Loft")));
        assert_eq!(records[0].get("country"), Some(&json!("United States")));
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_bound() {
        let ctx = context(2, true);
        let provider = ScriptedDetail::new(vec![
            Err(ProviderError::Transient("429".to_string())),
            Err(ProviderError::Transient("502".to_string())),
            Ok(fields(json!({"description": "Quiet"}))),
        ]);
        let sink = CollectingSink::new();

        let outcome = run_detail(job(), &provider, &ctx, &sink, &CancellationToken::new()).await;

        assert_eq!(outcome, DetailOutcome::Completed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.stats.snapshot().detail_retries, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_complete_partial() {
        let ctx = context(1, true);
        let provider = ScriptedDetail::new(vec![]);
        let sink = CollectingSink::new();

        let outcome = run_detail(job(), &provider, &ctx, &sink, &CancellationToken::new()).await;

        assert_eq!(outcome, DetailOutcome::Partial);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let records = sink.records();
        assert!(records[0].partial);
        assert_eq!(records[0].get("price"), Some(&json!(100)));
        assert_eq!(records[0].get("place_id"), Some(&json!("P1")));
    }

    #[tokio::test]
    async fn schema_errors_are_not_retried() {
        let ctx = context(5, true);
        let provider = ScriptedDetail::new(vec![Err(ProviderError::Schema("no pdpSections".to_string()))]);
        let sink = CollectingSink::new();

        let outcome = run_detail(job(), &provider, &ctx, &sink, &CancellationToken::new()).await;

        assert_eq!(outcome, DetailOutcome::Partial);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_records_can_be_suppressed() {
        let ctx = context(0, false);
        let provider = ScriptedDetail::new(vec![]);
        let sink = CollectingSink::new();

        let outcome = run_detail(job(), &provider, &ctx, &sink, &CancellationToken::new()).await;

        assert_eq!(outcome, DetailOutcome::Dropped);
        assert!(sink.records().is_empty());
        assert!(ctx.cache.is_empty());
        assert_eq!(ctx.stats.snapshot().records_dropped, 1);
    }

    #[tokio::test]
    async fn cancellation_discards_without_emitting() {
        let ctx = context(3, true);
        let provider = ScriptedDetail::new(vec![Ok(fields(json!({"price": 120})))]);
        let sink = CollectingSink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run_detail(job(), &provider, &ctx, &sink, &cancel).await;

        assert_eq!(outcome, DetailOutcome::Cancelled);
        assert!(sink.records().is_empty());
        assert!(ctx.cache.is_empty());
        assert_eq!(ctx.stats.snapshot().records_cancelled, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}

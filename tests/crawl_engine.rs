use async_trait::async_trait;
use serde_json::json;
use stay_scout::config::CrawlConfig;
use stay_scout::crawl::{CrawlEngine, SessionOutcome};
use stay_scout::models::{Candidate, Fields, Geography, ListingId, PriceQuote, RateQualifier};
use stay_scout::output::CollectingSink;
use stay_scout::planner::{Query, Subquery};
use stay_scout::scrapers::{Cursor, DetailProvider, SearchPage, SearchProvider};
use stay_scout::ProviderError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type PageFn = dyn Fn(&Subquery, usize) -> Result<SearchPage, ProviderError> + Send + Sync;

/// Tracks how many calls are running at once
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct MockSearch {
    pages: Box<PageFn>,
    delay: Duration,
    requests: Mutex<Vec<(usize, usize)>>,
    gauge: Gauge,
}

impl MockSearch {
    fn new(pages: impl Fn(&Subquery, usize) -> Result<SearchPage, ProviderError> + Send + Sync + 'static) -> Self {
        Self {
            pages: Box::new(pages),
            delay: Duration::from_millis(0),
            requests: Mutex::new(Vec::new()),
            gauge: Gauge::default(),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn requests(&self) -> Vec<(usize, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, subquery: &Subquery, cursor: Option<&Cursor>) -> Result<SearchPage, ProviderError> {
        let page = cursor
            .and_then(|c| c.value().as_u64())
            .map(|n| n as usize)
            .unwrap_or(0);
        self.requests.lock().unwrap().push((subquery.index, page));

        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();

        (self.pages)(subquery, page)
    }

    fn source_name(&self) -> &'static str {
        "mock-search"
    }
}

struct MockDetail {
    calls: Mutex<HashMap<String, usize>>,
    failing: Vec<String>,
    delay: Duration,
    gauge: Gauge,
}

impl MockDetail {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            failing: Vec::new(),
            delay: Duration::from_millis(0),
            gauge: Gauge::default(),
        }
    }

    fn failing_for(mut self, id: &str) -> Self {
        self.failing.push(id.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DetailProvider for MockDetail {
    async fn fetch_detail(&self, listing_id: &ListingId) -> Result<Fields, ProviderError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(listing_id.as_str().to_string())
            .or_default() += 1;

        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();

        if self.failing.iter().any(|id| id == listing_id.as_str()) {
            return Err(ProviderError::Transient("503".to_string()));
        }
        Ok(json!({
            "description": format!("Detail for {}", listing_id),
            "price": 999
        })
        .as_object()
        .cloned()
        .unwrap())
    }

    fn source_name(&self) -> &'static str {
        "mock-detail"
    }
}

fn geography() -> Geography {
    Geography {
        place_id: Some("P-X".to_string()),
        city: Some("X".to_string()),
        country: Some("Nowhere".to_string()),
        ..Default::default()
    }
}

fn nightly(id: &str, rate: f64) -> Candidate {
    let fields = json!({"name": format!("Listing {}", id), "price": rate, "city": "Search city"})
        .as_object()
        .cloned()
        .unwrap();
    Candidate::new(
        ListingId::new(id),
        fields,
        Some(PriceQuote::new(rate, RateQualifier::Night)),
    )
}

fn test_config() -> CrawlConfig {
    let mut config = CrawlConfig::default();
    config.detail.backoff_base_ms = 1;
    config
}

fn engine(search: Arc<MockSearch>, detail: Arc<MockDetail>, sink: Arc<CollectingSink>, config: CrawlConfig) -> CrawlEngine {
    CrawlEngine::new(search, detail, sink, config)
}

#[tokio::test]
async fn shared_listing_is_fetched_and_emitted_once() {
    let search = Arc::new(MockSearch::new(|subquery, _| {
        let candidates = match subquery.neighborhood.as_deref() {
            Some("North") => vec![nightly("L1", 50.0), nightly("L2", 60.0)],
            _ => vec![nightly("L1", 50.0), nightly("L3", 70.0)],
        };
        Ok(SearchPage::last(candidates, Some(geography())))
    }));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_neighborhoods(vec!["North".to_string(), "South".to_string()]);
    let report = engine(Arc::clone(&search), Arc::clone(&detail), Arc::clone(&sink), test_config())
        .run(&query)
        .await
        .unwrap();

    assert_eq!(report.issued(), 2);
    assert_eq!(report.exhausted(), 2);
    assert_eq!(detail.calls_for("L1"), 1);
    assert_eq!(detail.total_calls(), 3);

    let records = sink.records();
    assert_eq!(records.len(), 3);
    let l1: Vec<_> = records.iter().filter(|r| r.listing_id.as_str() == "L1").collect();
    assert_eq!(l1.len(), 1);
    assert!(!l1[0].partial);
    // detail wins over search, search fills the rest, geography fills gaps
    assert_eq!(l1[0].get("price"), Some(&json!(999)));
    assert_eq!(l1[0].get("name"), Some(&json!("Listing L1")));
    assert_eq!(l1[0].get("city"), Some(&json!("Search city")));
    assert_eq!(l1[0].get("place_id"), Some(&json!("P-X")));

    assert_eq!(report.stats.listings_discovered, 4);
    assert_eq!(report.stats.listings_duplicate, 1);
    assert_eq!(report.stats.records_completed, 3);
    assert_eq!(report.stats.settled(), report.stats.listings_discovered);
}

#[tokio::test]
async fn ranged_checkin_runs_eight_sessions_in_plan_order() {
    let search = Arc::new(MockSearch::new(|subquery, _| {
        let id = format!("L-{}", subquery.index);
        Ok(SearchPage::last(vec![nightly(&id, 40.0)], Some(geography())))
    }));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_dates("2024-01-01+5-2", "2024-01-10").unwrap();
    let report = engine(Arc::clone(&search), detail, Arc::clone(&sink), test_config())
        .run(&query)
        .await
        .unwrap();

    assert_eq!(report.issued(), 8);
    let checkins: Vec<String> = report
        .subqueries
        .iter()
        .map(|r| r.subquery.checkin.unwrap().to_string())
        .collect();
    assert_eq!(checkins.first().map(String::as_str), Some("2023-12-30"));
    assert_eq!(checkins.last().map(String::as_str), Some("2024-01-06"));
    assert!(report
        .subqueries
        .iter()
        .all(|r| r.subquery.checkout.unwrap().to_string() == "2024-01-10"));
    assert_eq!(sink.records().len(), 8);
    assert_eq!(search.requests().len(), 8);
}

#[tokio::test]
async fn failed_session_does_not_stop_siblings() {
    let search = Arc::new(MockSearch::new(|subquery, _| match subquery.neighborhood.as_deref() {
        Some("Broken") => Err(ProviderError::Schema("exploreV3 missing".to_string())),
        _ => Ok(SearchPage::last(vec![nightly("L1", 50.0)], Some(geography()))),
    }));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_neighborhoods(vec!["Broken".to_string(), "Fine".to_string()]);
    let report = engine(search, detail, Arc::clone(&sink), test_config())
        .run(&query)
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.exhausted(), 1);
    assert!(matches!(report.subqueries[0].outcome, SessionOutcome::Failed { .. }));
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn panicking_session_is_still_reported() {
    let search = Arc::new(MockSearch::new(|subquery, _| {
        if subquery.neighborhood.as_deref() == Some("Cursed") {
            panic!("provider bug");
        }
        Ok(SearchPage::last(vec![nightly("L1", 50.0)], Some(geography())))
    }));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_neighborhoods(vec![
        "Fine".to_string(),
        "Cursed".to_string(),
        "Also fine".to_string(),
    ]);
    let report = engine(search, detail, Arc::clone(&sink), test_config())
        .run(&query)
        .await
        .unwrap();

    assert_eq!(report.issued(), 3);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.subqueries[1].subquery.neighborhood.as_deref(), Some("Cursed"));
    assert!(matches!(report.subqueries[1].outcome, SessionOutcome::Failed { .. }));
    assert!(report.subqueries.iter().enumerate().all(|(i, r)| r.subquery.index == i));
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn sessions_page_in_order_and_stop_at_page_limit() {
    let search = Arc::new(MockSearch::new(|subquery, page| {
        let id = format!("L-{}-{}", subquery.index, page);
        let cursor = Cursor::new(json!(page + 1));
        Ok(SearchPage::with_next(vec![nightly(&id, 40.0)], Some(geography()), cursor))
    }));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let mut config = test_config();
    config.session.max_pages = 3;
    let report = engine(Arc::clone(&search), detail, Arc::clone(&sink), config)
        .run(&Query::new("X"))
        .await
        .unwrap();

    assert_eq!(report.truncated(), 1);
    assert_eq!(report.subqueries[0].pages, 3);
    assert_eq!(search.requests(), vec![(0, 0), (0, 1), (0, 2)]);
    assert_eq!(sink.records().len(), 3);
}

#[tokio::test]
async fn nightly_quotes_over_monthly_budget_are_rejected() {
    let search = Arc::new(MockSearch::new(|_, _| {
        Ok(SearchPage::last(
            vec![nightly("cheap", 50.0), nightly("pricey", 100.0)],
            Some(geography()),
        ))
    }));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_prices(None, Some(2000));
    let report = engine(search, Arc::clone(&detail), Arc::clone(&sink), test_config())
        .run(&query)
        .await
        .unwrap();

    assert_eq!(report.stats.listings_rejected, 1);
    assert_eq!(detail.calls_for("pricey"), 0);
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("monthly_price_estimate"), Some(&json!(1400.0)));
}

#[tokio::test]
async fn failed_detail_emits_partial_record() {
    let search = Arc::new(MockSearch::new(|_, _| {
        Ok(SearchPage::last(vec![nightly("L1", 50.0)], Some(geography())))
    }));
    let detail = Arc::new(MockDetail::new().failing_for("L1"));
    let sink = Arc::new(CollectingSink::new());

    let mut config = test_config();
    config.detail.retry_limit = 2;
    let report = engine(search, Arc::clone(&detail), Arc::clone(&sink), config)
        .run(&Query::new("X"))
        .await
        .unwrap();

    assert_eq!(detail.calls_for("L1"), 3);
    assert_eq!(report.stats.records_partial, 1);
    let records = sink.records();
    assert!(records[0].partial);
    assert_eq!(records[0].get("price"), Some(&json!(50.0)));
    assert_eq!(records[0].get("country"), Some(&json!("Nowhere")));
}

#[tokio::test]
async fn cancelled_crawl_emits_nothing_half_done() {
    let search = Arc::new(
        MockSearch::new(|subquery, _| {
            let id = format!("L-{}", subquery.index);
            Ok(SearchPage::last(vec![nightly(&id, 40.0)], Some(geography())))
        })
        .with_delay(Duration::from_millis(20)),
    );
    let detail = Arc::new(MockDetail::new().with_delay(Duration::from_secs(30)));
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_dates("2024-01-01+-1", "2024-01-10").unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        engine(search, detail, Arc::clone(&sink), test_config()).run_with_cancellation(&query, cancel),
    )
    .await
    .expect("cancelled crawl should wind down promptly")
    .unwrap();

    assert!(report.cancelled);
    assert!(sink.records().is_empty());
    assert_eq!(report.stats.records_completed, 0);
    assert_eq!(report.stats.records_partial, 0);
    assert_eq!(report.stats.records_cancelled, 3);
    assert_eq!(report.stats.settled(), report.stats.listings_discovered);
}

#[tokio::test]
async fn concurrency_limits_are_respected() {
    let search = Arc::new(
        MockSearch::new(|subquery, _| {
            let ids: Vec<Candidate> = (0..3)
                .map(|n| nightly(&format!("L-{}-{}", subquery.index, n), 40.0))
                .collect();
            Ok(SearchPage::last(ids, Some(geography())))
        })
        .with_delay(Duration::from_millis(10)),
    );
    let detail = Arc::new(MockDetail::new().with_delay(Duration::from_millis(10)));
    let sink = Arc::new(CollectingSink::new());

    let mut config = test_config();
    config.concurrency.sessions = 2;
    config.concurrency.detail_fetches = 3;

    let query = Query::new("X").with_dates("2024-01-01+-2", "2024-01-10").unwrap();
    let report = engine(Arc::clone(&search), Arc::clone(&detail), Arc::clone(&sink), config)
        .run(&query)
        .await
        .unwrap();

    assert_eq!(report.issued(), 5);
    assert_eq!(sink.records().len(), 15);
    assert!(search.gauge.peak() <= 2);
    assert!(detail.gauge.peak() <= 3);
}

#[tokio::test]
async fn invalid_date_order_aborts_before_any_request() {
    let search = Arc::new(MockSearch::new(|_, _| Ok(SearchPage::default())));
    let detail = Arc::new(MockDetail::new());
    let sink = Arc::new(CollectingSink::new());

    let query = Query::new("X").with_dates("2024-01-10", "2024-01-05").unwrap();
    let result = engine(Arc::clone(&search), detail, sink, test_config())
        .run(&query)
        .await;

    assert!(matches!(
        result,
        Err(stay_scout::CrawlError::InvalidDateOrder { .. })
    ));
    assert!(search.requests().is_empty());
}

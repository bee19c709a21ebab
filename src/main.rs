use anyhow::{Context, Result};
use clap::Parser;
use stay_scout::config::CrawlConfig;
use stay_scout::output::JsonLinesSink;
use stay_scout::planner::Query;
use stay_scout::scrapers::{ExploreSearchClient, PdpSectionsClient};
use stay_scout::CrawlEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Crawl stay listings for a place and write one fused record per listing
#[derive(Debug, Parser)]
#[command(name = "stay-scout", version)]
struct Args {
    /// Place to search, e.g. "Austin, TX"
    place: String,

    /// Checkin date: YYYY-MM-DD, optionally with +-N or +A-B day spreads
    #[arg(long)]
    checkin: Option<String>,

    /// Checkout date, same format as --checkin
    #[arg(long)]
    checkout: Option<String>,

    #[arg(long)]
    min_price: Option<u32>,

    #[arg(long)]
    max_price: Option<u32>,

    /// Neighborhood to search separately (repeatable)
    #[arg(long = "neighborhood")]
    neighborhoods: Vec<String>,

    /// Room type filter, e.g. "Entire home/apt" (repeatable)
    #[arg(long = "room-type")]
    room_types: Vec<String>,

    #[arg(long)]
    currency: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON lines output file
    #[arg(long, default_value = "records.jsonl")]
    output: PathBuf,

    /// Also write each record to <raw-dir>/<listing id>.json
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stay_scout=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CrawlConfig::load(path)?,
        None => CrawlConfig::from_env()?,
    };
    if let Some(currency) = &args.currency {
        config.provider.currency = currency.clone();
    }

    let mut query = Query::new(&args.place)
        .with_prices(args.min_price, args.max_price)
        .with_neighborhoods(args.neighborhoods.clone())
        .with_currency(config.provider.currency.clone());
    match (&args.checkin, &args.checkout) {
        (Some(checkin), Some(checkout)) => query = query.with_dates(checkin, checkout)?,
        (None, None) => {}
        _ => return Err(stay_scout::CrawlError::IncompleteDates.into()),
    }

    info!("🏠 Stay Scout");
    info!("==========================================");

    let search = ExploreSearchClient::new(&config.provider)?.with_room_types(args.room_types.clone());
    let detail = PdpSectionsClient::new(&config.provider)?;
    let sink = JsonLinesSink::create(&args.output, args.raw_dir.clone()).await?;

    let engine = CrawlEngine::new(Arc::new(search), Arc::new(detail), Arc::new(sink), config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, winding down in-flight work");
            ctrl_c.cancel();
        }
    });

    let report = engine.run_with_cancellation(&query, cancel).await?;

    info!(
        "💾 Wrote {} record(s) to {}",
        (report.stats.records_completed + report.stats.records_partial)
            .saturating_sub(report.stats.sink_failures),
        args.output.display()
    );

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("💾 Saved run report to {}", path.display());
    }

    Ok(())
}

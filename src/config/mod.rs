//! Crawl configuration
//!
//! Every key is optional; a missing file section falls back to the defaults
//! below. `STAY_SCOUT_API_KEY` and `STAY_SCOUT_BASE_URL` override the file.

use crate::error::{CrawlError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub planner: PlannerConfig,
    pub rates: RatesConfig,
    pub session: SessionConfig,
    pub detail: DetailConfig,
    pub concurrency: ConcurrencyConfig,
    pub provider: ProviderConfig,
}

/// How the query's price constraints are split into subqueries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceBanding {
    Single,
    Sliced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub price_banding: PriceBanding,
    pub price_increment: u32,
    /// Upper bound for sliced bands when the query has no ceiling
    pub default_max_price: u32,
    /// Widest checkin/checkout tolerance a query may ask for, in days
    pub max_tolerance_days: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            price_banding: PriceBanding::Single,
            price_increment: 100,
            default_max_price: 3000,
            max_tolerance_days: 31,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Ceilings above this are treated as monthly budgets
    pub monthly_budget_threshold: f64,
    pub nights_per_month: f64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            monthly_budget_threshold: 1000.0,
            nights_per_month: 28.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_pages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_pages: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    pub retry_limit: u32,
    pub backoff_base_ms: u64,
    /// Emit listings whose detail fetch permanently failed, flagged partial
    pub emit_partial: bool,
}

impl DetailConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            backoff_base_ms: 500,
            emit_partial: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub sessions: usize,
    pub detail_fetches: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            sessions: 4,
            detail_fetches: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub currency: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Reviews requested per PdpReviews call; 0 skips reviews entirely
    pub review_page_size: u32,
    /// Stop collecting a listing's reviews after this many
    pub max_reviews: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.airbnb.com".to_string(),
            api_key: None,
            currency: "USD".to_string(),
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            review_page_size: 50,
            max_reviews: 500,
        }
    }
}

impl CrawlConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CrawlError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CrawlError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;

        let mut config: CrawlConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("STAY_SCOUT_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("STAY_SCOUT_BASE_URL") {
            self.provider.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.concurrency.sessions == 0 {
            problems.push("concurrency.sessions must be at least 1");
        }
        if self.concurrency.detail_fetches == 0 {
            problems.push("concurrency.detail_fetches must be at least 1");
        }
        if self.planner.price_increment == 0 {
            problems.push("planner.price_increment must be positive");
        }
        if self.rates.nights_per_month <= 0.0 {
            problems.push("rates.nights_per_month must be positive");
        }
        if self.session.max_pages == 0 {
            problems.push("session.max_pages must be at least 1");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CrawlError::Config(problems.join("; ")))
        }
    }
}

//! Query planning
//!
//! Expands one [`Query`] into the ordered, finite list of [`Subquery`] values
//! that are crawled as independent search sessions. Dates vary slowest, then
//! price bands, then neighborhoods, so identical queries always plan to the
//! same sequence.

pub mod dates;

pub use dates::DateRangeSpec;

use crate::config::{PlannerConfig, PriceBanding};
use crate::error::{CrawlError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user query, fixed for the lifetime of a crawl run
#[derive(Debug, Clone)]
pub struct Query {
    pub place: String,
    pub checkin: Option<DateRangeSpec>,
    pub checkout: Option<DateRangeSpec>,
    pub min_price: Option<u32>,
    pub max_price: Option<u32>,
    pub neighborhoods: Vec<String>,
    pub currency: String,
}

impl Query {
    pub fn new(place: impl Into<String>) -> Self {
        Self {
            place: place.into(),
            checkin: None,
            checkout: None,
            min_price: None,
            max_price: None,
            neighborhoods: Vec::new(),
            currency: "USD".to_string(),
        }
    }

    /// Set checkin/checkout from their textual range specs
    pub fn with_dates(mut self, checkin: &str, checkout: &str) -> Result<Self> {
        self.checkin = Some(checkin.parse()?);
        self.checkout = Some(checkout.parse()?);
        Ok(self)
    }

    pub fn with_prices(mut self, min_price: Option<u32>, max_price: Option<u32>) -> Self {
        self.min_price = min_price;
        self.max_price = max_price;
        self
    }

    pub fn with_neighborhoods(mut self, neighborhoods: Vec<String>) -> Self {
        self.neighborhoods = neighborhoods;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

/// Price constraint sent with one subquery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// One concrete, independently crawlable slice of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subquery {
    pub index: usize,
    pub place: String,
    pub checkin: Option<NaiveDate>,
    pub checkout: Option<NaiveDate>,
    pub price: PriceBand,
    pub neighborhood: Option<String>,
    pub currency: String,
    /// The query's overall ceiling, which may be wider than `price.max`
    pub budget_ceiling: Option<u32>,
}

impl fmt::Display for Subquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.place)?;
        if let (Some(checkin), Some(checkout)) = (self.checkin, self.checkout) {
            write!(f, " {}..{}", checkin, checkout)?;
        }
        match (self.price.min, self.price.max) {
            (None, None) => {}
            (min, max) => write!(
                f,
                " {}-{} {}",
                min.unwrap_or(0),
                max.map(|m| m.to_string()).unwrap_or_default(),
                self.currency
            )?,
        }
        if let Some(neighborhood) = &self.neighborhood {
            write!(f, " [{}]", neighborhood)?;
        }
        Ok(())
    }
}

/// Expand a query into its subqueries
pub fn plan(query: &Query, config: &PlannerConfig) -> Result<Vec<Subquery>> {
    let date_pairs = date_pairs(query, config.max_tolerance_days)?;
    let bands = price_bands(query, config);
    let neighborhoods: Vec<Option<String>> = if query.neighborhoods.is_empty() {
        vec![None]
    } else {
        query.neighborhoods.iter().cloned().map(Some).collect()
    };

    let mut subqueries = Vec::with_capacity(date_pairs.len() * bands.len() * neighborhoods.len());
    for (checkin, checkout) in &date_pairs {
        for band in &bands {
            for neighborhood in &neighborhoods {
                subqueries.push(Subquery {
                    index: subqueries.len(),
                    place: query.place.clone(),
                    checkin: *checkin,
                    checkout: *checkout,
                    price: *band,
                    neighborhood: neighborhood.clone(),
                    currency: query.currency.clone(),
                    budget_ceiling: query.max_price,
                });
            }
        }
    }

    Ok(subqueries)
}

type DatePair = (Option<NaiveDate>, Option<NaiveDate>);

fn date_pairs(query: &Query, max_tolerance_days: u32) -> Result<Vec<DatePair>> {
    let (checkin, checkout) = match (&query.checkin, &query.checkout) {
        (None, None) => return Ok(vec![(None, None)]),
        (Some(checkin), Some(checkout)) => (checkin, checkout),
        _ => return Err(CrawlError::IncompleteDates),
    };

    for spec in [checkin, checkout] {
        if spec.tolerance() > max_tolerance_days {
            return Err(CrawlError::InvalidRangeSpec {
                spec: spec.to_string(),
                reason: format!("tolerance exceeds {} days", max_tolerance_days),
            });
        }
    }

    let checkin_days = checkin.days();
    let checkout_days = checkout.days();

    let mut pairs = Vec::with_capacity(checkin_days.len() * checkout_days.len());
    for checkin in &checkin_days {
        for checkout in &checkout_days {
            if checkout <= checkin {
                return Err(CrawlError::InvalidDateOrder {
                    checkin: *checkin,
                    checkout: *checkout,
                });
            }
            pairs.push((Some(*checkin), Some(*checkout)));
        }
    }

    Ok(pairs)
}

fn price_bands(query: &Query, config: &PlannerConfig) -> Vec<PriceBand> {
    let single = PriceBand {
        min: query.min_price,
        max: query.max_price,
    };

    if config.price_banding == PriceBanding::Single {
        return vec![single];
    }

    let floor = query.min_price.unwrap_or(0);
    let ceiling = query.max_price.unwrap_or(config.default_max_price);
    let increment = config.price_increment.max(1);
    if floor >= ceiling {
        return vec![single];
    }

    let mut bands = Vec::new();
    let mut low = floor;
    while low < ceiling {
        let high = low.saturating_add(increment).min(ceiling);
        bands.push(PriceBand {
            min: Some(low),
            max: Some(high),
        });
        low = high;
    }
    bands
}

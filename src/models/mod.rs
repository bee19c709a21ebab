use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field map describing one listing
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Upstream listing identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListingId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Crawl stage that produced a partial record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Search,
    Detail,
}

/// Place metadata reported on the first page of a search
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Geography {
    pub place_id: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
}

impl Geography {
    /// Geography as record fields, skipping unknown values
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        let entries = [
            ("place_id", &self.place_id),
            ("city", &self.city),
            ("state", &self.state),
            ("province", &self.province),
            ("country", &self.country),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                fields.insert(key.to_string(), value.clone().into());
            }
        }
        fields
    }
}

/// Granularity a quoted rate is expressed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateQualifier {
    Night,
    Week,
    Month,
    Other(String),
}

impl RateQualifier {
    /// Parse the qualifier label shown next to a price ("night", "/ month", ...)
    pub fn parse(label: &str) -> Self {
        let label = label.trim().trim_start_matches('/').trim().to_lowercase();
        match label.as_str() {
            "night" | "nightly" => RateQualifier::Night,
            "week" | "weekly" => RateQualifier::Week,
            "month" | "monthly" => RateQualifier::Month,
            _ => RateQualifier::Other(label),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            RateQualifier::Night => "night",
            RateQualifier::Week => "week",
            RateQualifier::Month => "month",
            RateQualifier::Other(label) => label,
        }
    }
}

/// Price shown for a listing on a search page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Rate amount; absent when the listing needs dates to show a rate
    pub amount: Option<f64>,
    pub qualifier: Option<RateQualifier>,
    pub total: Option<i64>,
}

impl PriceQuote {
    pub fn new(amount: f64, qualifier: RateQualifier) -> Self {
        Self {
            amount: Some(amount),
            qualifier: Some(qualifier),
            total: None,
        }
    }
}

/// Field map for one listing, tagged with the stage that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialRecord {
    pub listing_id: ListingId,
    pub stage: Stage,
    pub fields: Fields,
}

impl PartialRecord {
    pub fn new(listing_id: ListingId, stage: Stage, fields: Fields) -> Self {
        Self {
            listing_id,
            stage,
            fields,
        }
    }
}

/// A listing surfaced by a search page, before dedup and detail fetch
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: PartialRecord,
    pub quote: Option<PriceQuote>,
}

impl Candidate {
    pub fn new(listing_id: ListingId, fields: Fields, quote: Option<PriceQuote>) -> Self {
        Self {
            record: PartialRecord::new(listing_id, Stage::Search, fields),
            quote,
        }
    }

    pub fn listing_id(&self) -> &ListingId {
        &self.record.listing_id
    }
}

/// Fused record ready for downstream filtering and export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub listing_id: ListingId,
    pub fields: Fields,
    /// Set when the detail stage never contributed
    pub partial: bool,
    pub completed_at: DateTime<Utc>,
}

impl CompletedRecord {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

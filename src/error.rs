use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a crawl run before or while it is being planned
#[derive(Error, Debug)]
pub enum CrawlError {
    /// A date tolerance expression could not be parsed
    #[error("Invalid date range spec '{spec}': {reason}")]
    InvalidRangeSpec { spec: String, reason: String },

    /// A resolved checkout is not after its checkin
    #[error("Checkout {checkout} must be after checkin {checkin}")]
    InvalidDateOrder {
        checkin: chrono::NaiveDate,
        checkout: chrono::NaiveDate,
    },

    /// Only one of checkin/checkout was supplied
    #[error("Checkin and checkout must be given together")]
    IncompleteDates,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures reported by a search or detail provider
///
/// `Transient` failures have already been retried by the transport where it
/// does so; the detail step may retry them again within its own bound.
/// `Schema` covers every failure that retrying cannot fix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Unexpected payload: {0}")]
    Schema(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Result type for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

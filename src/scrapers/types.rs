use crate::models::{Candidate, Geography};
use serde::{Deserialize, Serialize};

/// Continuation token returned by a search provider
///
/// The crawl engine hands it back verbatim on the next request and never
/// looks inside; offsets and session tokens are both just JSON here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(serde_json::Value);

impl Cursor {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// One parsed page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub candidates: Vec<Candidate>,
    /// Place metadata; required on the first page of a session
    pub geography: Option<Geography>,
    pub has_more: bool,
    pub next_cursor: Option<Cursor>,
}

impl SearchPage {
    /// Final page with the given candidates
    pub fn last(candidates: Vec<Candidate>, geography: Option<Geography>) -> Self {
        Self {
            candidates,
            geography,
            has_more: false,
            next_cursor: None,
        }
    }

    /// Page followed by another one reachable through `cursor`
    pub fn with_next(candidates: Vec<Candidate>, geography: Option<Geography>, cursor: Cursor) -> Self {
        Self {
            candidates,
            geography,
            has_more: true,
            next_cursor: Some(cursor),
        }
    }
}

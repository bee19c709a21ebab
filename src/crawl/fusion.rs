//! Listing fusion cache
//!
//! Holds the partial records of listings that are between search discovery
//! and detail completion. Detail values win over search values field by
//! field; fields only one stage knows about are kept. An entry leaves the
//! cache the moment it completes.

use crate::models::{CompletedRecord, Fields, ListingId, PartialRecord, Stage};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Entry {
    fields: Fields,
    detail_keys: HashSet<String>,
    has_search: bool,
    has_detail: bool,
}

impl Entry {
    fn merge(&mut self, record: PartialRecord) {
        match record.stage {
            Stage::Search => {
                self.has_search = true;
                for (key, value) in record.fields {
                    if !self.detail_keys.contains(&key) {
                        self.fields.insert(key, value);
                    }
                }
            }
            Stage::Detail => {
                self.has_detail = true;
                for (key, value) in record.fields {
                    self.detail_keys.insert(key.clone());
                    self.fields.insert(key, value);
                }
            }
        }
    }

    fn into_record(self, listing_id: ListingId, partial: bool) -> CompletedRecord {
        let mut fields = self.fields;
        fields
            .entry("id")
            .or_insert_with(|| listing_id.as_str().into());

        CompletedRecord {
            listing_id,
            fields,
            partial,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FusionCache {
    entries: Mutex<HashMap<ListingId, Entry>>,
}

impl FusionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListingId, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge a partial record into the entry for its listing
    pub fn put(&self, record: PartialRecord) {
        debug!(
            "Merging {:?} record for {} ({} fields)",
            record.stage,
            record.listing_id,
            record.fields.len()
        );
        self.lock()
            .entry(record.listing_id.clone())
            .or_default()
            .merge(record);
    }

    /// Add fields only where no stage has supplied a value yet
    ///
    /// Returns false when the listing has no entry.
    pub fn put_fallback(&self, listing_id: &ListingId, fields: Fields) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(listing_id) else {
            return false;
        };
        for (key, value) in fields {
            entry.fields.entry(key).or_insert(value);
        }
        true
    }

    /// Take the fused record once both stages have contributed
    pub fn try_complete(&self, listing_id: &ListingId) -> Option<CompletedRecord> {
        let mut entries = self.lock();
        let ready = entries
            .get(listing_id)
            .map(|entry| entry.has_search && entry.has_detail)
            .unwrap_or(false);
        if !ready {
            return None;
        }
        entries
            .remove(listing_id)
            .map(|entry| entry.into_record(listing_id.clone(), false))
    }

    /// Complete with whatever is available, flagged partial
    pub fn complete_partial(&self, listing_id: &ListingId) -> Option<CompletedRecord> {
        self.lock().remove(listing_id).map(|entry| {
            let partial = !(entry.has_search && entry.has_detail);
            entry.into_record(listing_id.clone(), partial)
        })
    }

    /// Drop an entry without emitting it
    pub fn discard(&self, listing_id: &ListingId) -> bool {
        self.lock().remove(listing_id).is_some()
    }

    /// Listings currently in flight
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

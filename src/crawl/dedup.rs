use crate::models::ListingId;
use std::collections::HashSet;
use std::sync::Mutex;

/// Listing IDs already dispatched for detail fetch in this run
///
/// Only grows. Shared by every search session of a run.
#[derive(Debug, Default)]
pub struct SeenSet {
    ids: Mutex<HashSet<ListingId>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` and return true if nobody has claimed it before
    pub fn try_claim(&self, id: &ListingId) -> bool {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if ids.contains(id) {
            return false;
        }
        ids.insert(id.clone())
    }

    pub fn contains(&self, id: &ListingId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

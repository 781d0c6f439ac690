//! In-memory cache of historical snapshots, keyed by rounded timestamp and feed

use std::collections::BTreeMap;

use crate::types::SignedDataPackage;

/// Snapshot packages per `(rounded_timestamp_ms, data_feed_id)`.
///
/// Entries are ordered by timestamp so eviction is a single split.
#[derive(Debug, Default, Clone)]
pub struct SnapshotCache {
    entries: BTreeMap<(u64, String), Vec<SignedDataPackage>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, timestamp_ms: u64, data_feed_id: &str) -> Option<&[SignedDataPackage]> {
        self.entries
            .get(&(timestamp_ms, data_feed_id.to_string()))
            .map(Vec::as_slice)
    }

    pub fn insert(&mut self, timestamp_ms: u64, data_feed_id: impl Into<String>, packages: Vec<SignedDataPackage>) {
        self.entries.insert((timestamp_ms, data_feed_id.into()), packages);
    }

    /// Drop every entry with a timestamp before `cutoff_ms`; returns how many went.
    pub fn evict_older_than(&mut self, cutoff_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries = self.entries.split_off(&(cutoff_ms, String::new()));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

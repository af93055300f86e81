//! The cached standings entry and its staleness rule.

use chrono::{DateTime, TimeDelta, Utc};
use common::{Dataset, Snapshot};

/// One successful fetch: the table and when it was taken.
///
/// Entries are never mutated; a refresh swaps in a whole new entry so a
/// reader always gets a dataset and timestamp from the same fetch.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub dataset: Dataset,
    pub fetched_at: DateTime<Utc>,
    /// Count of successful refreshes up to and including this one.
    pub generation: u64,
}

impl CacheEntry {
    pub fn new(dataset: Dataset, fetched_at: DateTime<Utc>, generation: u64) -> Self {
        Self {
            dataset,
            fetched_at,
            generation,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.fetched_at
    }

    pub fn is_stale(&self, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
        self.age(now) > ttl
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            updated_at: Some(self.fetched_at),
            rankings: self.dataset.clone(),
        }
    }
}

/// Staleness of an optional entry: no entry at all is always stale.
pub fn is_stale(entry: Option<&CacheEntry>, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
    match entry {
        Some(entry) => entry.is_stale(ttl, now),
        None => true,
    }
}

//! Refresh outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Point-in-time copy of the refresh counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Refreshes that won the in-flight flag and ran a fetch.
    pub started: u64,
    /// Refreshes that replaced the cached entry.
    pub updated: u64,
    /// Fetches that succeeded with zero rows.
    pub empty: u64,
    /// Fetches that errored or panicked.
    pub failed: u64,
    /// Trigger requests dropped because a refresh was already running.
    pub coalesced: u64,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    started: AtomicU64,
    updated: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
    coalesced: AtomicU64,
    last: Mutex<LastAttempt>,
}

#[derive(Debug, Default)]
struct LastAttempt {
    error: Option<String>,
    at: Option<DateTime<Utc>>,
}

impl StatsCounters {
    pub(crate) fn record_start(&self, at: DateTime<Utc>) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.last().at = Some(at);
    }

    pub(crate) fn record_updated(&self) -> u64 {
        self.last().error = None;
        self.updated.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, error: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.last().error = Some(error);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RefreshStats {
        let last = self.last();
        RefreshStats {
            started: self.started.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            last_error: last.error.clone(),
            last_attempt_at: last.at,
        }
    }

    fn last(&self) -> std::sync::MutexGuard<'_, LastAttempt> {
        // Only plain field writes happen under this lock, so a poisoned
        // guard still holds consistent data.
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

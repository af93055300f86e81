//! Standings data types shared across crates.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// One row of the league table, exactly as scraped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub rank: String,
    pub team_name: String,
    /// Emblem image URL (empty when the page had none).
    pub logo: String,
    /// Games behind the leader.
    pub gb: String,
    pub wins: String,
    pub draws: String,
    pub losses: String,
}

/// Ordered, immutable set of team records from one fetch.
///
/// Cloning is cheap (shared `Arc`), so readers can hold on to a dataset
/// while the cache moves on to a newer one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset(Arc<Vec<TeamRecord>>);

impl Dataset {
    pub fn new(teams: Vec<TeamRecord>) -> Self {
        Self(Arc::new(teams))
    }

    /// The "not ready yet" dataset.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn teams(&self) -> &[TeamRecord] {
        &self.0
    }

    /// True when both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Dataset) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Dataset {
    type Target = [TeamRecord];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<TeamRecord>> for Dataset {
    fn from(teams: Vec<TeamRecord>) -> Self {
        Self::new(teams)
    }
}

impl FromIterator<TeamRecord> for Dataset {
    fn from_iter<I: IntoIterator<Item = TeamRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.teams().serialize(serializer)
    }
}

/// JSON body handed to consumers: when the table was fetched, and the table.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub updated_at: Option<DateTime<Utc>>,
    pub rankings: Dataset,
}

impl Snapshot {
    pub fn is_ready(&self) -> bool {
        !self.rankings.is_empty()
    }
}

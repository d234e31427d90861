use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest-modification status for one user's device data, as reported by the
/// data platform. `None` from the fetcher (not a field here) means the user
/// has no qualifying data at all, which is distinct from "no new data".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLastUpdated {
    /// Earliest reading time among records modified since the query cutoff.
    /// `None` means nothing changed since then.
    pub earliest_modified: Option<DateTime<Utc>>,
    pub first_data: DateTime<Utc>,
    pub last_data: DateTime<Utc>,
    pub last_upload: DateTime<Utc>,
    /// Cutoff the summary should record as its own `last_updated_date` once
    /// this status has been fully applied.
    pub next_last_updated: DateTime<Utc>,
}

/// Half-open `(start, end]` time filter for raw record fetches. A `None`
/// start means unbounded history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl DataRange {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        let after_start = match self.start {
            Some(start) => time > start,
            None => true,
        };
        after_start && time <= self.end
    }
}

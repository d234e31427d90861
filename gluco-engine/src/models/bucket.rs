use gluco_shared::record::DeviceRecord;
use gluco_shared::types::SummaryKind;
use mongodb::bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{SummaryError, SummaryResult};
use crate::models::ranges::{ContinuousRanges, GlucoseRanges, RangesData};
use crate::util::time::{MILLIS_PER_MINUTE, to_bson, truncate_hour};

/// Correctness guard against malformed high-frequency uploads: one reading
/// per minute is the densest legitimate stream for an hourly bucket.
pub const MAX_RECORDS_PER_BUCKET: i64 = 60;

/// Slack allowed below a sensor's reporting interval before a reading is
/// treated as a duplicate transmission.
pub const DEDUP_GRACE_MILLIS: i64 = 10_000;

/// Per-hour aggregate payload for one summary flavor.
pub trait BucketData:
    Clone
    + Default
    + std::fmt::Debug
    + PartialEq
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + Unpin
    + 'static
{
    type Ranges: RangesData;

    /// Classify and fold one accepted record.
    fn fold(&mut self, record: &DeviceRecord);

    fn ranges(&self) -> &Self::Ranges;

    fn total_records(&self) -> i64 {
        self.ranges().total().records
    }
}

impl BucketData for GlucoseRanges {
    type Ranges = GlucoseRanges;

    fn fold(&mut self, record: &DeviceRecord) {
        self.update(record);
    }

    fn ranges(&self) -> &Self::Ranges {
        self
    }
}

impl BucketData for ContinuousRanges {
    type Ranges = ContinuousRanges;

    fn fold(&mut self, record: &DeviceRecord) {
        self.update(record);
    }

    fn ranges(&self) -> &Self::Ranges {
        self
    }
}

/// One hour of aggregated readings for one user and summary kind. Written
/// wholesale on every persist; `modified` is a runtime-only dirty bit that
/// lets bulk writes skip untouched hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Bucket<D: BucketData> {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: SummaryKind,
    /// Hour boundary this bucket covers.
    pub time: DateTime,
    /// Actual first/last record times within the hour, not the boundary.
    pub first_data: DateTime,
    pub last_data: DateTime,
    /// Reporting interval of the most recent folded record, minutes.
    pub last_record_duration: i64,
    pub data: D,
    #[serde(skip)]
    pub modified: bool,
}

impl<D: BucketData> Bucket<D> {
    pub fn new(user_id: &str, kind: SummaryKind, hour: DateTime) -> Self {
        Bucket {
            id: None,
            user_id: user_id.to_string(),
            kind,
            time: hour,
            first_data: hour,
            last_data: hour,
            last_record_duration: 0,
            data: D::default(),
            modified: false,
        }
    }

    /// Fold one record into the bucket. Returns whether the record was
    /// applied; duplicates and over-capacity readings are skipped without
    /// error. `previous_last_data` carries the newest record time known
    /// before this bucket, so dedup works across hour boundaries.
    pub fn update(
        &mut self,
        record: &DeviceRecord,
        previous_last_data: Option<DateTime>,
    ) -> SummaryResult<bool> {
        let record_time = to_bson(record.time);
        if truncate_hour(record_time) != self.time {
            return Err(SummaryError::precondition(
                "record does not fall within this bucket's hour",
            ));
        }
        if self.should_skip(record, record_time, previous_last_data) {
            return Ok(false);
        }

        let had_records = self.data.total_records() > 0;
        self.data.fold(record);
        if !had_records || record_time < self.first_data {
            self.first_data = record_time;
        }
        if !had_records || record_time > self.last_data {
            self.last_data = record_time;
        }
        self.last_record_duration = record.duration_minutes().unwrap_or(0);
        self.modified = true;
        Ok(true)
    }

    fn should_skip(
        &self,
        record: &DeviceRecord,
        record_time: DateTime,
        previous_last_data: Option<DateTime>,
    ) -> bool {
        if self.data.total_records() >= MAX_RECORDS_PER_BUCKET {
            return true;
        }
        let Some(interval) = record.duration_minutes() else {
            // Meters without a reporting interval have no blackout window.
            return false;
        };
        let last = match (self.data.total_records() > 0, previous_last_data) {
            (true, Some(previous)) => Some(self.last_data.max(previous)),
            (true, None) => Some(self.last_data),
            (false, previous) => previous,
        };
        let Some(last) = last else {
            return false;
        };
        let elapsed = record_time.timestamp_millis() - last.timestamp_millis();
        elapsed < interval * MILLIS_PER_MINUTE - DEDUP_GRACE_MILLIS
    }
}

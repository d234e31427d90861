use gluco_shared::status::UserLastUpdated;
use gluco_shared::types::{
    DeviceDataType, OUTDATED_REASON_SCHEMA_MIGRATION, SUMMARY_SCHEMA_VERSION, SummaryKind,
};
use mongodb::bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{SummaryError, SummaryResult};
use crate::models::bucket::BucketData;
use crate::models::period::{ContinuousPeriodStats, GlucosePeriodStats, PeriodStats, Periods};
use crate::models::range::{
    EXTREME_HIGH_GLUCOSE_MMOLL, HIGH_GLUCOSE_MMOLL, LOW_GLUCOSE_MMOLL, VERY_HIGH_GLUCOSE_MMOLL,
    VERY_LOW_GLUCOSE_MMOLL,
};
use crate::models::ranges::{ContinuousRanges, GlucoseRanges, RangesData};
use crate::util::time::to_bson;

/// Compile-time wiring for one summary kind: which bucket payload it
/// aggregates, which derived statistics it reports, and which raw device
/// data types feed it.
pub trait SummaryFlavor:
    std::fmt::Debug + Clone + Copy + Default + PartialEq + Send + Sync + Unpin + 'static
{
    const KIND: SummaryKind;
    type Ranges: RangesData;
    type BucketData: BucketData<Ranges = Self::Ranges>;
    type Stats: PeriodStats<Ranges = Self::Ranges>;

    fn device_data_types() -> &'static [DeviceDataType];

    /// Whether raw records must come from continuous-typed uploads.
    fn filters_continuous_uploads() -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cgm;

impl SummaryFlavor for Cgm {
    const KIND: SummaryKind = SummaryKind::Cgm;
    type Ranges = GlucoseRanges;
    type BucketData = GlucoseRanges;
    type Stats = GlucosePeriodStats;

    fn device_data_types() -> &'static [DeviceDataType] {
        &[DeviceDataType::Cbg]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bgm;

impl SummaryFlavor for Bgm {
    const KIND: SummaryKind = SummaryKind::Bgm;
    type Ranges = GlucoseRanges;
    type BucketData = GlucoseRanges;
    type Stats = GlucosePeriodStats;

    fn device_data_types() -> &'static [DeviceDataType] {
        &[DeviceDataType::Smbg]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Continuous;

impl SummaryFlavor for Continuous {
    const KIND: SummaryKind = SummaryKind::Con;
    type Ranges = ContinuousRanges;
    type BucketData = ContinuousRanges;
    type Stats = ContinuousPeriodStats;

    fn device_data_types() -> &'static [DeviceDataType] {
        &[DeviceDataType::Cbg]
    }

    fn filters_continuous_uploads() -> bool {
        true
    }
}

/// Schema version and thresholds the summary was computed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryConfig {
    pub schema_version: i32,
    pub very_low_glucose: f64,
    pub low_glucose: f64,
    pub high_glucose: f64,
    pub very_high_glucose: f64,
    pub extreme_high_glucose: f64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            schema_version: SUMMARY_SCHEMA_VERSION,
            very_low_glucose: VERY_LOW_GLUCOSE_MMOLL,
            low_glucose: LOW_GLUCOSE_MMOLL,
            high_glucose: HIGH_GLUCOSE_MMOLL,
            very_high_glucose: VERY_HIGH_GLUCOSE_MMOLL,
            extreme_high_glucose: EXTREME_HIGH_GLUCOSE_MMOLL,
        }
    }
}

/// Status dates for one summary. `outdated_since` is set exactly while a
/// recomputation is due; `outdated_reason` accumulates as a deduplicated set
/// until the next successful update moves it into `last_updated_reason`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SummaryDates {
    pub last_updated_date: Option<DateTime>,
    pub last_updated_reason: Vec<String>,
    pub last_upload_date: Option<DateTime>,
    pub first_data: Option<DateTime>,
    pub last_data: Option<DateTime>,
    pub outdated_since: Option<DateTime>,
    pub outdated_reason: Vec<String>,
}

impl SummaryDates {
    pub fn mark_outdated(&mut self, now: DateTime, reason: &str) {
        if !self.outdated_reason.iter().any(|r| r == reason) {
            self.outdated_reason.push(reason.to_string());
        }
        if self.outdated_since.is_none() {
            self.outdated_since = Some(now);
        }
    }

    pub fn clear_outdated(&mut self) {
        self.outdated_since = None;
        self.outdated_reason.clear();
    }

    /// Record a successfully applied status: the accumulated outdated
    /// reasons become the update reasons and the markers clear.
    pub fn apply_status(&mut self, status: &UserLastUpdated, first_data: Option<DateTime>) {
        self.last_updated_date = Some(to_bson(status.next_last_updated));
        self.last_upload_date = Some(to_bson(status.last_upload));
        self.last_data = Some(to_bson(status.last_data));
        self.first_data = first_data;
        self.last_updated_reason = std::mem::take(&mut self.outdated_reason);
        self.outdated_since = None;
    }
}

/// The persisted per-user, per-kind summary document. Replaced wholesale on
/// every successful update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound = "")]
pub struct Summary<T: SummaryFlavor> {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "type")]
    pub kind: SummaryKind,
    pub user_id: String,
    pub config: SummaryConfig,
    pub dates: SummaryDates,
    pub periods: Periods<T::Stats>,
}

impl<T: SummaryFlavor> Summary<T> {
    pub fn new(user_id: &str) -> Self {
        Summary {
            id: None,
            kind: T::KIND,
            user_id: user_id.to_string(),
            config: SummaryConfig::default(),
            dates: SummaryDates::default(),
            periods: Periods::default(),
        }
    }

    /// Drop everything computed under an older schema, keeping only the
    /// outdated bookkeeping so the migration reason survives into the next
    /// successful update.
    pub fn reset_for_migration(&mut self, now: DateTime) {
        let mut dates = SummaryDates::default();
        dates.outdated_since = self.dates.outdated_since;
        dates.outdated_reason = std::mem::take(&mut self.dates.outdated_reason);
        self.config = SummaryConfig::default();
        self.periods = Periods::default();
        self.dates = dates;
        self.dates.mark_outdated(now, OUTDATED_REASON_SCHEMA_MIGRATION);
    }
}

/// Batch precondition pass for bulk inserts: every summary must carry the
/// store's kind and a user id, reported with the offending index.
pub fn validate_batch<T: SummaryFlavor>(summaries: &[Summary<T>]) -> SummaryResult<()> {
    for (index, summary) in summaries.iter().enumerate() {
        if summary.kind != T::KIND {
            return Err(SummaryError::TypeMismatch {
                index,
                expected: T::KIND,
                actual: summary.kind,
            });
        }
        if summary.user_id.is_empty() {
            return Err(SummaryError::InvalidBatch {
                index,
                reason: "empty userId".to_string(),
            });
        }
    }
    Ok(())
}

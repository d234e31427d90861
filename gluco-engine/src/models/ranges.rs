use chrono::Duration;
use gluco_shared::record::DeviceRecord;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::models::range::{
    EXTREME_HIGH_GLUCOSE_MMOLL, HIGH_GLUCOSE_MMOLL, LOW_GLUCOSE_MMOLL, Range,
    VERY_HIGH_GLUCOSE_MMOLL, VERY_LOW_GLUCOSE_MMOLL,
};

/// Records received more than this long after the device produced them count
/// as deferred uploads.
pub const REALTIME_UPLOAD_WINDOW_HOURS: i64 = 24;

/// A fixed set of named accumulators covering one summary flavor.
pub trait RangesData:
    Clone
    + Default
    + std::fmt::Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + Unpin
    + 'static
{
    /// Fold a disjoint-time aggregate into this one.
    fn add(&mut self, other: &Self);

    /// Compute percentages for a finished window of the given nominal length.
    fn finalize(&mut self, days: u32);

    /// Signed per-band differences between two finalized aggregates.
    fn delta(current: &Self, previous: &Self) -> Self;

    fn total(&self) -> &Range;
}

/// Glucose classification bands. `any_low`/`any_high` overlap the specific
/// low/high bands, and `extreme_high` is an inclusive subset of `very_high`;
/// the remaining bands partition `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlucoseRanges {
    pub total: Range,
    pub very_low: Range,
    pub low: Range,
    pub target: Range,
    pub high: Range,
    pub very_high: Range,
    pub extreme_high: Range,
    pub any_low: Range,
    pub any_high: Range,
}

impl GlucoseRanges {
    pub fn update(&mut self, record: &DeviceRecord) {
        if record.value < VERY_LOW_GLUCOSE_MMOLL {
            self.very_low.update(record);
            self.any_low.update(record);
        } else if record.value > VERY_HIGH_GLUCOSE_MMOLL {
            self.very_high.update(record);
            self.any_high.update(record);
            if record.value >= EXTREME_HIGH_GLUCOSE_MMOLL {
                self.extreme_high.update(record);
            }
        } else if record.value < LOW_GLUCOSE_MMOLL {
            self.low.update(record);
            self.any_low.update(record);
        } else if record.value > HIGH_GLUCOSE_MMOLL {
            self.high.update(record);
            self.any_high.update(record);
        } else {
            self.target.update(record);
        }
        self.total.update_total(record);
    }

    fn bands_mut(&mut self) -> [&mut Range; 8] {
        [
            &mut self.very_low,
            &mut self.low,
            &mut self.target,
            &mut self.high,
            &mut self.very_high,
            &mut self.extreme_high,
            &mut self.any_low,
            &mut self.any_high,
        ]
    }
}

impl RangesData for GlucoseRanges {
    fn add(&mut self, other: &Self) {
        self.total.add(&other.total);
        self.very_low.add(&other.very_low);
        self.low.add(&other.low);
        self.target.add(&other.target);
        self.high.add(&other.high);
        self.very_high.add(&other.very_high);
        self.extreme_high.add(&other.extreme_high);
        self.any_low.add(&other.any_low);
        self.any_high.add(&other.any_high);
    }

    fn finalize(&mut self, days: u32) {
        if self.total.minutes > 0 {
            let total_minutes = self.total.minutes;
            for band in self.bands_mut() {
                band.finalize_percent_by_minutes(total_minutes);
            }
            self.total.finalize_coverage(days);
        } else if self.total.records > 0 {
            // Record counts cannot express wall-clock coverage, so the total
            // percent stays zero.
            let total_records = self.total.records;
            for band in self.bands_mut() {
                band.finalize_percent_by_records(total_records);
            }
        }
    }

    fn delta(current: &Self, previous: &Self) -> Self {
        GlucoseRanges {
            total: Range::delta(&current.total, &previous.total),
            very_low: Range::delta(&current.very_low, &previous.very_low),
            low: Range::delta(&current.low, &previous.low),
            target: Range::delta(&current.target, &previous.target),
            high: Range::delta(&current.high, &previous.high),
            very_high: Range::delta(&current.very_high, &previous.very_high),
            extreme_high: Range::delta(&current.extreme_high, &previous.extreme_high),
            any_low: Range::delta(&current.any_low, &previous.any_low),
            any_high: Range::delta(&current.any_high, &previous.any_high),
        }
    }

    fn total(&self) -> &Range {
        &self.total
    }
}

/// Realtime/deferred split for continuous uploads. Tracks counts and
/// coverage only; no glucose mass or variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousRanges {
    pub total: Range,
    pub realtime: Range,
    pub deferred: Range,
}

impl ContinuousRanges {
    pub fn update(&mut self, record: &DeviceRecord) {
        let lag = record.created_time - record.time;
        if lag <= Duration::hours(REALTIME_UPLOAD_WINDOW_HOURS) {
            self.realtime.update(record);
        } else {
            self.deferred.update(record);
        }
        self.total.update(record);
    }
}

impl RangesData for ContinuousRanges {
    fn add(&mut self, other: &Self) {
        self.total.add(&other.total);
        self.realtime.add(&other.realtime);
        self.deferred.add(&other.deferred);
    }

    fn finalize(&mut self, days: u32) {
        if self.total.minutes > 0 {
            let total_minutes = self.total.minutes;
            self.realtime.finalize_percent_by_minutes(total_minutes);
            self.deferred.finalize_percent_by_minutes(total_minutes);
            self.total.finalize_coverage(days);
        } else if self.total.records > 0 {
            let total_records = self.total.records;
            self.realtime.finalize_percent_by_records(total_records);
            self.deferred.finalize_percent_by_records(total_records);
        }
    }

    fn delta(current: &Self, previous: &Self) -> Self {
        ContinuousRanges {
            total: Range::delta(&current.total, &previous.total),
            realtime: Range::delta(&current.realtime, &previous.realtime),
            deferred: Range::delta(&current.deferred, &previous.deferred),
        }
    }

    fn total(&self) -> &Range {
        &self.total
    }
}

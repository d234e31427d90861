use gluco_shared::record::DeviceRecord;
use serde::{Deserialize, Serialize};

/// Classification thresholds, mmol/L.
pub const VERY_LOW_GLUCOSE_MMOLL: f64 = 3.0;
pub const LOW_GLUCOSE_MMOLL: f64 = 3.9;
pub const HIGH_GLUCOSE_MMOLL: f64 = 10.0;
pub const VERY_HIGH_GLUCOSE_MMOLL: f64 = 13.9;
pub const EXTREME_HIGH_GLUCOSE_MMOLL: f64 = 19.4;

pub const MINUTES_PER_DAY: i64 = 1440;

/// A single streaming accumulator for one classification band.
///
/// `glucose` is a mass sum (value times reporting minutes when the device
/// tracks duration, plain value sum otherwise). `variance` stays a sum of
/// squared deviations while accumulating; the division happens when derived
/// statistics are computed at period finalize. `percent` is only meaningful
/// after a `Ranges` finalize pass and is zeroed by `add`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub glucose: f64,
    pub minutes: i64,
    pub records: i64,
    pub percent: f64,
    pub variance: f64,
}

impl Range {
    /// Count a record against this band without folding its value.
    pub fn update(&mut self, record: &DeviceRecord) {
        self.records += 1;
        if let Some(minutes) = record.duration_minutes() {
            self.minutes += minutes;
        }
    }

    /// Count a record and fold its value into the mass and variance sums.
    /// The variance step must see the pre-increment weight sum.
    pub fn update_total(&mut self, record: &DeviceRecord) {
        match record.duration_minutes() {
            Some(minutes) => {
                let weight = minutes as f64;
                self.variance = self.next_variance(record.value, weight, self.minutes as f64);
                self.glucose += record.value * weight;
                self.minutes += minutes;
            }
            None => {
                self.variance = self.next_variance(record.value, 1.0, self.records as f64);
                self.glucose += record.value;
            }
        }
        self.records += 1;
    }

    // Weighted incremental step (West, 1979): fold one observation of the
    // given weight into the squared-deviation sum.
    fn next_variance(&self, value: f64, weight: f64, sum_weight: f64) -> f64 {
        let mean = if sum_weight > 0.0 {
            self.glucose / sum_weight
        } else {
            0.0
        };
        let shifted = mean + (weight / (sum_weight + weight)) * (value - mean);
        self.variance + weight * (value - mean) * (value - shifted)
    }

    /// Combine another accumulator covering a disjoint time span, using the
    /// parallel variance-combination formula with minute counts as weights.
    /// Without minutes on both sides there is no cross term and the
    /// squared-deviation sums just add; an empty side contributes zero, so
    /// folding a populated range into a fresh accumulator adopts its
    /// variance intact.
    pub fn add(&mut self, other: &Range) {
        if self.minutes > 0 && other.minutes > 0 {
            let n1 = self.minutes as f64;
            let n2 = other.minutes as f64;
            let delta = other.glucose / n2 - self.glucose / n1;
            self.variance = self.variance + other.variance + delta * delta * n1 * n2 / (n1 + n2);
        } else {
            self.variance += other.variance;
        }
        self.glucose += other.glucose;
        self.minutes += other.minutes;
        self.records += other.records;
        // Percentages are not additive; downstream finalize recomputes them.
        self.percent = 0.0;
    }

    pub fn finalize_percent_by_minutes(&mut self, total_minutes: i64) {
        if total_minutes > 0 {
            self.percent = self.minutes as f64 / total_minutes as f64;
        }
    }

    pub fn finalize_percent_by_records(&mut self, total_records: i64) {
        if total_records > 0 {
            self.percent = self.records as f64 / total_records as f64;
        }
    }

    /// Wall-clock coverage: tracked minutes over the window's full span.
    pub fn finalize_coverage(&mut self, days: u32) {
        let span = (days as i64 * MINUTES_PER_DAY) as f64;
        if span > 0.0 {
            self.percent = self.minutes as f64 / span;
        }
    }

    /// Signed per-field difference. Mass and variance sums never combine
    /// across windows, so the delta carries only the comparable fields.
    pub fn delta(current: &Range, previous: &Range) -> Range {
        Range {
            glucose: 0.0,
            minutes: current.minutes - previous.minutes,
            records: current.records - previous.records,
            percent: current.percent - previous.percent,
            variance: 0.0,
        }
    }
}

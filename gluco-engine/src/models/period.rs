use std::collections::BTreeMap;
use std::mem;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use crate::error::{SummaryError, SummaryResult};
use crate::models::bucket::{Bucket, BucketData};
use crate::models::ranges::{ContinuousRanges, GlucoseRanges, RangesData};
use crate::util::time::{MILLIS_PER_DAY, truncate_day_millis};

/// Rolling window lengths computed for every summary, in days.
pub const DEFAULT_PERIOD_LENGTHS_DAYS: [u32; 4] = [1, 7, 14, 30];

pub fn period_name(days: u32) -> String {
    format!("{days}d")
}

/// Derived statistics computed from a finalized ranges aggregate.
pub trait PeriodStats:
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
    type Ranges: RangesData;

    fn derive(ranges: &Self::Ranges, days: u32) -> Self;

    fn delta(current: &Self, previous: &Self) -> Self;
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlucosePeriodStats {
    pub average_glucose: f64,
    pub glucose_management_indicator: f64,
    pub standard_deviation: f64,
    pub coefficient_of_variation: f64,
    pub average_daily_records: f64,
}

impl PeriodStats for GlucosePeriodStats {
    type Ranges = GlucoseRanges;

    fn derive(ranges: &Self::Ranges, days: u32) -> Self {
        let total = ranges.total();
        let average_glucose = if total.minutes > 0 {
            total.glucose / total.minutes as f64
        } else if total.records > 0 {
            total.glucose / total.records as f64
        } else {
            0.0
        };
        let glucose_management_indicator = if average_glucose > 0.0 {
            round_tenth(0.09148 * (12.71 + 4.70587 * average_glucose) + 2.152)
        } else {
            0.0
        };
        let standard_deviation = if total.minutes > 0 {
            (total.variance / total.minutes as f64).sqrt()
        } else {
            0.0
        };
        let coefficient_of_variation = if average_glucose > 0.0 {
            standard_deviation / average_glucose
        } else {
            0.0
        };
        GlucosePeriodStats {
            average_glucose,
            glucose_management_indicator,
            standard_deviation,
            coefficient_of_variation,
            average_daily_records: total.records as f64 / days as f64,
        }
    }

    fn delta(current: &Self, previous: &Self) -> Self {
        GlucosePeriodStats {
            average_glucose: current.average_glucose - previous.average_glucose,
            glucose_management_indicator: current.glucose_management_indicator
                - previous.glucose_management_indicator,
            standard_deviation: current.standard_deviation - previous.standard_deviation,
            coefficient_of_variation: current.coefficient_of_variation
                - previous.coefficient_of_variation,
            average_daily_records: current.average_daily_records - previous.average_daily_records,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousPeriodStats {
    pub average_daily_records: f64,
}

impl PeriodStats for ContinuousPeriodStats {
    type Ranges = ContinuousRanges;

    fn derive(ranges: &Self::Ranges, days: u32) -> Self {
        ContinuousPeriodStats {
            average_daily_records: ranges.total().records as f64 / days as f64,
        }
    }

    fn delta(current: &Self, previous: &Self) -> Self {
        ContinuousPeriodStats {
            average_daily_records: current.average_daily_records - previous.average_daily_records,
        }
    }
}

/// A finalized rolling-window statistic. Immutable by construction: only
/// `PeriodAccumulator::finalize` produces one, so there is no runtime
/// "already finalized" flag to check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Period<S: PeriodStats> {
    pub ranges: S::Ranges,
    pub stats: S,
    pub hours_with_data: i32,
    pub days_with_data: i32,
    /// Signed differences against the equal-length preceding window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Box<Period<S>>>,
}

impl<S: PeriodStats> Period<S> {
    pub fn delta_between(current: &Period<S>, previous: &Period<S>) -> Period<S> {
        Period {
            ranges: S::Ranges::delta(&current.ranges, &previous.ranges),
            stats: S::delta(&current.stats, &previous.stats),
            hours_with_data: current.hours_with_data - previous.hours_with_data,
            days_with_data: current.days_with_data - previous.days_with_data,
            delta: None,
        }
    }
}

// Counted-hour/day window edges, millis since epoch. Only exists while
// accumulating.
#[derive(Debug, Clone, Copy)]
struct CountedWindow {
    first_hour: i64,
    last_hour: i64,
    first_day: i64,
    last_day: i64,
}

/// The accumulating phase of a period. Consumed by `finalize`, which is what
/// makes post-finalize updates unrepresentable.
#[derive(Debug, Clone, Default)]
pub struct PeriodAccumulator<S: PeriodStats> {
    ranges: S::Ranges,
    window: Option<CountedWindow>,
    hours_with_data: i32,
    days_with_data: i32,
}

impl<S: PeriodStats> PeriodAccumulator<S> {
    /// Fold one bucket. The bucket must extend the counted window strictly
    /// backward or forward; a timestamp inside the window means the caller
    /// broke the traversal-order invariant. Buckets without records are
    /// ignored.
    pub fn update<D>(&mut self, bucket: &Bucket<D>) -> SummaryResult<()>
    where
        D: BucketData<Ranges = S::Ranges>,
    {
        if bucket.data.total_records() == 0 {
            return Ok(());
        }
        let hour = bucket.time.timestamp_millis();
        let day = truncate_day_millis(hour);
        match &mut self.window {
            None => {
                self.window = Some(CountedWindow {
                    first_hour: hour,
                    last_hour: hour,
                    first_day: day,
                    last_day: day,
                });
                self.days_with_data = 1;
            }
            Some(window) => {
                if hour < window.first_hour {
                    window.first_hour = hour;
                    if day < window.first_day {
                        window.first_day = day;
                        self.days_with_data += 1;
                    }
                } else if hour > window.last_hour {
                    window.last_hour = hour;
                    if day > window.last_day {
                        window.last_day = day;
                        self.days_with_data += 1;
                    }
                } else {
                    return Err(SummaryError::invariant(
                        "bucket timestamp falls inside the already counted window",
                    ));
                }
            }
        }
        self.hours_with_data += 1;
        self.ranges.add(bucket.data.ranges());
        Ok(())
    }

    /// Close the window at its nominal length. Short windows are valid and
    /// simply report lower coverage.
    pub fn finalize(self, days: u32) -> Period<S> {
        let mut ranges = self.ranges;
        ranges.finalize(days);
        let stats = S::derive(&ranges, days);
        Period {
            ranges,
            stats,
            hours_with_data: self.hours_with_data,
            days_with_data: self.days_with_data,
            delta: None,
        }
    }
}

/// The full set of rolling windows for one summary, keyed by window name
/// ("7d").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Periods<S: PeriodStats>(pub BTreeMap<String, Period<S>>);

impl<S: PeriodStats> Periods<S> {
    pub fn get(&self, name: &str) -> Option<&Period<S>> {
        self.0.get(name)
    }

    /// Derive every configured window from buckets traversed strictly
    /// newest-first with unique timestamps. The newest bucket anchors the
    /// stop points (`anchor - L` days) and offset stop points (`anchor - 2L`
    /// days); windows never reached are finalized with whatever partial data
    /// exists.
    ///
    /// One running accumulator backs the primary windows (they nest), and is
    /// snapshotted at each stop point. The offset accumulator restarts at
    /// each offset stop point: offset windows are pairwise disjoint and only
    /// collect buckets once the primary stop index has moved past them.
    pub fn update<D, I>(
        token: &CancellationToken,
        buckets: I,
        lengths: &[u32],
    ) -> SummaryResult<Self>
    where
        D: BucketData<Ranges = S::Ranges>,
        I: IntoIterator<Item = Bucket<D>>,
    {
        let mut iter = buckets.into_iter();
        let mut primaries: Vec<Period<S>> = Vec::with_capacity(lengths.len());
        let mut offsets: Vec<Period<S>> = Vec::with_capacity(lengths.len());
        let mut primary = PeriodAccumulator::<S>::default();
        let mut offset = PeriodAccumulator::<S>::default();

        let first = iter.next();
        let stops: Vec<i64>;
        let offset_stops: Vec<i64>;
        match &first {
            Some(bucket) => {
                let anchor = bucket.time.timestamp_millis();
                stops = lengths
                    .iter()
                    .map(|&l| anchor - l as i64 * MILLIS_PER_DAY)
                    .collect();
                offset_stops = lengths
                    .iter()
                    .map(|&l| anchor - 2 * l as i64 * MILLIS_PER_DAY)
                    .collect();
            }
            None => {
                stops = Vec::new();
                offset_stops = Vec::new();
            }
        }

        let mut previous_time: Option<i64> = None;
        let mut current = first;
        while let Some(bucket) = current {
            if token.is_cancelled() {
                return Err(SummaryError::Cancelled);
            }
            let time = bucket.time.timestamp_millis();
            if let Some(previous) = previous_time {
                if time >= previous {
                    return Err(SummaryError::invariant(
                        "buckets must arrive strictly newest-first without duplicates",
                    ));
                }
            }
            if bucket.data.total_records() == 0 {
                // A persisted bucket only exists because a record created it;
                // an empty one means the stored state is corrupt.
                panic!("zero-record bucket {} in period rollup", bucket.time);
            }

            while primaries.len() < stops.len() && time <= stops[primaries.len()] {
                let days = lengths[primaries.len()];
                primaries.push(primary.clone().finalize(days));
            }
            while offsets.len() < offset_stops.len() && time <= offset_stops[offsets.len()] {
                let days = lengths[offsets.len()];
                offsets.push(mem::take(&mut offset).finalize(days));
            }

            primary.update(&bucket)?;
            if primaries.len() > offsets.len() {
                offset.update(&bucket)?;
            }

            previous_time = Some(time);
            current = iter.next();
        }

        while primaries.len() < lengths.len() {
            let days = lengths[primaries.len()];
            primaries.push(primary.clone().finalize(days));
        }
        while offsets.len() < lengths.len() {
            let days = lengths[offsets.len()];
            offsets.push(mem::take(&mut offset).finalize(days));
        }

        let mut out = BTreeMap::new();
        for ((&days, mut period), offset_period) in
            lengths.iter().zip(primaries).zip(offsets)
        {
            period.delta = Some(Box::new(Period::delta_between(&period, &offset_period)));
            out.insert(period_name(days), period);
        }
        Ok(Periods(out))
    }
}

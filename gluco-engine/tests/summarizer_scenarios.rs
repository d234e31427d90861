mod support;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use gluco_engine::error::SummaryError;
use gluco_engine::models::summary::{Cgm, Continuous, SummaryFlavor};
use gluco_engine::summarizer::Summarizer;
use gluco_shared::record::DeviceRecord;
use gluco_shared::types::{
    DeviceDataType, OUTDATED_REASON_DATA_ADDED, OUTDATED_REASON_SCHEMA_MIGRATION,
    SUMMARY_SCHEMA_VERSION,
};
use mongodb::bson::DateTime as BsonDateTime;
use tokio_util::sync::CancellationToken;

use support::{MemoryBucketStore, MemorySummaryStore, MemoryUnitOfWork, MockFetcher};

type MemorySummarizer<T> =
    Summarizer<T, MemoryUnitOfWork, MemoryBucketStore<T>, MemorySummaryStore<T>, MockFetcher>;

struct Harness<T: SummaryFlavor> {
    summarizer: MemorySummarizer<T>,
    buckets: MemoryBucketStore<T>,
    summaries: MemorySummaryStore<T>,
    fetcher: Arc<MockFetcher>,
}

fn harness<T: SummaryFlavor>() -> Harness<T> {
    let buckets = MemoryBucketStore::new();
    let summaries = MemorySummaryStore::new();
    let fetcher = Arc::new(MockFetcher::new());
    Harness {
        summarizer: Summarizer::new(
            MemoryUnitOfWork,
            buckets.clone(),
            summaries.clone(),
            fetcher.clone(),
        ),
        buckets,
        summaries,
        fetcher,
    }
}

/// An hour-aligned anchor two days in the past, so everything lands inside
/// every rolling window.
fn t0() -> DateTime<Utc> {
    let millis = (Utc::now() - Duration::days(2)).timestamp_millis();
    DateTime::from_timestamp_millis(millis - millis.rem_euclid(3_600_000)).unwrap()
}

fn cbg_at(user_id: &str, time: DateTime<Utc>, value: f64) -> DeviceRecord {
    DeviceRecord::new(user_id, DeviceDataType::Cbg, "upload-1", time, value)
}

fn hourly_cbg(user_id: &str, start: DateTime<Utc>, count: i64) -> Vec<DeviceRecord> {
    (0..count)
        .map(|i| cbg_at(user_id, start + Duration::hours(i), 6.0))
        .collect()
}

#[tokio::test]
async fn test_incremental_updates_accumulate_records() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();
    let start = t0();

    h.fetcher.insert(hourly_cbg("user-1", start, 5));
    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(h.buckets.bucket_count("user-1"), 5);
    assert_eq!(summary.periods.get("7d").unwrap().ranges.total.records, 5);

    h.fetcher.insert(hourly_cbg("user-1", start + Duration::hours(5), 5));
    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(h.buckets.bucket_count("user-1"), 10);
    assert_eq!(summary.periods.get("7d").unwrap().ranges.total.records, 10);

    // A gap between uploads must not confuse the incremental fold.
    h.fetcher.insert(hourly_cbg("user-1", start + Duration::hours(15), 5));
    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(h.buckets.bucket_count("user-1"), 15);
    assert_eq!(summary.periods.get("7d").unwrap().ranges.total.records, 15);
    assert_eq!(summary.dates.first_data, Some(BsonDateTime::from_millis(start.timestamp_millis())));
}

#[tokio::test]
async fn test_update_without_new_data_is_idempotent() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();

    h.fetcher.insert(hourly_cbg("user-1", t0(), 8));
    let first = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    let second = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(h.summaries.stored("user-1").unwrap(), first);
}

#[tokio::test]
async fn test_backdated_record_invalidates_and_rebuilds() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();
    let start = t0();

    h.fetcher.insert(hourly_cbg("user-1", start, 10));
    h.summarizer.update_summary("user-1", &token).await.unwrap();

    // lands in the middle of already-summarized history
    let backdated = start + Duration::hours(5) + Duration::minutes(30);
    h.fetcher.insert([cbg_at("user-1", backdated, 12.0)]);
    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();

    assert_eq!(h.buckets.bucket_count("user-1"), 10);
    let period = summary.periods.get("7d").unwrap();
    assert_eq!(period.ranges.total.records, 11);
    assert_eq!(period.ranges.high.records, 1);
    assert_eq!(
        summary.dates.first_data,
        Some(BsonDateTime::from_millis(start.timestamp_millis()))
    );
}

#[tokio::test]
async fn test_schema_migration_rebuilds_from_scratch() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();

    h.fetcher.insert(hourly_cbg("user-1", t0(), 6));
    h.summarizer.update_summary("user-1", &token).await.unwrap();

    let mut stale = h.summaries.stored("user-1").unwrap();
    stale.config.schema_version = SUMMARY_SCHEMA_VERSION - 1;
    stale
        .dates
        .mark_outdated(BsonDateTime::now(), OUTDATED_REASON_DATA_ADDED);
    h.summaries.insert(stale);

    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(summary.config.schema_version, SUMMARY_SCHEMA_VERSION);
    assert_eq!(h.buckets.bucket_count("user-1"), 6);
    assert_eq!(summary.periods.get("7d").unwrap().ranges.total.records, 6);
    assert!(summary
        .dates
        .last_updated_reason
        .contains(&OUTDATED_REASON_SCHEMA_MIGRATION.to_string()));
    assert!(summary
        .dates
        .last_updated_reason
        .contains(&OUTDATED_REASON_DATA_ADDED.to_string()));
    assert!(summary.dates.outdated_since.is_none());
}

#[tokio::test]
async fn test_buckets_beyond_retention_are_trimmed() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();
    let recent = t0();

    h.fetcher.insert([cbg_at("user-1", recent - Duration::days(61), 6.0)]);
    h.fetcher.insert(hourly_cbg("user-1", recent, 3));
    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();

    assert_eq!(h.buckets.bucket_count("user-1"), 3);
    assert_eq!(summary.periods.get("30d").unwrap().ranges.total.records, 3);
    assert_eq!(
        summary.dates.first_data,
        Some(BsonDateTime::from_millis(recent.timestamp_millis()))
    );
}

#[tokio::test]
async fn test_user_without_data_loses_summary() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();

    h.fetcher.insert(hourly_cbg("user-1", t0(), 4));
    h.summarizer.update_summary("user-1", &token).await.unwrap();
    assert!(h.summaries.stored("user-1").is_some());

    h.fetcher.clear_user("user-1");
    let result = h.summarizer.update_summary("user-1", &token).await.unwrap();
    assert!(result.is_none());
    assert!(h.summaries.stored("user-1").is_none());
    assert_eq!(h.buckets.bucket_count("user-1"), 0);
}

#[tokio::test]
async fn test_continuous_summary_skips_non_continuous_uploads() {
    let h = harness::<Continuous>();
    let token = CancellationToken::new();
    let start = t0();

    h.fetcher.set_upload("upload-cont", true);
    h.fetcher.set_upload("upload-batch", false);
    let records = (0..3)
        .map(|i| {
            DeviceRecord::new(
                "user-1",
                DeviceDataType::Cbg,
                "upload-cont",
                start + Duration::hours(i),
                6.0,
            )
        })
        .chain((3..5).map(|i| {
            DeviceRecord::new(
                "user-1",
                DeviceDataType::Cbg,
                "upload-batch",
                start + Duration::hours(i),
                6.0,
            )
        }));
    h.fetcher.insert(records);

    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(h.buckets.bucket_count("user-1"), 3);
    let period = summary.periods.get("7d").unwrap();
    assert_eq!(period.ranges.total.records, 3);
    assert_eq!(period.ranges.realtime.records, 3);
    assert_eq!(period.ranges.deferred.records, 0);
}

#[tokio::test]
async fn test_fully_filtered_fetch_leaves_placeholder_summary() {
    let h = harness::<Continuous>();
    let token = CancellationToken::new();
    let start = t0();

    // Raw data exists, but none of it comes from a continuous upload, so
    // every record is dropped before it reaches a bucket.
    h.fetcher.set_upload("upload-batch", false);
    let records = (0..4).map(|i| {
        DeviceRecord::new(
            "user-1",
            DeviceDataType::Cbg,
            "upload-batch",
            start + Duration::hours(i),
            6.0,
        )
    });
    h.fetcher.insert(records);

    let summary = h.summarizer.update_summary("user-1", &token).await.unwrap().unwrap();
    assert_eq!(h.buckets.bucket_count("user-1"), 0);
    assert!(summary.periods.get("7d").is_none());
    // the trigger is consumed but there is nothing to report
    assert!(summary.dates.last_updated_date.is_some());
    assert!(summary.dates.first_data.is_none());
    assert!(summary.dates.last_data.is_none());
    assert!(summary.dates.outdated_since.is_none());
    assert_eq!(h.summaries.stored("user-1").unwrap(), summary);
}

#[tokio::test]
async fn test_cancelled_token_aborts_update() {
    let h = harness::<Cgm>();
    let token = CancellationToken::new();
    token.cancel();

    h.fetcher.insert(hourly_cbg("user-1", t0(), 3));
    let result = h.summarizer.update_summary("user-1", &token).await;
    assert!(matches!(result, Err(SummaryError::Cancelled)));
    assert!(h.summaries.stored("user-1").is_none());
    assert_eq!(h.buckets.bucket_count("user-1"), 0);
}

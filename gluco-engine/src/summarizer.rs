use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Duration;
use gluco_shared::status::{DataRange, UserLastUpdated};
use gluco_shared::types::{SUMMARY_SCHEMA_VERSION, SummaryKind};
use mongodb::bson::DateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::Mongo;
use crate::error::{SummaryError, SummaryResult};
use crate::fetch::{ContinuousRecordCursor, DataFetcher, RecordCursor};
use crate::models::bucket::Bucket;
use crate::models::period::{DEFAULT_PERIOD_LENGTHS_DAYS, Periods};
use crate::models::summary::{Bgm, Cgm, Continuous, Summary, SummaryFlavor};
use crate::store::buckets::{BucketStore, MongoBucketStore};
use crate::store::summaries::{MongoSummaryStore, SummaryStore};
use crate::txn::{MongoUnitOfWork, UnitOfWork};
use crate::util::time::{MILLIS_PER_HOUR, to_bson, to_chrono, truncate_hour};

/// Buckets older than the newest bucket minus this horizon are dropped.
pub const RETENTION_HOURS: i64 = 60 * 24;

/// Records folded per bucket-load-and-write round trip.
pub const FOLD_BATCH_SIZE: usize = 500;

/// Transactional update loop for one summary flavor: fetches new raw data,
/// folds it into hourly buckets, and rebuilds the rolling windows, all inside
/// a single unit of work.
///
/// Concurrent updates for the same user are not serialized here; bucket
/// writes are keyed upserts and the summary replace is last-writer-wins, so
/// callers wanting single-flight semantics hold a per-user lock outside.
pub struct Summarizer<T, U, B, S, F>
where
    T: SummaryFlavor,
    U: UnitOfWork,
    B: BucketStore<T, Txn = U::Txn>,
    S: SummaryStore<T, Txn = U::Txn>,
    F: DataFetcher,
{
    unit_of_work: U,
    buckets: B,
    summaries: S,
    fetcher: Arc<F>,
    _flavor: PhantomData<T>,
}

impl<T, U, B, S, F> Summarizer<T, U, B, S, F>
where
    T: SummaryFlavor,
    U: UnitOfWork,
    B: BucketStore<T, Txn = U::Txn>,
    S: SummaryStore<T, Txn = U::Txn>,
    F: DataFetcher,
{
    pub fn new(unit_of_work: U, buckets: B, summaries: S, fetcher: Arc<F>) -> Self {
        Summarizer {
            unit_of_work,
            buckets,
            summaries,
            fetcher,
            _flavor: PhantomData,
        }
    }

    /// Run one full update for a user. Returns the persisted summary, or
    /// `None` when the user has no qualifying data and the summary was
    /// deleted. Any failure aborts the transaction; neither buckets nor the
    /// summary document change.
    pub async fn update_summary(
        &self,
        user_id: &str,
        token: &CancellationToken,
    ) -> SummaryResult<Option<Summary<T>>> {
        let mut txn = self.unit_of_work.begin().await?;
        match self.update_in_txn(&mut txn, user_id, token).await {
            Ok(summary) => {
                self.unit_of_work.commit(txn).await?;
                Ok(summary)
            }
            Err(err) => {
                self.unit_of_work.abort(txn).await?;
                Err(err)
            }
        }
    }

    async fn update_in_txn(
        &self,
        txn: &mut U::Txn,
        user_id: &str,
        token: &CancellationToken,
    ) -> SummaryResult<Option<Summary<T>>> {
        if token.is_cancelled() {
            return Err(SummaryError::Cancelled);
        }

        let mut summary = self
            .summaries
            .get(txn, user_id)
            .await?
            .unwrap_or_else(|| Summary::new(user_id));

        if summary.config.schema_version != SUMMARY_SCHEMA_VERSION {
            info!(
                user_id,
                kind = T::KIND.as_str(),
                from = summary.config.schema_version,
                to = SUMMARY_SCHEMA_VERSION,
                "summary schema migration, forcing full recompute"
            );
            summary.reset_for_migration(DateTime::now());
            self.buckets.reset(txn, user_id).await?;
        }

        let since = summary.dates.last_updated_date.map(to_chrono);
        let status = self
            .fetcher
            .get_last_updated(user_id, T::device_data_types(), since)
            .await?;

        let Some(status) = status else {
            // No qualifying data of this type exists anymore.
            info!(user_id, kind = T::KIND.as_str(), "deleting stale summary");
            self.buckets.reset(txn, user_id).await?;
            self.summaries.delete(txn, user_id).await?;
            return Ok(None);
        };

        if status.earliest_modified.is_none() {
            // Spurious re-trigger with nothing new; clearing the outdated
            // markers is the only change worth persisting.
            debug!(user_id, kind = T::KIND.as_str(), "no new data, short-circuiting");
            summary.dates.clear_outdated();
            self.summaries.replace(txn, &summary).await?;
            return Ok(Some(summary));
        }

        let range = self.invalidate_or_clamp(txn, user_id, &mut summary, &status).await?;
        let fetched = self.fold_records(txn, user_id, range, token).await?;
        debug!(user_id, kind = T::KIND.as_str(), fetched, "folded raw records");

        if let Some(newest) = self.buckets.get_newest(txn, user_id).await? {
            let cutoff =
                DateTime::from_millis(newest.time.timestamp_millis() - RETENTION_HOURS * MILLIS_PER_HOUR);
            let trimmed = self.buckets.trim_excess(txn, user_id, cutoff).await?;
            if trimmed > 0 {
                debug!(user_id, kind = T::KIND.as_str(), trimmed, "trimmed expired buckets");
            }
        }

        let buckets = self.buckets.get_all_buckets(txn, user_id).await?;
        match buckets.last().map(|oldest| oldest.first_data) {
            None => {
                // Records were fetched but none survived dedup/filtering, so
                // there is nothing to report. Keep a placeholder that still
                // records when we last looked.
                summary.dates = Default::default();
                summary.dates.last_updated_date = Some(to_bson(status.next_last_updated));
                summary.periods = Periods::default();
            }
            Some(first_data) => {
                summary.periods = Periods::update(token, buckets, &DEFAULT_PERIOD_LENGTHS_DAYS)?;
                summary.dates.apply_status(&status, Some(first_data));
            }
        }

        self.summaries.replace(txn, &summary).await?;
        Ok(Some(summary))
    }

    /// Resolve the fetch window's lower bound. A modification at or before
    /// the summarized frontier means already-folded buckets may be stale:
    /// drop them from that hour forward and refetch from just before the
    /// modification. Otherwise resume from the previous frontier.
    async fn invalidate_or_clamp(
        &self,
        txn: &mut U::Txn,
        user_id: &str,
        summary: &mut Summary<T>,
        status: &UserLastUpdated,
    ) -> SummaryResult<DataRange> {
        let earliest_modified = status
            .earliest_modified
            .ok_or_else(|| SummaryError::invariant("full update requires earliest-modified"))?;

        let start = match summary.dates.last_data {
            Some(last_data) if to_bson(earliest_modified) <= last_data => {
                info!(
                    user_id,
                    kind = T::KIND.as_str(),
                    %earliest_modified,
                    "backdated modification, invalidating buckets"
                );
                let cut = truncate_hour(to_bson(earliest_modified));
                let surviving_first = self.buckets.clear_invalidated(txn, user_id, cut).await?;
                summary.dates.first_data = surviving_first;
                // Dropped whole hours, so refetch from just before the hour
                // boundary; the range lower bound is exclusive.
                Some(to_chrono(cut) - Duration::milliseconds(1))
            }
            Some(last_data) => Some(to_chrono(last_data)),
            None => None,
        };

        Ok(DataRange {
            start,
            end: status.next_last_updated,
        })
    }

    /// Pull raw records in batches, group them by hour, and fold them into
    /// loaded-or-new buckets, writing back only the hours actually touched.
    async fn fold_records(
        &self,
        txn: &mut U::Txn,
        user_id: &str,
        range: DataRange,
        token: &CancellationToken,
    ) -> SummaryResult<usize> {
        let mut cursor = self
            .fetcher
            .get_data_range(user_id, T::device_data_types(), range)
            .await?;
        if T::filters_continuous_uploads() {
            cursor = Box::new(ContinuousRecordCursor::new(cursor, self.fetcher.clone()));
        }

        // Newest record time folded so far, so dedup works across hours and
        // across update calls.
        let mut last_seen = self
            .buckets
            .get_newest(txn, user_id)
            .await?
            .map(|bucket| bucket.last_data);

        let mut total = 0usize;
        loop {
            if token.is_cancelled() {
                return Err(SummaryError::Cancelled);
            }
            let mut batch = Vec::with_capacity(FOLD_BATCH_SIZE);
            while batch.len() < FOLD_BATCH_SIZE {
                match cursor.next().await? {
                    Some(record) => batch.push(record),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            total += batch.len();

            let mut hours: Vec<DateTime> = batch
                .iter()
                .map(|record| truncate_hour(to_bson(record.time)))
                .collect();
            hours.sort_unstable();
            hours.dedup();

            let mut by_hour: HashMap<i64, Bucket<T::BucketData>> = self
                .buckets
                .get_buckets_by_time(txn, user_id, &hours)
                .await?
                .into_iter()
                .map(|bucket| (bucket.time.timestamp_millis(), bucket))
                .collect();

            for record in &batch {
                if token.is_cancelled() {
                    return Err(SummaryError::Cancelled);
                }
                let hour = truncate_hour(to_bson(record.time));
                let bucket = by_hour
                    .entry(hour.timestamp_millis())
                    .or_insert_with(|| Bucket::new(user_id, T::KIND, hour));
                if bucket.update(record, last_seen)? {
                    last_seen = Some(bucket.last_data);
                }
            }

            let mut modified: Vec<Bucket<T::BucketData>> = by_hour.into_values().collect();
            self.buckets.write_modified(txn, &mut modified).await?;
        }
        Ok(total)
    }
}

pub type MongoSummarizer<T, F> =
    Summarizer<T, MongoUnitOfWork, MongoBucketStore<T>, MongoSummaryStore<T>, F>;

fn mongo_summarizer<T: SummaryFlavor, F: DataFetcher>(
    db: &Mongo,
    fetcher: Arc<F>,
) -> MongoSummarizer<T, F> {
    Summarizer::new(
        MongoUnitOfWork::new(db.clone()),
        MongoBucketStore::new(db.clone()),
        MongoSummaryStore::new(db.clone()),
        fetcher,
    )
}

/// One summarizer per flavor, dispatched by kind.
pub struct SummarizerRegistry<F: DataFetcher> {
    cgm: MongoSummarizer<Cgm, F>,
    bgm: MongoSummarizer<Bgm, F>,
    con: MongoSummarizer<Continuous, F>,
}

impl<F: DataFetcher> SummarizerRegistry<F> {
    pub fn new(db: &Mongo, fetcher: Arc<F>) -> Self {
        SummarizerRegistry {
            cgm: mongo_summarizer(db, fetcher.clone()),
            bgm: mongo_summarizer(db, fetcher.clone()),
            con: mongo_summarizer(db, fetcher),
        }
    }

    /// Run an update for one user and kind. Flavors have different period
    /// types, so this returns only whether a summary remains.
    pub async fn update_summary(
        &self,
        kind: SummaryKind,
        user_id: &str,
        token: &CancellationToken,
    ) -> SummaryResult<bool> {
        let remains = match kind {
            SummaryKind::Cgm => self.cgm.update_summary(user_id, token).await?.is_some(),
            SummaryKind::Bgm => self.bgm.update_summary(user_id, token).await?.is_some(),
            SummaryKind::Con => self.con.update_summary(user_id, token).await?.is_some(),
        };
        Ok(remains)
    }

    pub fn cgm(&self) -> &MongoSummarizer<Cgm, F> {
        &self.cgm
    }

    pub fn bgm(&self) -> &MongoSummarizer<Bgm, F> {
        &self.bgm
    }

    pub fn con(&self) -> &MongoSummarizer<Continuous, F> {
        &self.con
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gluco_engine::error::SummaryResult;
use gluco_engine::fetch::{DataFetcher, RecordCursor};
use gluco_engine::models::bucket::Bucket;
use gluco_engine::models::summary::{Summary, SummaryFlavor};
use gluco_engine::store::buckets::BucketStore;
use gluco_engine::store::summaries::SummaryStore;
use gluco_engine::txn::UnitOfWork;
use gluco_shared::pagination::Pagination;
use gluco_shared::record::{DeviceRecord, UploadDataSet};
use gluco_shared::status::{DataRange, UserLastUpdated};
use gluco_shared::types::DeviceDataType;
use mongodb::bson::DateTime as BsonDateTime;

pub struct MemoryUnitOfWork;

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    type Txn = ();

    async fn begin(&self) -> SummaryResult<()> {
        Ok(())
    }

    async fn commit(&self, _txn: ()) -> SummaryResult<()> {
        Ok(())
    }

    async fn abort(&self, _txn: ()) -> SummaryResult<()> {
        Ok(())
    }
}

type BucketKey = (String, i64);

/// In-memory bucket store keyed by (user, hour millis). The map iterates
/// oldest-first, so newest-first reads reverse it.
#[derive(Clone)]
pub struct MemoryBucketStore<T: SummaryFlavor> {
    buckets: Arc<Mutex<BTreeMap<BucketKey, Bucket<T::BucketData>>>>,
}

impl<T: SummaryFlavor> MemoryBucketStore<T> {
    pub fn new() -> Self {
        MemoryBucketStore {
            buckets: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn bucket_count(&self, user_id: &str) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .keys()
            .filter(|(user, _)| user == user_id)
            .count()
    }

    fn for_user(&self, user_id: &str) -> Vec<Bucket<T::BucketData>> {
        let mut buckets: Vec<_> = self
            .buckets
            .lock()
            .unwrap()
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, bucket)| bucket.clone())
            .collect();
        buckets.reverse();
        buckets
    }
}

#[async_trait]
impl<T: SummaryFlavor> BucketStore<T> for MemoryBucketStore<T> {
    type Txn = ();

    async fn get_all_buckets(
        &self,
        _txn: &mut (),
        user_id: &str,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        Ok(self.for_user(user_id))
    }

    async fn get_buckets_range(
        &self,
        _txn: &mut (),
        user_id: &str,
        start: BsonDateTime,
        end: BsonDateTime,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        Ok(self
            .for_user(user_id)
            .into_iter()
            .filter(|b| b.time >= start && b.time <= end)
            .collect())
    }

    async fn get_buckets_by_time(
        &self,
        _txn: &mut (),
        user_id: &str,
        hours: &[BsonDateTime],
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        Ok(self
            .for_user(user_id)
            .into_iter()
            .filter(|b| hours.contains(&b.time))
            .collect())
    }

    async fn get_newest(
        &self,
        _txn: &mut (),
        user_id: &str,
    ) -> SummaryResult<Option<Bucket<T::BucketData>>> {
        Ok(self.for_user(user_id).into_iter().next())
    }

    async fn get_oldest(
        &self,
        _txn: &mut (),
        user_id: &str,
    ) -> SummaryResult<Option<Bucket<T::BucketData>>> {
        Ok(self.for_user(user_id).into_iter().last())
    }

    async fn write_modified(
        &self,
        _txn: &mut (),
        buckets: &mut [Bucket<T::BucketData>],
    ) -> SummaryResult<()> {
        let mut map = self.buckets.lock().unwrap();
        for bucket in buckets.iter_mut().filter(|b| b.modified) {
            bucket.modified = false;
            map.insert(
                (bucket.user_id.clone(), bucket.time.timestamp_millis()),
                bucket.clone(),
            );
        }
        Ok(())
    }

    async fn trim_excess(
        &self,
        _txn: &mut (),
        user_id: &str,
        cutoff: BsonDateTime,
    ) -> SummaryResult<u64> {
        let mut map = self.buckets.lock().unwrap();
        let before = map.len();
        map.retain(|(user, millis), _| user != user_id || *millis >= cutoff.timestamp_millis());
        Ok((before - map.len()) as u64)
    }

    async fn clear_invalidated(
        &self,
        txn: &mut (),
        user_id: &str,
        since: BsonDateTime,
    ) -> SummaryResult<Option<BsonDateTime>> {
        {
            let mut map = self.buckets.lock().unwrap();
            map.retain(|(user, millis), _| {
                user != user_id || *millis < since.timestamp_millis()
            });
        }
        let oldest = <Self as BucketStore<T>>::get_oldest(self, txn, user_id).await?;
        Ok(oldest.map(|b| b.first_data))
    }

    async fn reset(&self, _txn: &mut (), user_id: &str) -> SummaryResult<()> {
        self.buckets
            .lock()
            .unwrap()
            .retain(|(user, _), _| user != user_id);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemorySummaryStore<T: SummaryFlavor> {
    summaries: Arc<Mutex<HashMap<String, Summary<T>>>>,
}

impl<T: SummaryFlavor> MemorySummaryStore<T> {
    pub fn new() -> Self {
        MemorySummaryStore {
            summaries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn insert(&self, summary: Summary<T>) {
        self.summaries
            .lock()
            .unwrap()
            .insert(summary.user_id.clone(), summary);
    }

    pub fn stored(&self, user_id: &str) -> Option<Summary<T>> {
        self.summaries.lock().unwrap().get(user_id).cloned()
    }
}

#[async_trait]
impl<T: SummaryFlavor> SummaryStore<T> for MemorySummaryStore<T> {
    type Txn = ();

    async fn get(&self, _txn: &mut (), user_id: &str) -> SummaryResult<Option<Summary<T>>> {
        Ok(self.stored(user_id))
    }

    async fn replace(&self, _txn: &mut (), summary: &Summary<T>) -> SummaryResult<()> {
        self.insert(summary.clone());
        Ok(())
    }

    async fn delete(&self, _txn: &mut (), user_id: &str) -> SummaryResult<()> {
        self.summaries.lock().unwrap().remove(user_id);
        Ok(())
    }

    async fn set_outdated(
        &self,
        txn: &mut (),
        user_id: &str,
        reason: &str,
        now: BsonDateTime,
    ) -> SummaryResult<()> {
        let mut summary = <Self as SummaryStore<T>>::get(self, txn, user_id)
            .await?
            .unwrap_or_else(|| Summary::new(user_id));
        summary.dates.mark_outdated(now, reason);
        self.insert(summary);
        Ok(())
    }

    async fn create_summaries(&self, summaries: &[Summary<T>]) -> SummaryResult<usize> {
        gluco_engine::models::summary::validate_batch(summaries)?;
        for summary in summaries {
            self.insert(summary.clone());
        }
        Ok(summaries.len())
    }

    async fn get_outdated_user_ids(&self, _pagination: Pagination) -> SummaryResult<Vec<String>> {
        let map = self.summaries.lock().unwrap();
        let mut due: Vec<_> = map
            .values()
            .filter_map(|s| s.dates.outdated_since.map(|since| (since, s.user_id.clone())))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, user)| user).collect())
    }

    async fn get_migratable_user_ids(&self, _pagination: Pagination) -> SummaryResult<Vec<String>> {
        let map = self.summaries.lock().unwrap();
        Ok(map
            .values()
            .filter(|s| s.config.schema_version != gluco_shared::types::SUMMARY_SCHEMA_VERSION)
            .map(|s| s.user_id.clone())
            .collect())
    }
}

pub struct VecCursor(pub Vec<DeviceRecord>);

#[async_trait]
impl RecordCursor for VecCursor {
    async fn next(&mut self) -> SummaryResult<Option<DeviceRecord>> {
        if self.0.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.0.remove(0)))
        }
    }
}

/// Fetcher backed by an in-memory record list. Status is derived the way the
/// real data service derives it: `earliest_modified` is the earliest *device
/// time* among records whose modification time is newer than `since`.
pub struct MockFetcher {
    records: Mutex<Vec<DeviceRecord>>,
    uploads: Mutex<HashMap<String, UploadDataSet>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        MockFetcher {
            records: Mutex::new(Vec::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Add records stamped as modified right now, the way a fresh upload
    /// lands.
    pub fn insert(&self, records: impl IntoIterator<Item = DeviceRecord>) {
        let now = Utc::now();
        let mut stored = self.records.lock().unwrap();
        for mut record in records {
            record.modified_time = now;
            stored.push(record);
        }
    }

    pub fn clear_user(&self, user_id: &str) {
        self.records.lock().unwrap().retain(|r| r.user_id != user_id);
    }

    pub fn set_upload(&self, upload_id: &str, is_continuous: bool) {
        self.uploads.lock().unwrap().insert(
            upload_id.to_string(),
            UploadDataSet {
                id: upload_id.to_string(),
                is_continuous,
            },
        );
    }

    fn matching(&self, user_id: &str, data_types: &[DeviceDataType]) -> Vec<DeviceRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && data_types.contains(&r.data_type))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DataFetcher for MockFetcher {
    async fn get_last_updated(
        &self,
        user_id: &str,
        data_types: &[DeviceDataType],
        since: Option<DateTime<Utc>>,
    ) -> SummaryResult<Option<UserLastUpdated>> {
        let records = self.matching(user_id, data_types);
        let Some(first) = records.iter().map(|r| r.time).min() else {
            return Ok(None);
        };
        let last_data = records.iter().map(|r| r.time).max().unwrap_or(first);
        let last_upload = records.iter().map(|r| r.created_time).max().unwrap_or(first);
        let earliest_modified = records
            .iter()
            .filter(|r| since.is_none_or(|s| r.modified_time > s))
            .map(|r| r.time)
            .min();
        Ok(Some(UserLastUpdated {
            earliest_modified,
            first_data: first,
            last_data,
            last_upload,
            next_last_updated: Utc::now(),
        }))
    }

    async fn get_data_range(
        &self,
        user_id: &str,
        data_types: &[DeviceDataType],
        range: DataRange,
    ) -> SummaryResult<Box<dyn RecordCursor>> {
        let mut records: Vec<_> = self
            .matching(user_id, data_types)
            .into_iter()
            .filter(|r| range.contains(r.time))
            .collect();
        records.sort_by_key(|r| r.time);
        Ok(Box::new(VecCursor(records)))
    }

    async fn get_data_set(&self, upload_id: &str) -> SummaryResult<Option<UploadDataSet>> {
        Ok(self.uploads.lock().unwrap().get(upload_id).cloned())
    }
}

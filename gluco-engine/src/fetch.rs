use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gluco_shared::record::{DeviceRecord, UploadDataSet};
use gluco_shared::status::{DataRange, UserLastUpdated};
use gluco_shared::types::DeviceDataType;

use crate::error::SummaryResult;

/// Streaming source of device records, ascending by time.
#[async_trait]
pub trait RecordCursor: Send {
    async fn next(&mut self) -> SummaryResult<Option<DeviceRecord>>;
}

/// Read-only view of the raw device data service.
#[async_trait]
pub trait DataFetcher: Send + Sync + 'static {
    /// Status of the user's data for the given types. `since` restricts the
    /// earliest-modified probe to records touched after that instant; `None`
    /// status means the user has no qualifying data at all.
    async fn get_last_updated(
        &self,
        user_id: &str,
        data_types: &[DeviceDataType],
        since: Option<DateTime<Utc>>,
    ) -> SummaryResult<Option<UserLastUpdated>>;

    /// Records of the given types with time in `(range.start, range.end]`,
    /// ascending.
    async fn get_data_range(
        &self,
        user_id: &str,
        data_types: &[DeviceDataType],
        range: DataRange,
    ) -> SummaryResult<Box<dyn RecordCursor>>;

    async fn get_data_set(&self, upload_id: &str) -> SummaryResult<Option<UploadDataSet>>;
}

/// Cursor adapter that drops records from non-continuous uploads. Upload
/// lookups are memoized per cursor since a stream typically interleaves a
/// handful of upload ids across thousands of records.
pub struct ContinuousRecordCursor<F: DataFetcher> {
    inner: Box<dyn RecordCursor>,
    fetcher: Arc<F>,
    upload_cache: HashMap<String, bool>,
}

impl<F: DataFetcher> ContinuousRecordCursor<F> {
    pub fn new(inner: Box<dyn RecordCursor>, fetcher: Arc<F>) -> Self {
        ContinuousRecordCursor {
            inner,
            fetcher,
            upload_cache: HashMap::new(),
        }
    }

    async fn is_continuous(&mut self, upload_id: &str) -> SummaryResult<bool> {
        if let Some(&continuous) = self.upload_cache.get(upload_id) {
            return Ok(continuous);
        }
        let continuous = self
            .fetcher
            .get_data_set(upload_id)
            .await?
            .is_some_and(|set| set.is_continuous);
        self.upload_cache.insert(upload_id.to_string(), continuous);
        Ok(continuous)
    }
}

#[async_trait]
impl<F: DataFetcher> RecordCursor for ContinuousRecordCursor<F> {
    async fn next(&mut self) -> SummaryResult<Option<DeviceRecord>> {
        while let Some(record) = self.inner.next().await? {
            if self.is_continuous(&record.upload_id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

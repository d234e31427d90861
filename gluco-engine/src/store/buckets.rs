use std::marker::PhantomData;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::ClientSession;
use mongodb::bson::{DateTime, doc};

use crate::db::Mongo;
use crate::error::SummaryResult;
use crate::models::bucket::Bucket;
use crate::models::summary::SummaryFlavor;

/// Per-hour bucket persistence for one summary flavor. Every operation runs
/// inside the caller's transaction.
///
/// `get_all_buckets` returns a materialized vector rather than a cursor:
/// retention caps a user at 60 days of hourly buckets, so the worst case is
/// 1440 small documents.
#[async_trait]
pub trait BucketStore<T: SummaryFlavor>: Send + Sync {
    type Txn: Send;

    /// All buckets for a user, newest first.
    async fn get_all_buckets(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>>;

    /// Buckets whose hour falls in `[start, end]`, newest first.
    async fn get_buckets_range(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
        start: DateTime,
        end: DateTime,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>>;

    /// Buckets at exactly the given hour boundaries.
    async fn get_buckets_by_time(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
        hours: &[DateTime],
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>>;

    async fn get_newest(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
    ) -> SummaryResult<Option<Bucket<T::BucketData>>>;

    async fn get_oldest(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
    ) -> SummaryResult<Option<Bucket<T::BucketData>>>;

    /// Upsert every bucket flagged modified and clear the flags.
    async fn write_modified(
        &self,
        txn: &mut Self::Txn,
        buckets: &mut [Bucket<T::BucketData>],
    ) -> SummaryResult<()>;

    /// Drop buckets older than the retention cutoff.
    async fn trim_excess(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
        cutoff: DateTime,
    ) -> SummaryResult<u64>;

    /// Drop buckets at or after the invalidation hour and report the oldest
    /// surviving record time, if any.
    async fn clear_invalidated(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
        since: DateTime,
    ) -> SummaryResult<Option<DateTime>>;

    /// Drop all buckets for a user.
    async fn reset(&self, txn: &mut Self::Txn, user_id: &str) -> SummaryResult<()>;
}

pub struct MongoBucketStore<T> {
    db: Mongo,
    _flavor: PhantomData<T>,
}

impl<T> MongoBucketStore<T> {
    pub fn new(db: Mongo) -> Self {
        MongoBucketStore {
            db,
            _flavor: PhantomData,
        }
    }
}

impl<T: SummaryFlavor> MongoBucketStore<T> {
    async fn find_sorted(
        &self,
        txn: &mut ClientSession,
        filter: mongodb::bson::Document,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        let mut cursor = self
            .db
            .buckets::<T::BucketData>()
            .find(filter)
            .sort(doc! { "time": -1 })
            .session(&mut *txn)
            .await?;
        let buckets = cursor.stream(txn).try_collect().await?;
        Ok(buckets)
    }
}

#[async_trait]
impl<T: SummaryFlavor> BucketStore<T> for MongoBucketStore<T> {
    type Txn = ClientSession;

    async fn get_all_buckets(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        self.find_sorted(txn, doc! { "user_id": user_id, "type": T::KIND.as_str() })
            .await
    }

    async fn get_buckets_range(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
        start: DateTime,
        end: DateTime,
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        self.find_sorted(
            txn,
            doc! {
                "user_id": user_id,
                "type": T::KIND.as_str(),
                "time": { "$gte": start, "$lte": end },
            },
        )
        .await
    }

    async fn get_buckets_by_time(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
        hours: &[DateTime],
    ) -> SummaryResult<Vec<Bucket<T::BucketData>>> {
        if hours.is_empty() {
            return Ok(Vec::new());
        }
        self.find_sorted(
            txn,
            doc! {
                "user_id": user_id,
                "type": T::KIND.as_str(),
                "time": { "$in": hours.to_vec() },
            },
        )
        .await
    }

    async fn get_newest(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
    ) -> SummaryResult<Option<Bucket<T::BucketData>>> {
        let bucket = self
            .db
            .buckets::<T::BucketData>()
            .find_one(doc! { "user_id": user_id, "type": T::KIND.as_str() })
            .sort(doc! { "time": -1 })
            .session(txn)
            .await?;
        Ok(bucket)
    }

    async fn get_oldest(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
    ) -> SummaryResult<Option<Bucket<T::BucketData>>> {
        let bucket = self
            .db
            .buckets::<T::BucketData>()
            .find_one(doc! { "user_id": user_id, "type": T::KIND.as_str() })
            .sort(doc! { "time": 1 })
            .session(txn)
            .await?;
        Ok(bucket)
    }

    async fn write_modified(
        &self,
        txn: &mut ClientSession,
        buckets: &mut [Bucket<T::BucketData>],
    ) -> SummaryResult<()> {
        let col = self.db.buckets::<T::BucketData>();
        for bucket in buckets.iter_mut().filter(|b| b.modified) {
            col.replace_one(
                doc! {
                    "user_id": &bucket.user_id,
                    "type": bucket.kind.as_str(),
                    "time": bucket.time,
                },
                &*bucket,
            )
            .upsert(true)
            .session(&mut *txn)
            .await?;
            bucket.modified = false;
        }
        Ok(())
    }

    async fn trim_excess(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
        cutoff: DateTime,
    ) -> SummaryResult<u64> {
        let result = self
            .db
            .buckets::<T::BucketData>()
            .delete_many(doc! {
                "user_id": user_id,
                "type": T::KIND.as_str(),
                "time": { "$lt": cutoff },
            })
            .session(txn)
            .await?;
        Ok(result.deleted_count)
    }

    async fn clear_invalidated(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
        since: DateTime,
    ) -> SummaryResult<Option<DateTime>> {
        self.db
            .buckets::<T::BucketData>()
            .delete_many(doc! {
                "user_id": user_id,
                "type": T::KIND.as_str(),
                "time": { "$gte": since },
            })
            .session(&mut *txn)
            .await?;
        let oldest = <Self as BucketStore<T>>::get_oldest(self, txn, user_id).await?;
        Ok(oldest.map(|bucket| bucket.first_data))
    }

    async fn reset(&self, txn: &mut ClientSession, user_id: &str) -> SummaryResult<()> {
        self.db
            .buckets::<T::BucketData>()
            .delete_many(doc! { "user_id": user_id, "type": T::KIND.as_str() })
            .session(txn)
            .await?;
        Ok(())
    }
}

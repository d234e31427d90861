use std::marker::PhantomData;

use async_trait::async_trait;
use futures::TryStreamExt;
use gluco_shared::pagination::Pagination;
use gluco_shared::types::SUMMARY_SCHEMA_VERSION;
use mongodb::ClientSession;
use mongodb::bson::{Bson, DateTime, doc};

use crate::db::Mongo;
use crate::error::{SummaryError, SummaryResult};
use crate::models::summary::{Summary, SummaryFlavor, validate_batch};

/// Summary document persistence for one flavor. Single-document operations
/// take the caller's transaction; the listing queries run outside one, since
/// workers use them only to pick users to process.
#[async_trait]
pub trait SummaryStore<T: SummaryFlavor>: Send + Sync {
    type Txn: Send;

    async fn get(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
    ) -> SummaryResult<Option<Summary<T>>>;

    /// Upsert the full document.
    async fn replace(&self, txn: &mut Self::Txn, summary: &Summary<T>) -> SummaryResult<()>;

    async fn delete(&self, txn: &mut Self::Txn, user_id: &str) -> SummaryResult<()>;

    /// Flag a user's summary for recomputation, creating a placeholder
    /// summary if none exists yet.
    async fn set_outdated(
        &self,
        txn: &mut Self::Txn,
        user_id: &str,
        reason: &str,
        now: DateTime,
    ) -> SummaryResult<()>;

    /// Bulk insert for backfill tooling.
    async fn create_summaries(&self, summaries: &[Summary<T>]) -> SummaryResult<usize>;

    /// Users flagged outdated, oldest flag first.
    async fn get_outdated_user_ids(&self, pagination: Pagination) -> SummaryResult<Vec<String>>;

    /// Users whose summaries were computed under an older schema, most
    /// recently active first.
    async fn get_migratable_user_ids(&self, pagination: Pagination) -> SummaryResult<Vec<String>>;
}

pub struct MongoSummaryStore<T> {
    db: Mongo,
    _flavor: PhantomData<T>,
}

impl<T> MongoSummaryStore<T> {
    pub fn new(db: Mongo) -> Self {
        MongoSummaryStore {
            db,
            _flavor: PhantomData,
        }
    }
}

impl<T: SummaryFlavor> MongoSummaryStore<T> {
    fn check(summary: &Summary<T>) -> SummaryResult<()> {
        if summary.kind != T::KIND {
            return Err(SummaryError::TypeMismatch {
                index: 0,
                expected: T::KIND,
                actual: summary.kind,
            });
        }
        if summary.user_id.is_empty() {
            return Err(SummaryError::precondition("summary has no user id"));
        }
        Ok(())
    }

    async fn user_ids(
        &self,
        filter: mongodb::bson::Document,
        sort: mongodb::bson::Document,
        pagination: Pagination,
    ) -> SummaryResult<Vec<String>> {
        let summaries: Vec<Summary<T>> = self
            .db
            .summaries::<T>()
            .find(filter)
            .sort(sort)
            .skip(pagination.offset)
            .limit(pagination.limit as i64)
            .await?
            .try_collect()
            .await?;
        Ok(summaries.into_iter().map(|s| s.user_id).collect())
    }
}

#[async_trait]
impl<T: SummaryFlavor> SummaryStore<T> for MongoSummaryStore<T> {
    type Txn = ClientSession;

    async fn get(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
    ) -> SummaryResult<Option<Summary<T>>> {
        let summary = self
            .db
            .summaries::<T>()
            .find_one(doc! { "user_id": user_id, "type": T::KIND.as_str() })
            .session(txn)
            .await?;
        Ok(summary)
    }

    async fn replace(&self, txn: &mut ClientSession, summary: &Summary<T>) -> SummaryResult<()> {
        Self::check(summary)?;
        self.db
            .summaries::<T>()
            .replace_one(
                doc! { "user_id": &summary.user_id, "type": T::KIND.as_str() },
                summary,
            )
            .upsert(true)
            .session(txn)
            .await?;
        Ok(())
    }

    async fn delete(&self, txn: &mut ClientSession, user_id: &str) -> SummaryResult<()> {
        self.db
            .summaries::<T>()
            .delete_one(doc! { "user_id": user_id, "type": T::KIND.as_str() })
            .session(txn)
            .await?;
        Ok(())
    }

    async fn set_outdated(
        &self,
        txn: &mut ClientSession,
        user_id: &str,
        reason: &str,
        now: DateTime,
    ) -> SummaryResult<()> {
        let mut summary = <Self as SummaryStore<T>>::get(self, txn, user_id)
            .await?
            .unwrap_or_else(|| Summary::new(user_id));
        summary.dates.mark_outdated(now, reason);
        <Self as SummaryStore<T>>::replace(self, txn, &summary).await
    }

    async fn create_summaries(&self, summaries: &[Summary<T>]) -> SummaryResult<usize> {
        validate_batch(summaries)?;
        if summaries.is_empty() {
            return Ok(0);
        }
        let result = self.db.summaries::<T>().insert_many(summaries).await?;
        Ok(result.inserted_ids.len())
    }

    async fn get_outdated_user_ids(&self, pagination: Pagination) -> SummaryResult<Vec<String>> {
        self.user_ids(
            doc! {
                "type": T::KIND.as_str(),
                "dates.outdated_since": { "$ne": Bson::Null },
            },
            doc! { "dates.outdated_since": 1 },
            pagination,
        )
        .await
    }

    async fn get_migratable_user_ids(&self, pagination: Pagination) -> SummaryResult<Vec<String>> {
        self.user_ids(
            doc! {
                "type": T::KIND.as_str(),
                "config.schema_version": { "$ne": SUMMARY_SCHEMA_VERSION },
            },
            doc! { "dates.last_updated_date": -1 },
            pagination,
        )
        .await
    }
}

use std::collections::HashSet;

use futures::TryStreamExt;
use gluco_shared::pagination::Pagination;
use gluco_shared::types::SummaryKind;
use mongodb::bson::{DateTime, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::Mongo;
use crate::error::SummaryResult;

/// Deferred outdated-notification record. Workers poll these to find users
/// whose summaries went stale, honoring `due_time` as a debounce horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutdatedEventDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: SummaryKind,
    pub reason: String,
    pub recorded_time: DateTime,
    pub due_time: DateTime,
}

#[derive(Clone)]
pub struct MongoOutdatedEvents {
    db: Mongo,
}

impl MongoOutdatedEvents {
    pub fn new(db: Mongo) -> Self {
        MongoOutdatedEvents { db }
    }

    pub async fn record(
        &self,
        user_id: &str,
        kind: SummaryKind,
        reason: &str,
        now: DateTime,
        due_time: DateTime,
    ) -> SummaryResult<()> {
        let event = OutdatedEventDoc {
            id: None,
            user_id: user_id.to_string(),
            kind,
            reason: reason.to_string(),
            recorded_time: now,
            due_time,
        };
        self.db.summary_events().insert_one(&event).await?;
        Ok(())
    }

    /// Users whose events came due, oldest first. Logs the lag between the
    /// oldest due event and now so worker backlog is visible.
    pub async fn get_outdated_user_ids(
        &self,
        kind: SummaryKind,
        now: DateTime,
        pagination: Pagination,
    ) -> SummaryResult<Vec<String>> {
        let events: Vec<OutdatedEventDoc> = self
            .db
            .summary_events()
            .find(doc! {
                "type": kind.as_str(),
                "due_time": { "$lte": now },
            })
            .sort(doc! { "due_time": 1 })
            .skip(pagination.offset)
            .limit(pagination.limit as i64)
            .await?
            .try_collect()
            .await?;

        if let Some(oldest) = events.first() {
            let lag_millis = now.timestamp_millis() - oldest.due_time.timestamp_millis();
            info!(kind = kind.as_str(), lag_millis, "outdated event backlog");
        }

        Ok(dedup_user_ids(
            events.into_iter().map(|e| e.user_id).collect(),
        ))
    }
}

/// Drop repeated users while keeping due-time order. Events are sorted by
/// due time, so one user's events can be interleaved with another's.
fn dedup_user_ids(user_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    user_ids
        .into_iter()
        .filter(|user_id| seen.insert(user_id.clone()))
        .collect()
}

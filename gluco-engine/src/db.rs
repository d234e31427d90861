use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};

use crate::error::SummaryResult;
use crate::models::bucket::{Bucket, BucketData};
use crate::models::summary::{Summary, SummaryFlavor};
use crate::store::events::OutdatedEventDoc;

pub const BUCKETS_COLLECTION: &str = "buckets";
pub const SUMMARIES_COLLECTION: &str = "summaries";
pub const SUMMARY_EVENTS_COLLECTION: &str = "summary_events";

#[derive(Clone)]
pub struct Mongo {
    pub client: Client,
    pub db_name: String,
}

impl Mongo {
    pub async fn connect(url: &str, db_name: &str) -> SummaryResult<Self> {
        let mut opts = ClientOptions::parse(url).await?;
        opts.app_name = Some("gluco-engine".into());
        let client = Client::with_options(opts)?;
        Ok(Self {
            client,
            db_name: db_name.into(),
        })
    }

    pub fn col<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.db_name).collection(name)
    }

    pub fn buckets<D: BucketData>(&self) -> Collection<Bucket<D>> {
        self.col(BUCKETS_COLLECTION)
    }

    pub fn summaries<T: SummaryFlavor>(&self) -> Collection<Summary<T>> {
        self.col(SUMMARIES_COLLECTION)
    }

    pub fn summary_events(&self) -> Collection<OutdatedEventDoc> {
        self.col(SUMMARY_EVENTS_COLLECTION)
    }

    pub async fn ensure_indexes(&self) -> SummaryResult<()> {
        // One bucket per user, kind, and hour.
        self.col::<Document>(BUCKETS_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "type": 1, "time": -1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        // One summary per user and kind.
        self.col::<Document>(SUMMARIES_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "type": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        // Outdated-summary worker scan, oldest due first.
        self.col::<Document>(SUMMARIES_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "type": 1, "dates.outdated_since": 1 })
                    .build(),
            )
            .await?;

        // Schema migration scan, most recently updated first.
        self.col::<Document>(SUMMARIES_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! {
                        "type": 1,
                        "config.schema_version": 1,
                        "dates.last_updated_date": -1,
                    })
                    .build(),
            )
            .await?;

        self.col::<Document>(SUMMARY_EVENTS_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "type": 1, "due_time": 1 })
                    .build(),
            )
            .await?;

        Ok(())
    }
}

pub mod buckets;
pub mod events;
pub mod summaries;

pub use buckets::{BucketStore, MongoBucketStore};
pub use events::MongoOutdatedEvents;
pub use summaries::{MongoSummaryStore, SummaryStore};

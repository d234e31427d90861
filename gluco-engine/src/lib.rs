pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod store;
pub mod summarizer;
pub mod txn;
pub mod util;

pub use error::{SummaryError, SummaryResult};

use gluco_shared::types::SummaryKind;
use thiserror::Error;

pub type SummaryResult<T> = Result<T, SummaryError>;

#[derive(Debug, Error)]
pub enum SummaryError {
    /// Caller handed us unusable input; nothing was mutated.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A temporal invariant was broken (out-of-order buckets, duplicate
    /// timestamps). Fatal for the current update.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("summary kind mismatch at index {index}: expected {expected}, got {actual}")]
    TypeMismatch {
        index: usize,
        expected: SummaryKind,
        actual: SummaryKind,
    },

    #[error("invalid summary at index {index}: {reason}")]
    InvalidBatch { index: usize, reason: String },

    #[error("update cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] mongodb::error::Error),

    #[error("data fetch error: {0}")]
    Fetch(String),
}

impl SummaryError {
    pub fn precondition(message: &str) -> Self {
        SummaryError::Precondition(message.to_string())
    }

    pub fn invariant(message: &str) -> Self {
        SummaryError::Invariant(message.to_string())
    }

    pub fn fetch(message: &str) -> Self {
        SummaryError::Fetch(message.to_string())
    }
}

use docket_store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfilerError {
    /// Only 0, 1 and 2 are valid levels
    #[error("invalid profiling level {0}, expected 0, 1 or 2")]
    InvalidLevel(i64),

    /// The profile log rejected a record
    #[error("profile log write failed: {0}")]
    Sink(#[from] StoreError),

    #[error("profile record could not be encoded: {0}")]
    Encode(String),
}

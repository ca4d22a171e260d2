use docket_eval::EvalError;
use docket_profiler::ProfilerError;
use docket_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("invalid profiling level {0}, expected 0, 1 or 2")]
    InvalidProfilingLevel(i64),

    /// A document in `system.profile` is not a profile record
    #[error("malformed profile record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ProfilerError> for DbError {
    fn from(err: ProfilerError) -> Self {
        match err {
            ProfilerError::InvalidLevel(level) => DbError::InvalidProfilingLevel(level),
            ProfilerError::Sink(err) => DbError::Store(err),
            ProfilerError::Encode(message) => DbError::MalformedRecord(message),
        }
    }
}

use thiserror::Error;

/// Errors raised by the document store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("invalid namespace: '{0}'")]
    InvalidNamespace(String),

    #[error("document must be an object, got {0}")]
    InvalidDocument(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid sort: {0}")]
    InvalidSort(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("collection '{0}' is not capped")]
    NotCapped(String),

    #[error("collection '{0}' is unavailable")]
    Unavailable(String),
}

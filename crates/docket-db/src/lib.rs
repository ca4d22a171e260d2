//! docket-db: a named database over the shared store
//!
//! [`Database`] is the entry point for callers. It owns the profiler for its
//! namespace and runs `eval` scripts with a [`docket_eval::DataAccess`] that
//! routes back through its own profiled operations.

mod access;
mod config;
mod database;
mod error;

pub use config::{ConfigError, DbConfig};
pub use database::Database;
pub use error::DbError;

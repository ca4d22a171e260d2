//! docket-profiler: per-operation profiling
//!
//! Operations call [`Profiler::start`] when they begin and
//! [`Profiler::record_if_enabled`] when they complete. Depending on the
//! level in force at the start, a [`ProfileRecord`] is appended to the sink,
//! normally the capped `system.profile` collection of the operation's
//! database. Records land in completion order and carry a strictly
//! increasing `seq`.

mod error;
mod level;
mod profiler;
mod record;
mod sink;

pub use error::ProfilerError;
pub use level::ProfilingLevel;
pub use profiler::{ActiveOp, ProfileStatus, Profiler, DEFAULT_SLOW_MS};
pub use record::{OpKind, OpMeta, ProfileRecord};
pub use sink::{MemorySink, ProfileSink, StoreSink, PROFILE_COLLECTION};

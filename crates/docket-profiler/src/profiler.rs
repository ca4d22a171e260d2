use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::level::ProfilingLevel;
use crate::record::{OpMeta, ProfileRecord};
use crate::sink::ProfileSink;

/// Default slow-operation threshold in milliseconds
pub const DEFAULT_SLOW_MS: u64 = 100;

/// Answer to the administrative level call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatus {
    /// Level before the call
    pub was: ProfilingLevel,
    #[serde(rename = "slowms")]
    pub slow_ms: u64,
}

/// An operation that has started but not yet completed.
///
/// Captures the level and threshold in force at start, so a level change
/// only affects operations started after it.
#[derive(Debug, Clone)]
pub struct ActiveOp {
    level: ProfilingLevel,
    slow_ms: u64,
    started: Instant,
    ts: DateTime<Utc>,
}

impl ActiveOp {
    pub fn level(&self) -> ProfilingLevel {
        self.level
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Records completed operations into a [`ProfileSink`]
pub struct Profiler {
    level: AtomicU8,
    slow_ms: AtomicU64,
    sink: Arc<dyn ProfileSink>,
    /// Next sequence number; held while appending so sequence order is log order
    next_seq: Mutex<u64>,
    written: AtomicU64,
    write_failures: AtomicU64,
}

impl Profiler {
    /// A profiler that starts `Off`
    pub fn new(sink: Arc<dyn ProfileSink>, slow_ms: u64) -> Self {
        Self {
            level: AtomicU8::new(ProfilingLevel::Off.as_u8()),
            slow_ms: AtomicU64::new(slow_ms),
            sink,
            next_seq: Mutex::new(1),
            written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    pub fn level(&self) -> ProfilingLevel {
        ProfilingLevel::from_u8(self.level.load(Ordering::SeqCst))
    }

    pub fn slow_ms(&self) -> u64 {
        self.slow_ms.load(Ordering::SeqCst)
    }

    /// Current level and threshold, reported as `was`
    pub fn status(&self) -> ProfileStatus {
        ProfileStatus {
            was: self.level(),
            slow_ms: self.slow_ms(),
        }
    }

    /// Set the level (and optionally the slow threshold); returns the previous state
    pub fn set_level(&self, level: ProfilingLevel, slow_ms: Option<u64>) -> ProfileStatus {
        let previous_slow = match slow_ms {
            Some(ms) => self.slow_ms.swap(ms, Ordering::SeqCst),
            None => self.slow_ms(),
        };
        let was = ProfilingLevel::from_u8(self.level.swap(level.as_u8(), Ordering::SeqCst));
        if was != level || slow_ms.is_some_and(|ms| ms != previous_slow) {
            info!(
                was = was.as_u8(),
                level = level.as_u8(),
                slow_ms = self.slow_ms(),
                "profiler.level.changed"
            );
        }
        ProfileStatus {
            was,
            slow_ms: previous_slow,
        }
    }

    /// Mark the start of an operation
    pub fn start(&self) -> ActiveOp {
        ActiveOp {
            level: self.level(),
            slow_ms: self.slow_ms(),
            started: Instant::now(),
            ts: Utc::now(),
        }
    }

    /// Record a completed operation if the level captured at its start asks for it.
    ///
    /// Returns whether a record was written. Sink failures are counted and
    /// logged, never returned.
    pub fn record_if_enabled(&self, op: ActiveOp, meta: OpMeta) -> bool {
        let elapsed = op.elapsed();
        let wanted = match op.level {
            ProfilingLevel::Off => false,
            ProfilingLevel::SlowOnly => elapsed > Duration::from_millis(op.slow_ms),
            ProfilingLevel::All => true,
        };
        if !wanted {
            return false;
        }

        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut next_seq = self.next_seq.lock();
        let record = ProfileRecord {
            seq: *next_seq,
            ts: op.ts,
            micros,
            op: meta.kind,
            ns: meta.ns,
            info: meta.info,
            nreturned: meta.nreturned,
            nscanned: meta.nscanned,
            error: meta.error,
        };
        match self.sink.append(&record) {
            Ok(()) => {
                *next_seq += 1;
                drop(next_seq);
                self.written.fetch_add(1, Ordering::Relaxed);
                debug!(seq = record.seq, ns = %record.ns, micros, "profiler.append");
                true
            }
            Err(error) => {
                drop(next_seq);
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%error, ns = %record.ns, "profiler.append.failed");
                false
            }
        }
    }

    /// Records successfully appended since creation
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Appends that failed since creation
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfilerError;
    use crate::record::OpKind;
    use crate::sink::MemorySink;
    use docket_store::StoreError;

    struct FailingSink;

    impl ProfileSink for FailingSink {
        fn append(&self, _record: &ProfileRecord) -> Result<(), ProfilerError> {
            Err(ProfilerError::Sink(StoreError::Unavailable(
                "test.system.profile".into(),
            )))
        }
    }

    fn setup() -> (Arc<MemorySink>, Profiler) {
        let sink = Arc::new(MemorySink::new());
        let profiler = Profiler::new(sink.clone(), DEFAULT_SLOW_MS);
        (sink, profiler)
    }

    fn meta(info: &str) -> OpMeta {
        OpMeta::new(OpKind::Query, "test.t", info)
    }

    #[test]
    fn test_starts_off() {
        let (sink, profiler) = setup();
        assert_eq!(profiler.level(), ProfilingLevel::Off);
        let op = profiler.start();
        assert!(!profiler.record_if_enabled(op, meta("q")));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_level_all_records_every_op() {
        let (sink, profiler) = setup();
        profiler.set_level(ProfilingLevel::All, None);
        for i in 0..5 {
            let op = profiler.start();
            assert!(profiler.record_if_enabled(op, meta(&format!("q{}", i))));
        }
        let records = sink.records();
        assert_eq!(records.len(), 5);
        let seqs: Vec<_> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(records[3].info, "q3");
        assert_eq!(profiler.records_written(), 5);
    }

    #[test]
    fn test_slow_only_uses_threshold() {
        let (sink, profiler) = setup();
        profiler.set_level(ProfilingLevel::SlowOnly, Some(5));
        let fast = profiler.start();
        assert!(!profiler.record_if_enabled(fast, meta("fast")));

        let slow = profiler.start();
        std::thread::sleep(Duration::from_millis(20));
        assert!(profiler.record_if_enabled(slow, meta("slow")));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].info, "slow");
        assert!(records[0].micros >= 20_000);
    }

    #[test]
    fn test_in_flight_op_keeps_start_level() {
        let (sink, profiler) = setup();
        profiler.set_level(ProfilingLevel::All, None);
        let in_flight = profiler.start();
        profiler.set_level(ProfilingLevel::Off, None);
        let later = profiler.start();

        assert!(profiler.record_if_enabled(in_flight, meta("before")));
        assert!(!profiler.record_if_enabled(later, meta("after")));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_set_level_returns_previous() {
        let (_, profiler) = setup();
        let status = profiler.set_level(ProfilingLevel::All, Some(7));
        assert_eq!(status.was, ProfilingLevel::Off);
        assert_eq!(status.slow_ms, DEFAULT_SLOW_MS);
        let status = profiler.set_level(ProfilingLevel::Off, None);
        assert_eq!(status.was, ProfilingLevel::All);
        assert_eq!(status.slow_ms, 7);
    }

    #[test]
    fn test_repeated_off_is_idempotent() {
        let (_, profiler) = setup();
        profiler.set_level(ProfilingLevel::All, None);
        let first = profiler.set_level(ProfilingLevel::Off, None);
        let second = profiler.set_level(ProfilingLevel::Off, None);
        let third = profiler.set_level(ProfilingLevel::Off, None);
        assert_eq!(first.was, ProfilingLevel::All);
        assert_eq!(second.was, ProfilingLevel::Off);
        assert_eq!(second, third);
        assert_eq!(profiler.level(), ProfilingLevel::Off);
    }

    #[test]
    fn test_sink_failure_is_counted_not_raised() {
        let profiler = Profiler::new(Arc::new(FailingSink), DEFAULT_SLOW_MS);
        profiler.set_level(ProfilingLevel::All, None);
        for _ in 0..3 {
            let op = profiler.start();
            assert!(!profiler.record_if_enabled(op, meta("q")));
        }
        assert_eq!(profiler.write_failures(), 3);
        assert_eq!(profiler.records_written(), 0);
    }

    #[test]
    fn test_concurrent_appends_are_totally_ordered() {
        let (sink, profiler) = setup();
        profiler.set_level(ProfilingLevel::All, None);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let profiler = &profiler;
                scope.spawn(move || {
                    for i in 0..50 {
                        let op = profiler.start();
                        profiler.record_if_enabled(op, meta(&format!("t{}-{}", t, i)));
                    }
                });
            }
        });
        let records = sink.records();
        assert_eq!(records.len(), 400);
        // Log order is sequence order with no gaps
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.seq, i as u64 + 1);
        }
    }
}

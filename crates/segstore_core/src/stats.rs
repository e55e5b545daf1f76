//! Store statistics.
//!
//! Counters are atomic and may be read while operations are in progress.
//!
//! ```rust,ignore
//! let store = ArrayStore::open_dynamic(path, StoreConfig::default())?;
//! store.set(3, b"value")?;
//!
//! let stats = store.stats();
//! println!("writes: {}, checkpoints: {}", stats.writes, stats.checkpoints);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of one open store.
#[derive(Debug, Default)]
pub struct StoreStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    checkpoints: AtomicU64,
    segments_compacted: AtomicU64,
    records_relocated: AtomicU64,
    compaction_failures: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self, relocated: u64) {
        self.segments_compacted.fetch_add(1, Ordering::Relaxed);
        self.records_relocated.fetch_add(relocated, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction_failure(&self) {
        self.compaction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            segments_compacted: self.segments_compacted.load(Ordering::Relaxed),
            records_relocated: self.records_relocated.load(Ordering::Relaxed),
            compaction_failures: self.compaction_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful `get` calls that returned a value.
    pub reads: u64,
    /// `set` and `set_expand` calls.
    pub writes: u64,
    /// `delete` calls that removed a value.
    pub deletes: u64,
    /// Payload bytes returned by reads.
    pub bytes_read: u64,
    /// Payload bytes accepted by writes.
    pub bytes_written: u64,
    /// Checkpoints written since open.
    pub checkpoints: u64,
    /// Segments emptied by compaction.
    pub segments_compacted: u64,
    /// Records copied by compaction.
    pub records_relocated: u64,
    /// Compaction attempts aborted by an error.
    pub compaction_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(StoreStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = StoreStats::new();
        stats.record_read(100);
        stats.record_read(50);
        stats.record_write(200);
        stats.record_delete();
        stats.record_compaction(7);

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.bytes_read, 150);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.bytes_written, 200);
        assert_eq!(snap.deletes, 1);
        assert_eq!(snap.segments_compacted, 1);
        assert_eq!(snap.records_relocated, 7);
    }

    #[test]
    fn concurrent_updates() {
        let stats = Arc::new(StoreStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_read(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().reads, 800);
    }
}

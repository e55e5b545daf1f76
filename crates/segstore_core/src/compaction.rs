//! Segment compaction.
//!
//! Compaction copies the records a sparse segment still owns into a fresh
//! target segment, then retires the source. It runs beside the writer and
//! coordinates with it only through slot compare-and-set:
//!
//! - a record is copied only while its slot holds exactly the source address
//! - the slot moves to the copy only if it still holds that address
//! - a lost race leaves the writer's value in place and discards the copy
//!
//! A source with no live bytes left becomes recyclable. Its storage is
//! released once a checkpoint has recorded the relocated slots.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexArray;
use crate::segment::{Segment, SegmentManager, SegmentStatus, RECORD_OVERHEAD};
use crate::types::{Address, SegmentId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of compacting one segment.
#[derive(Debug)]
pub struct SegmentCompaction {
    /// The source segment.
    pub segment: SegmentId,
    /// Frames walked.
    pub records_scanned: u64,
    /// Frames copied and re-pointed.
    pub records_relocated: u64,
    /// Frame bytes copied and re-pointed.
    pub bytes_relocated: u64,
    /// Why the segment was left in place, if it was.
    pub error: Option<CoreError>,
}

impl SegmentCompaction {
    fn new(segment: SegmentId) -> Self {
        Self {
            segment,
            records_scanned: 0,
            records_relocated: 0,
            bytes_relocated: 0,
            error: None,
        }
    }

    /// Returns true if the source became recyclable.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a compaction pass over every candidate.
#[derive(Debug, Default)]
pub struct CompactionReport {
    /// One entry per segment attempted, in order.
    pub segments: Vec<SegmentCompaction>,
}

impl CompactionReport {
    /// Segments that became recyclable.
    pub fn recycled(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments
            .iter()
            .filter(|s| s.succeeded())
            .map(|s| s.segment)
    }

    /// Segments left in place because of an error.
    pub fn failures(&self) -> impl Iterator<Item = &SegmentCompaction> {
        self.segments.iter().filter(|s| !s.succeeded())
    }

    /// Total records relocated.
    #[must_use]
    pub fn records_relocated(&self) -> u64 {
        self.segments.iter().map(|s| s.records_relocated).sum()
    }
}

/// Relocates live records out of sparse segments.
///
/// One `Compactor` is one pass. Copies go into a target segment that is
/// rotated when full. [`Compactor::finish`] hands a target with room left
/// back to the caller, so the next pass keeps filling it instead of leaving
/// a sparse segment behind.
pub struct Compactor<'a> {
    array: &'a IndexArray,
    segments: &'a SegmentManager,
    factor: f64,
    compacting: &'a AtomicU32,
    target: Option<Arc<Segment>>,
    skipped: Vec<SegmentId>,
}

impl<'a> Compactor<'a> {
    /// Starts a pass, appending copies to `target` while it has room.
    ///
    /// `compacting` is published with the id of the segment in flight so a
    /// checkpoint can record it.
    pub fn new(
        array: &'a IndexArray,
        segments: &'a SegmentManager,
        factor: f64,
        compacting: &'a AtomicU32,
        target: Option<Arc<Segment>>,
    ) -> Self {
        let target = target.filter(|t| t.status() == SegmentStatus::Writable);
        Self {
            array,
            segments,
            factor,
            compacting,
            target,
            skipped: Vec::new(),
        }
    }

    /// Compacts the sparsest candidate segment.
    ///
    /// Returns `None` when no read-only segment is below the factor. A
    /// segment that fails is skipped for the rest of the pass.
    pub fn compact_once(&mut self) -> Option<SegmentCompaction> {
        let source = self.segments.compaction_candidate(self.factor, &self.skipped)?;
        if !source.transition(SegmentStatus::ReadOnly, SegmentStatus::Compacting) {
            // Raced with a clear.
            self.skipped.push(source.id());
            let mut report = SegmentCompaction::new(source.id());
            report.error = Some(CoreError::invalid_operation(format!(
                "{} left the read-only state",
                source.id()
            )));
            return Some(report);
        }
        self.compacting.store(source.id().as_u32(), Ordering::Release);

        let mut report = SegmentCompaction::new(source.id());
        let result = self
            .relocate(&source, &mut report)
            .and_then(|()| match source.live_bytes() {
                0 => Ok(()),
                live => Err(CoreError::invalid_operation(format!(
                    "{live} live bytes remain in {} after relocation",
                    source.id()
                ))),
            });

        match result {
            Ok(()) => {
                source.transition(SegmentStatus::Compacting, SegmentStatus::Recyclable);
                info!(
                    segment = %source.id(),
                    relocated = report.records_relocated,
                    bytes = report.bytes_relocated,
                    "compacted segment"
                );
            }
            Err(e) => {
                source.transition(SegmentStatus::Compacting, SegmentStatus::ReadOnly);
                warn!(segment = %source.id(), error = %e, "compaction aborted");
                self.skipped.push(source.id());
                report.error = Some(e);
            }
        }

        self.compacting.store(0, Ordering::Release);
        Some(report)
    }

    fn relocate(&mut self, source: &Segment, report: &mut SegmentCompaction) -> CoreResult<()> {
        let mut offset = Segment::first_record_offset();

        while let Some((address, record)) = source.record_at(offset)? {
            offset += address.frame_len();
            report.records_scanned += 1;

            let current = match self.array.get(record.position) {
                Ok(current) => current,
                Err(CoreError::PositionOutOfRange { .. }) => continue,
                Err(e) => return Err(e),
            };
            if current != address {
                continue;
            }

            let copy = self.append(record.position, &record.payload)?;
            if self.array.compare_and_set(record.position, address, copy)? {
                self.segments.mark_overwritten(address);
                report.records_relocated += 1;
                report.bytes_relocated += address.frame_len();
            } else {
                // The writer replaced the value after the check.
                self.segments.mark_overwritten(copy);
            }
        }

        if offset < source.size()? {
            debug!(segment = %source.id(), offset, "walk ended at a torn tail");
        }
        Ok(())
    }

    fn append(&mut self, position: u64, payload: &[u8]) -> CoreResult<Address> {
        let frame_len = (RECORD_OVERHEAD + payload.len()) as u64;
        for _ in 0..2 {
            let target = match &self.target {
                Some(target) => Arc::clone(target),
                None => {
                    let target = self.segments.allocate_writable_segment(frame_len)?;
                    debug!(segment = %target.id(), "opened compaction target");
                    self.target = Some(Arc::clone(&target));
                    target
                }
            };
            match target.append(position, payload) {
                Err(CoreError::SegmentFull { .. }) => {
                    target.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly);
                    self.target = None;
                }
                other => return other,
            }
        }
        Err(CoreError::invalid_operation(
            "fresh compaction target cannot hold the record",
        ))
    }

    /// Ends the pass, returning the target segment if it is still writable.
    #[must_use]
    pub fn finish(mut self) -> Option<Arc<Segment>> {
        self.target
            .take()
            .filter(|t| t.status() == SegmentStatus::Writable)
    }
}

/// Handle to a background compaction thread.
///
/// Stopping (explicitly or on drop) raises a flag the thread checks between
/// segments, then joins it.
#[derive(Debug)]
pub struct CompactorHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CompactorHandle {
    /// Spawns a thread that calls `pass` every `interval` until stopped or
    /// until `pass` returns false.
    pub(crate) fn spawn<F>(interval: Duration, mut pass: F) -> CoreResult<Self>
    where
        F: FnMut(&AtomicBool) -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("segstore-compactor".into())
            .spawn(move || loop {
                if !sleep_unless_stopped(&flag, interval) {
                    break;
                }
                if !pass(&flag) {
                    break;
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("compactor thread panicked");
            }
        }
    }
}

impl Drop for CompactorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleeps for `interval`, waking early on stop. Returns false if stopped.
fn sleep_unless_stopped(stop: &AtomicBool, interval: Duration) -> bool {
    let deadline = std::time::Instant::now() + interval;
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        thread::park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArrayKind;
    use segstore_storage::FileBackendFactory;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        array: IndexArray,
        segments: SegmentManager,
        compacting: AtomicU32,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let segments = SegmentManager::open(
            dir.path(),
            Arc::new(FileBackendFactory),
            4096,
            64,
            SegmentId::NONE,
            &[],
        )
        .unwrap();
        Fixture {
            _dir: dir,
            array: IndexArray::create(ArrayKind::Static, 64, 64),
            segments,
            compacting: AtomicU32::new(0),
        }
    }

    fn put(f: &Fixture, segment: &Segment, position: u64, value: &[u8]) {
        let addr = segment.append(position, value).unwrap();
        let old = f.array.set(position, addr).unwrap();
        f.segments.mark_overwritten(old);
    }

    #[test]
    fn relocates_live_records_and_recycles_source() {
        let f = fixture();
        let source = f.segments.allocate_writable_segment(0).unwrap();
        for pos in 0..10 {
            put(&f, &source, pos, &[pos as u8; 100]);
        }
        // Overwrite most positions in a second segment.
        source.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly);
        let newer = f.segments.allocate_writable_segment(0).unwrap();
        for pos in 0..8 {
            put(&f, &newer, pos, b"new");
        }

        let mut compactor = Compactor::new(&f.array, &f.segments, 0.5, &f.compacting, None);
        let report = compactor.compact_once().unwrap();
        let target = compactor.finish().unwrap();

        assert!(report.succeeded());
        assert_eq!(target.status(), SegmentStatus::Writable);
        assert_eq!(report.segment, source.id());
        assert_eq!(report.records_scanned, 10);
        assert_eq!(report.records_relocated, 2);
        assert_eq!(source.status(), SegmentStatus::Recyclable);
        assert_eq!(source.live_bytes(), 0);
        assert_eq!(f.compacting.load(Ordering::Acquire), 0);

        for pos in 8..10 {
            let addr = f.array.get(pos).unwrap();
            assert_ne!(addr.segment(), source.id());
            assert_eq!(f.segments.read(addr).unwrap(), vec![pos as u8; 100]);
        }
        assert_eq!(f.segments.read(f.array.get(0).unwrap()).unwrap(), b"new");
    }

    #[test]
    fn target_carries_over_between_passes() {
        let f = fixture();
        let mut target = None;
        for round in 0..2u8 {
            let source = f.segments.allocate_writable_segment(0).unwrap();
            put(&f, &source, u64::from(round), &[round; 100]);
            source.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly);

            let mut compactor =
                Compactor::new(&f.array, &f.segments, 0.5, &f.compacting, target.take());
            assert!(compactor.compact_once().unwrap().succeeded());
            target = compactor.finish();
        }

        let target = target.unwrap();
        assert_eq!(f.array.get(0).unwrap().segment(), target.id());
        assert_eq!(f.array.get(1).unwrap().segment(), target.id());
    }

    #[test]
    fn no_candidate_when_segments_are_dense() {
        let f = fixture();
        let segment = f.segments.allocate_writable_segment(0).unwrap();
        put(&f, &segment, 0, &[1u8; 3000]);
        segment.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly);

        let mut compactor = Compactor::new(&f.array, &f.segments, 0.5, &f.compacting, None);
        assert!(compactor.compact_once().is_none());
    }

    #[test]
    fn writable_segment_is_never_compacted() {
        let f = fixture();
        let segment = f.segments.allocate_writable_segment(0).unwrap();
        put(&f, &segment, 0, b"tiny");

        let mut compactor = Compactor::new(&f.array, &f.segments, 0.5, &f.compacting, None);
        assert!(compactor.compact_once().is_none());
        assert_eq!(segment.status(), SegmentStatus::Writable);
    }

    #[test]
    fn stale_slot_reference_aborts_and_restores_status() {
        let f = fixture();
        let segment = f.segments.allocate_writable_segment(0).unwrap();
        let addr = segment.append(1, b"abc").unwrap();
        segment.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly);

        // The index points at a frame that is not there.
        let bogus = Address::new(segment.id(), addr.offset() + 200, 3);
        f.array.set(2, bogus).unwrap();
        segment.add_live(bogus.frame_len());

        let mut compactor = Compactor::new(&f.array, &f.segments, 0.5, &f.compacting, None);
        let report = compactor.compact_once().unwrap();
        assert!(!report.succeeded());
        assert_eq!(segment.status(), SegmentStatus::ReadOnly);
        assert!(compactor.compact_once().is_none());
    }

    #[test]
    fn handle_stops_promptly() {
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passes);
        let handle = CompactorHandle::spawn(Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            true
        })
        .unwrap();

        while passes.load(Ordering::Relaxed) < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        handle.stop();
        let after = passes.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(passes.load(Ordering::Relaxed), after);
    }

    #[test]
    fn long_interval_does_not_delay_stop() {
        let handle = CompactorHandle::spawn(Duration::from_secs(3600), |_| true).unwrap();
        let started = std::time::Instant::now();
        drop(handle);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

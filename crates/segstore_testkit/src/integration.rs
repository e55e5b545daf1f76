//! Integration test helpers.
//!
//! [`ModelHarness`] runs operations against a store and an in-memory map in
//! lockstep, asserting they agree.

use crate::generators::StoreOperation;
use segstore_core::{ArrayStore, CoreResult};
use std::collections::HashMap;

/// A test harness that tracks the values a store should hold.
pub struct ModelHarness<'a> {
    store: &'a ArrayStore,
    expected: HashMap<u64, Vec<u8>>,
}

impl<'a> ModelHarness<'a> {
    /// Creates a harness over an empty store.
    pub fn new(store: &'a ArrayStore) -> Self {
        Self::with_expected(store, HashMap::new())
    }

    /// Creates a harness that expects `expected` to be stored already.
    pub fn with_expected(store: &'a ArrayStore, expected: HashMap<u64, Vec<u8>>) -> Self {
        Self { store, expected }
    }

    /// Stores a value and tracks it for later verification.
    pub fn set(&mut self, position: u64, value: Vec<u8>) -> CoreResult<()> {
        self.store.set(position, &value)?;
        self.expected.insert(position, value);
        Ok(())
    }

    /// Deletes a value and updates tracking.
    pub fn delete(&mut self, position: u64) -> CoreResult<()> {
        let removed = self.store.delete(position)?;
        assert_eq!(
            removed,
            self.expected.remove(&position).is_some(),
            "delete result mismatch at {position}"
        );
        Ok(())
    }

    /// Reads a value and verifies it matches the tracked one.
    pub fn get_and_verify(&self, position: u64) -> CoreResult<Option<Vec<u8>>> {
        let actual = self.store.get(position)?;
        assert_eq!(
            actual.as_ref(),
            self.expected.get(&position),
            "value mismatch at {position}"
        );
        Ok(actual)
    }

    /// Applies one generated operation.
    pub fn apply(&mut self, op: &StoreOperation) -> CoreResult<()> {
        match op {
            StoreOperation::Set { position, value } => self.set(*position, value.clone()),
            StoreOperation::Delete { position } => self.delete(*position),
            StoreOperation::Get { position } => self.get_and_verify(*position).map(|_| ()),
            StoreOperation::Sync => self.store.sync(),
            StoreOperation::Compact => {
                let report = self.store.compact()?;
                assert!(
                    report.failures().next().is_none(),
                    "compaction failed: {report:?}"
                );
                Ok(())
            }
        }
    }

    /// Verifies every position holds exactly what was tracked.
    pub fn verify_all(&self) {
        let start = self.store.index_start();
        for position in start..start + self.store.length() {
            let actual = self.store.get(position).expect("Failed to get value");
            assert_eq!(
                actual.as_ref(),
                self.expected.get(&position),
                "value mismatch at {position}"
            );
        }
        let report = self.store.verify();
        assert!(report.is_ok(), "verify failed: {:?}", report.errors);
        assert_eq!(report.values, self.expected.len() as u64);
    }

    /// Returns the count of tracked values.
    pub fn tracked_count(&self) -> usize {
        self.expected.len()
    }

    /// Consumes the harness, returning the tracked values.
    pub fn into_expected(self) -> HashMap<u64, Vec<u8>> {
        self.expected
    }
}

/// Checks that hold for any [`IndexedStore`](segstore_core::IndexedStore).
pub mod contract {
    use segstore_core::{CoreError, IndexedStore};

    /// Runs basic set, get, delete and clear checks against `store`.
    ///
    /// The store must be empty and cover at least 8 positions.
    pub fn test_indexed_store<S: IndexedStore>(store: &S) {
        let capacity = store.capacity();
        assert!(capacity >= 8);
        assert_eq!(store.length(), capacity);

        for position in 0..8u64 {
            store
                .set_expand(position, &position.to_le_bytes())
                .expect("Failed to set");
        }
        for position in 0..8u64 {
            assert_eq!(
                store.get(&position).expect("Failed to get"),
                Some(position.to_le_bytes().to_vec())
            );
        }

        assert!(store.delete(3).expect("Failed to delete"));
        assert!(!store.delete(3).expect("Failed to delete"));
        assert_eq!(store.get(&3).expect("Failed to get"), None);

        assert!(matches!(
            store.get(&u64::MAX),
            Err(CoreError::PositionOutOfRange { .. })
        ));

        store.sync().expect("Failed to sync");
        store.clear().expect("Failed to clear");
        for position in 0..8u64 {
            assert_eq!(store.get(&position).expect("Failed to get"), None);
        }
        assert_eq!(store.capacity(), capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{scenarios, small_config, TestStore};
    use segstore_core::index::grown_capacity;
    use segstore_core::segment::{segment_file_name, RECORD_OVERHEAD, SEGMENT_HEADER_SIZE};
    use segstore_core::{CoreError, SegmentId, SegmentStatus, StoreConfig};
    use std::fs::{self, OpenOptions};
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn flip_byte(path: &Path, offset: u64) {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .unwrap();
        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[byte[0] ^ 0xFF]).unwrap();
        file.sync_all().unwrap();
    }

    fn total_live_bytes(store: &ArrayStore) -> u64 {
        store
            .segment_stats()
            .unwrap()
            .iter()
            .map(|s| s.live_bytes)
            .sum()
    }

    #[test]
    fn test_model_harness() {
        let test_store = TestStore::new_static(small_config());
        let mut harness = ModelHarness::new(test_store.store());

        harness.set(1, b"one".to_vec()).unwrap();
        harness.set(2, b"two".to_vec()).unwrap();
        harness.delete(1).unwrap();
        assert_eq!(harness.tracked_count(), 1);
        assert_eq!(harness.get_and_verify(2).unwrap(), Some(b"two".to_vec()));

        harness.verify_all();
    }

    #[test]
    fn test_static_store_contract() {
        let test_store = TestStore::new_static(small_config());
        contract::test_indexed_store(test_store.store());
    }

    #[test]
    fn test_dynamic_store_contract() {
        let test_store = TestStore::new_dynamic(small_config());
        contract::test_indexed_store(test_store.store());
    }

    #[test]
    fn test_overwrite_then_compact() {
        let test_store = scenarios::fragmented_store(16, 4);
        let before = total_live_bytes(&test_store);

        let report = test_store.compact().unwrap();
        assert!(report.recycled().count() > 0);
        assert!(report.failures().next().is_none());
        assert!(total_live_bytes(&test_store) <= before);

        for position in 0..16 {
            assert_eq!(test_store.get(position).unwrap(), Some(vec![3; 200]));
        }
        assert!(test_store.verify().is_ok());
    }

    #[test]
    fn test_compacted_segments_are_released_at_checkpoint() {
        let test_store = scenarios::fragmented_store(16, 4);
        test_store.compact().unwrap();
        let recyclable = |store: &ArrayStore| {
            store
                .segment_stats()
                .unwrap()
                .iter()
                .filter(|s| s.status == SegmentStatus::Recyclable)
                .count()
        };
        let pending = recyclable(test_store.store());
        assert!(pending > 0);

        let count_before = test_store.segment_stats().unwrap().len();

        // Released once a checkpoint records them, without new allocations.
        test_store.sync().unwrap();
        assert_eq!(recyclable(test_store.store()), 0);
        assert_eq!(test_store.segment_stats().unwrap().len(), count_before - pending);
        for position in 0..16 {
            assert_eq!(test_store.get(position).unwrap(), Some(vec![3; 200]));
        }
    }

    #[test]
    fn test_compaction_with_concurrent_writer() {
        let test_store = scenarios::fragmented_store(16, 4);
        let store = test_store.store();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 10..30u8 {
                    for position in 0..16 {
                        store.set(position, &[round; 200]).unwrap();
                    }
                }
            });
            for _ in 0..20 {
                let report = store.compact().unwrap();
                assert!(report.failures().next().is_none());
            }
        });

        store.compact().unwrap();
        for position in 0..16 {
            assert_eq!(store.get(position).unwrap(), Some(vec![29; 200]));
        }
        assert!(store.verify().is_ok());
    }

    #[test]
    fn test_corrupt_frame_aborts_compaction() {
        let test_store = TestStore::new_static(small_config());
        // 18 frames of 216 bytes fill the first 4 KiB segment.
        for position in 0..19 {
            test_store.set(position, &[1; 200]).unwrap();
        }
        for position in (0..19).filter(|&p| p != 2) {
            test_store.set(position, &[2; 200]).unwrap();
        }
        test_store.sync().unwrap();

        let first = SegmentId::new(1);
        let frame = (SEGMENT_HEADER_SIZE + 2 * (RECORD_OVERHEAD + 200)) as u64;
        let path = test_store
            .path()
            .join("SEGMENTS")
            .join(segment_file_name(first));
        flip_byte(&path, frame + 100);

        let report = test_store.compact().unwrap();
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].segment, first);
        assert!(matches!(
            failed[0].error,
            Some(CoreError::CorruptRecord { segment, .. }) if segment == first
        ));
        assert!(report.recycled().all(|id| id != first));

        let status = test_store
            .segment_stats()
            .unwrap()
            .iter()
            .find(|s| s.id == first)
            .map(|s| s.status);
        assert_eq!(status, Some(SegmentStatus::ReadOnly));

        assert!(matches!(
            test_store.get(2),
            Err(CoreError::CorruptRecord { .. })
        ));
        assert_eq!(test_store.get(3).unwrap(), Some(vec![2; 200]));
        assert_eq!(test_store.verify().errors.len(), 1);
    }

    #[test]
    fn test_get_reports_missing_segment() {
        let test_store = TestStore::new_static(small_config());
        test_store.set(5, b"five").unwrap();
        let dir = test_store.close();

        let first = SegmentId::new(1);
        fs::remove_file(dir.path().join("SEGMENTS").join(segment_file_name(first))).unwrap();

        let store = ArrayStore::open_static(dir.path(), small_config()).unwrap();
        assert!(matches!(
            store.get(5),
            Err(CoreError::SegmentNotFound(id)) if id == first
        ));
        assert_eq!(store.get(6).unwrap(), None);
        assert!(!store.verify().is_ok());
    }

    #[test]
    fn test_background_compactor() {
        let mut test_store = scenarios::fragmented_store(16, 4);
        test_store
            .start_compactor(Duration::from_millis(5))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while test_store.stats().segments_compacted == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        test_store.stop_compactor();
        assert!(test_store.stats().segments_compacted > 0);

        test_store.reopen();
        for position in 0..16 {
            assert_eq!(test_store.get(position).unwrap(), Some(vec![3; 200]));
        }
    }

    #[test]
    fn test_clear_survives_reopen() {
        let mut test_store = scenarios::populated_store(40);
        let length = test_store.length();
        test_store.clear().unwrap();
        assert_eq!(test_store.length(), length);

        test_store.reopen();
        for position in 0..40 {
            assert_eq!(test_store.get(position).unwrap(), None);
        }
        assert_eq!(test_store.verify().values, 0);
    }

    #[test]
    fn test_set_expand_grows_dynamic_store() {
        let mut test_store = TestStore::new_dynamic(small_config());
        assert_eq!(test_store.capacity(), 256);

        test_store.set_expand(1000, b"far").unwrap();
        assert_eq!(test_store.capacity(), grown_capacity(256, 1001, 64));

        test_store.reopen();
        assert_eq!(test_store.capacity(), 1024);
        assert_eq!(test_store.get(1000).unwrap(), Some(b"far".to_vec()));
    }

    #[test]
    fn test_dynamic_sizing_across_reopen() {
        let config = |requested| {
            StoreConfig::new()
                .initial_capacity(requested)
                .unit_capacity(1024)
                .segment_capacity_bytes(4096)
        };
        let mut test_store = TestStore::new_dynamic(config(2600));
        assert_eq!(test_store.capacity(), 4096);

        test_store.reopen_with(config(4200));
        assert_eq!(test_store.capacity(), 5120);

        test_store.reopen_with(config(100));
        assert_eq!(test_store.capacity(), 5120);

        test_store.set_expand(6000, b"x").unwrap();
        assert_eq!(test_store.capacity(), 6144);
    }

    #[test]
    fn test_static_length_is_fixed_at_creation() {
        let mut test_store = TestStore::new_static(small_config().initial_capacity(300));
        test_store.set(299, b"last").unwrap();
        assert_eq!(test_store.length(), 300);

        test_store.reopen_with(small_config().initial_capacity(1000));
        assert_eq!(test_store.length(), 300);
        assert_eq!(test_store.get(299).unwrap(), Some(b"last".to_vec()));
    }

    #[test]
    fn test_set_expand_on_static_store_is_bounded() {
        let test_store = TestStore::new_static(small_config());
        assert!(test_store.set_expand(1000, b"far").is_err());
        assert_eq!(test_store.capacity(), 256);
    }
}

//! Crash recovery testing for SegStore.
//!
//! This module provides a fault-injecting backend factory and a harness that
//! runs crash scenarios against it. A crash is simulated by dropping a store
//! without closing it, so nothing after its last checkpoint is made durable.
//!
//! ## Test Strategy
//!
//! 1. **Crash after checkpoint** - Checkpointed values survive
//! 2. **Crash before checkpoint** - Later writes are discarded
//! 3. **Failed sync** - The previous checkpoint stays in effect
//! 4. **Torn append** - A partial frame is never read back
//! 5. **Orphaned bytes** - Compaction reclaims what a crash left behind
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segstore_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed());
//! ```

use crate::fixtures::{small_config, TestStore};
use segstore_core::{ArrayKind, CoreError, CoreResult};
use segstore_storage::{
    BackendFactory, FileBackendFactory, StorageBackend, StorageError, StorageResult,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Values expected after recovery.
    pub expected_values: usize,
    /// Values found after recovery.
    pub actual_values: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, values: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_values: values,
            actual_values: values,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_values: expected,
            actual_values: actual,
            error: Some(error.to_string()),
        }
    }

    fn check(description: &str, expected: usize, actual: usize) -> Self {
        if expected == actual {
            Self::pass(description, expected)
        } else {
            Self::fail(description, expected, actual, "recovered values differ")
        }
    }
}

/// Faults shared by every backend a [`FaultyBackendFactory`] opens.
#[derive(Debug)]
pub struct Faults {
    fail_sync: AtomicBool,
    failing_appends: AtomicUsize,
    torn_append_at: AtomicUsize,
    syncs: AtomicUsize,
    crashed: AtomicBool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_sync: AtomicBool::new(false),
            failing_appends: AtomicUsize::new(0),
            torn_append_at: AtomicUsize::new(usize::MAX),
            syncs: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }
}

impl Faults {
    /// Sets whether sync should fail.
    pub fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` appends fail without writing anything.
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Makes the next append write only its first `bytes` bytes, then fail.
    pub fn tear_next_append(&self, bytes: usize) {
        self.torn_append_at.store(bytes, Ordering::SeqCst);
    }

    /// Clears every armed fault.
    pub fn reset(&self) {
        self.fail_sync.store(false, Ordering::SeqCst);
        self.failing_appends.store(0, Ordering::SeqCst);
        self.torn_append_at.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether any fault fired since the last reset.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Number of successful syncs.
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    fn take_failing_append(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

/// A storage backend wrapper that fails on demand.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    faults: Arc<Faults>,
}

impl FaultyBackend {
    /// Wraps `inner`, failing according to `faults`.
    pub fn new(inner: Box<dyn StorageBackend>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        if self.faults.take_failing_append() {
            return Err(self.faults.crash("write"));
        }

        let torn_at = self.faults.torn_append_at.swap(usize::MAX, Ordering::SeqCst);
        if torn_at != usize::MAX {
            let partial = torn_at.min(data.len());
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(self.faults.crash("partial write"));
        }

        self.inner.append(data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&self) -> StorageResult<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(self.faults.crash("sync"));
        }
        self.inner.sync()?;
        self.faults.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Opens file backends wrapped in [`FaultyBackend`].
#[derive(Debug, Default)]
pub struct FaultyBackendFactory {
    faults: Arc<Faults>,
}

impl FaultyBackendFactory {
    /// Creates a factory with no faults armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the faults shared by every backend this factory opens.
    pub fn faults(&self) -> &Arc<Faults> {
        &self.faults
    }
}

impl BackendFactory for FaultyBackendFactory {
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        let inner = FileBackendFactory.open(path)?;
        Ok(Box::new(FaultyBackend::new(inner, Arc::clone(&self.faults))))
    }
}

/// Opens a static [`small_config`] store over a fresh faulty factory.
pub fn faulty_store() -> (TestStore, Arc<Faults>) {
    let factory = Arc::new(FaultyBackendFactory::new());
    let faults = Arc::clone(factory.faults());
    let store = TestStore::with_factory(ArrayKind::Static, small_config(), factory);
    (store, faults)
}

fn value(position: u64, fill: u8, len: usize) -> Vec<u8> {
    let mut value = vec![fill; len];
    value[..8].copy_from_slice(&position.to_le_bytes());
    value
}

/// Test harness for crash recovery scenarios.
#[derive(Debug, Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        &mut self,
        description: &str,
        expected: usize,
        outcome: CoreResult<CrashRecoveryResult>,
    ) -> CrashRecoveryResult {
        let result = outcome
            .unwrap_or_else(|e| CrashRecoveryResult::fail(description, expected, 0, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    /// Tests that checkpointed values survive a crash.
    pub fn test_checkpointed_data_survives(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Checkpointed values survive crash";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (mut store, _) = faulty_store();
            for position in 0..10 {
                store.set(position, &value(position, 1, 100))?;
            }
            store.sync()?;
            store.crash_and_reopen();

            let found = (0..10)
                .filter(|&p| matches!(store.get(p), Ok(Some(v)) if v == value(p, 1, 100)))
                .count();
            Ok(CrashRecoveryResult::check(DESCRIPTION, 10, found))
        })();
        self.record(DESCRIPTION, 10, outcome)
    }

    /// Tests that writes after the last checkpoint are discarded.
    pub fn test_unsynced_data_discarded(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Unsynced values are discarded after crash";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (mut store, _) = faulty_store();
            store.set(0, b"durable")?;
            store.sync()?;
            for position in 1..4 {
                store.set(position, b"volatile")?;
            }
            store.crash_and_reopen();

            if (1..4).any(|p| !matches!(store.get(p), Ok(None))) {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    1,
                    4,
                    "unsynced value was recovered",
                ));
            }
            let found = usize::from(store.get(0)? == Some(b"durable".to_vec()));
            Ok(CrashRecoveryResult::check(DESCRIPTION, 1, found))
        })();
        self.record(DESCRIPTION, 1, outcome)
    }

    /// Tests that a checkpointed delete survives a crash.
    pub fn test_delete_survives_crash(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Checkpointed delete survives crash";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (mut store, _) = faulty_store();
            store.set(0, b"deleted")?;
            store.set(1, b"kept")?;
            store.sync()?;
            store.delete(0)?;
            store.sync()?;
            store.crash_and_reopen();

            if store.get(0)?.is_some() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    1,
                    2,
                    "deleted value reappeared",
                ));
            }
            let found = usize::from(store.get(1)? == Some(b"kept".to_vec()));
            Ok(CrashRecoveryResult::check(DESCRIPTION, 1, found))
        })();
        self.record(DESCRIPTION, 1, outcome)
    }

    /// Tests that a failed sync leaves the previous checkpoint in effect.
    pub fn test_failed_sync_keeps_previous_checkpoint(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Failed sync keeps previous checkpoint";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (mut store, faults) = faulty_store();
            store.set(0, b"old")?;
            store.sync()?;
            let sequence = store.checkpoint_sequence();

            store.set(0, b"new")?;
            faults.set_fail_sync(true);
            let failed = matches!(store.sync(), Err(CoreError::FlushFailed { .. }));
            if !failed || store.checkpoint_sequence() != sequence {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    1,
                    0,
                    "sync did not fail with FlushFailed",
                ));
            }

            faults.reset();
            store.crash_and_reopen();
            let found = usize::from(store.get(0)? == Some(b"old".to_vec()));
            Ok(CrashRecoveryResult::check(DESCRIPTION, 1, found))
        })();
        self.record(DESCRIPTION, 1, outcome)
    }

    /// Tests that a torn append is never read back.
    pub fn test_torn_append_is_ignored(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Torn append is ignored";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (mut store, faults) = faulty_store();
            for position in 0..5 {
                store.set(position, &value(position, 2, 100))?;
            }
            store.sync()?;

            faults.tear_next_append(10);
            if store.set(5, &value(5, 2, 100)).is_ok() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    5,
                    6,
                    "torn append reported success",
                ));
            }
            faults.reset();
            store.crash_and_reopen();

            store.compact()?;
            if !store.verify().is_ok() || store.get(5)?.is_some() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    5,
                    6,
                    "torn record is visible",
                ));
            }
            let found = (0..5)
                .filter(|&p| matches!(store.get(p), Ok(Some(v)) if v == value(p, 2, 100)))
                .count();
            Ok(CrashRecoveryResult::check(DESCRIPTION, 5, found))
        })();
        self.record(DESCRIPTION, 5, outcome)
    }

    /// Tests that compaction reclaims bytes written after the last checkpoint.
    pub fn test_orphans_are_reclaimed(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Orphaned bytes are reclaimed by compaction";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (mut store, _) = faulty_store();
            for position in 0..5 {
                store.set(position, &value(position, 3, 1000))?;
            }
            store.sync()?;
            store.set(0, &value(0, 4, 1000))?;
            store.set(1, &value(1, 4, 1000))?;
            store.crash_and_reopen();

            let report = store.compact()?;
            if report.recycled().count() == 0 || report.failures().next().is_some() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    5,
                    0,
                    "no segment was reclaimed",
                ));
            }
            let found = (0..5)
                .filter(|&p| matches!(store.get(p), Ok(Some(v)) if v == value(p, 3, 1000)))
                .count();
            Ok(CrashRecoveryResult::check(DESCRIPTION, 5, found))
        })();
        self.record(DESCRIPTION, 5, outcome)
    }

    /// Runs every crash recovery test.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_checkpointed_data_survives(),
            self.test_unsynced_data_discarded(),
            self.test_delete_survives_crash(),
            self.test_failed_sync_keeps_previous_checkpoint(),
            self.test_torn_append_is_ignored(),
            self.test_orphans_are_reclaimed(),
        ]
    }

    /// Returns a summary of the results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash Recovery Test Summary: {}/{} passed\n",
            passed,
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            summary.push_str(&format!("  [{}] {}", status, result.description));
            if let Some(error) = &result.error {
                summary.push_str(&format!(" - {error}"));
            }
            summary.push('\n');
        }
        summary
    }

    /// Returns whether every test passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up temporary stores and
//! reopening them the way a restarted process would.

use segstore_core::{ArrayKind, ArrayStore, StoreConfig};
use segstore_storage::{BackendFactory, FileBackendFactory};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A configuration small enough that tests exercise rotation, batching and
/// unit boundaries with a handful of writes.
///
/// 256 positions in units of 64 slots, a checkpoint every 8 writes and
/// 4 KiB segments.
#[must_use]
pub fn small_config() -> StoreConfig {
    StoreConfig::new()
        .initial_capacity(256)
        .unit_capacity(64)
        .batch_size(4)
        .num_sync_batches(2)
        .segment_capacity_bytes(4096)
}

/// A store in a temporary directory with automatic cleanup.
pub struct TestStore {
    store: Option<ArrayStore>,
    kind: ArrayKind,
    config: StoreConfig,
    factory: Arc<dyn BackendFactory>,
    temp_dir: TempDir,
}

impl TestStore {
    /// Creates a static store.
    pub fn new_static(config: StoreConfig) -> Self {
        Self::with_factory(ArrayKind::Static, config, Arc::new(FileBackendFactory))
    }

    /// Creates a dynamic store.
    pub fn new_dynamic(config: StoreConfig) -> Self {
        Self::with_factory(ArrayKind::Dynamic, config, Arc::new(FileBackendFactory))
    }

    /// Creates a store whose segment backends come from `factory`.
    pub fn with_factory(
        kind: ArrayKind,
        config: StoreConfig,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = ArrayStore::open_with_factory(
            temp_dir.path(),
            Some(kind),
            config.clone(),
            Arc::clone(&factory),
        )
        .expect("Failed to open store");

        Self {
            store: Some(store),
            kind,
            config,
            factory,
            temp_dir,
        }
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the open store.
    pub fn store(&self) -> &ArrayStore {
        self.store.as_ref().expect("store is not open")
    }

    /// Closes the store cleanly and opens it again with the same
    /// configuration.
    pub fn reopen(&mut self) {
        if let Some(store) = self.store.take() {
            store.close().expect("Failed to close store");
        }
        self.open_again(self.config.clone());
    }

    /// Closes the store and opens it again with `config`.
    pub fn reopen_with(&mut self, config: StoreConfig) {
        if let Some(store) = self.store.take() {
            store.close().expect("Failed to close store");
        }
        self.config = config.clone();
        self.open_again(config);
    }

    /// Drops the store without its final checkpoint, then opens it again.
    ///
    /// The reopened store sees the state of the last checkpoint written
    /// before the drop.
    pub fn crash_and_reopen(&mut self) {
        drop(self.store.take());
        self.open_again(self.config.clone());
    }

    /// Closes the store, consuming the fixture but not its directory.
    pub fn close(mut self) -> TempDir {
        if let Some(store) = self.store.take() {
            store.close().expect("Failed to close store");
        }
        self.temp_dir
    }

    /// Splits the fixture into the open store and its directory.
    pub fn into_parts(mut self) -> (ArrayStore, TempDir) {
        let store = self.store.take().expect("store is not open");
        (store, self.temp_dir)
    }

    fn open_again(&mut self, config: StoreConfig) {
        let store = ArrayStore::open_with_factory(
            self.temp_dir.path(),
            Some(self.kind),
            config,
            Arc::clone(&self.factory),
        )
        .expect("Failed to reopen store");
        self.store = Some(store);
    }
}

impl std::ops::Deref for TestStore {
    type Target = ArrayStore;

    fn deref(&self) -> &Self::Target {
        self.store()
    }
}

impl std::fmt::Debug for TestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStore")
            .field("path", &self.temp_dir.path())
            .field("kind", &self.kind)
            .field("open", &self.store.is_some())
            .finish()
    }
}

/// Runs a test with a temporary static store built from [`small_config`].
///
/// # Example
///
/// ```rust,ignore
/// use segstore_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.set(3, b"three").unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&ArrayStore) -> R,
{
    let test_store = TestStore::new_static(small_config());
    f(test_store.store())
}

/// Runs a test with a temporary dynamic store built from [`small_config`].
pub fn with_dynamic_store<F, R>(f: F) -> R
where
    F: FnOnce(&ArrayStore) -> R,
{
    let test_store = TestStore::new_dynamic(small_config());
    f(test_store.store())
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// The value [`populated_store`] writes at `position`.
    #[must_use]
    pub fn value_for(position: u64) -> Vec<u8> {
        format!(r#"{{"position":{position}}}"#).into_bytes()
    }

    /// Creates a static store with positions `0..count` populated.
    pub fn populated_store(count: u64) -> TestStore {
        let test_store = TestStore::new_static(small_config());
        for position in 0..count {
            test_store
                .set(position, &value_for(position))
                .expect("Failed to populate store");
        }
        test_store
    }

    /// Creates a store whose first segments hold mostly overwritten values.
    ///
    /// Every position in `0..count` is written `rounds` times, so only the
    /// last round is live.
    pub fn fragmented_store(count: u64, rounds: u8) -> TestStore {
        let test_store = TestStore::new_static(small_config());
        for round in 0..rounds {
            for position in 0..count {
                test_store
                    .set(position, &[round; 200])
                    .expect("Failed to populate store");
            }
        }
        test_store
    }
}

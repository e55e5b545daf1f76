//! Property-based test generators.
//!
//! Provides proptest strategies for positions, values and store operations.

use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

/// Strategy for positions inside `0..length`.
pub fn position_strategy(length: u64) -> impl Strategy<Value = u64> {
    0..length.max(1)
}

/// Strategy for values, from empty up to a few KiB.
///
/// Large values are rare so most runs stay within one segment.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        8 => prop::collection::vec(any::<u8>(), 0..64),
        3 => prop::collection::vec(any::<u8>(), 64..1024),
        1 => prop::collection::vec(any::<u8>(), 1024..6000),
    ]
}

/// An operation on an array store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Store a value
    Set {
        /// Position
        position: u64,
        /// Value
        value: Vec<u8>,
    },
    /// Remove a value
    Delete {
        /// Position
        position: u64,
    },
    /// Read a value
    Get {
        /// Position
        position: u64,
    },
    /// Write a checkpoint
    Sync,
    /// Compact sparse segments
    Compact,
}

/// Strategy for operations on a store of `length` positions.
pub fn store_operation_strategy(length: u64) -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        6 => (position_strategy(length), value_strategy())
            .prop_map(|(position, value)| StoreOperation::Set { position, value }),
        2 => position_strategy(length).prop_map(|position| StoreOperation::Delete { position }),
        3 => position_strategy(length).prop_map(|position| StoreOperation::Get { position }),
        1 => Just(StoreOperation::Sync),
        1 => Just(StoreOperation::Compact),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    length: u64,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(length), min_ops..max_ops)
}

/// Strategy for a requested initial capacity and a unit capacity
/// (a power of two between 16 and 1024).
pub fn sizing_strategy() -> impl Strategy<Value = (u64, u32)> {
    (1u64..100_000, 4u32..=10).prop_map(|(requested, shift)| (requested, 1 << shift))
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_config, TestStore};
    use crate::integration::ModelHarness;
    use segstore_core::index::initial_dynamic_capacity;
    use segstore_core::{ArrayStore, StoreConfig};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn positions_are_in_range(position in position_strategy(256)) {
            prop_assert!(position < 256);
        }

        #[test]
        fn operations_match_model(ops in operation_sequence_strategy(256, 1, 60)) {
            let test_store = TestStore::new_static(small_config());
            let mut harness = ModelHarness::new(test_store.store());
            for op in &ops {
                harness.apply(op).unwrap();
            }
            harness.verify_all();
        }

        #[test]
        fn reopen_preserves_synced_operations(ops in operation_sequence_strategy(256, 1, 40)) {
            let mut test_store = TestStore::new_static(small_config());
            let expected = {
                let mut harness = ModelHarness::new(test_store.store());
                for op in &ops {
                    harness.apply(op).unwrap();
                }
                harness.into_expected()
            };

            test_store.reopen();
            let harness = ModelHarness::with_expected(test_store.store(), expected);
            harness.verify_all();
        }

        #[test]
        fn dynamic_store_opens_at_sized_capacity((requested, unit) in sizing_strategy()) {
            let dir = tempfile::tempdir().unwrap();
            let config = StoreConfig::new()
                .initial_capacity(requested)
                .unit_capacity(unit)
                .segment_capacity_bytes(4096);
            let store = ArrayStore::open_dynamic(dir.path(), config).unwrap();
            prop_assert_eq!(store.capacity(), initial_dynamic_capacity(requested, unit));
            prop_assert!(store.capacity() >= requested);
            prop_assert_eq!(store.capacity() % u64::from(unit), 0);
        }
    }
}

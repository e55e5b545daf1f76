//! # SegStore Core
//!
//! A persistent, position-addressed array of byte values.
//!
//! This crate provides:
//! - Append-only segment files holding the values
//! - An index array mapping each position to the address of its value,
//!   either fixed-size ([`ArrayKind::Static`]) or growable
//!   ([`ArrayKind::Dynamic`])
//! - Batched checkpoints that make the index durable
//! - A compactor that relocates live values out of sparse segments
//!
//! ## Example
//!
//! ```rust,no_run
//! use segstore_core::{ArrayStore, StoreConfig};
//!
//! let store = ArrayStore::open_dynamic("my_store", StoreConfig::default())?;
//! store.set_expand(70_000, b"hello")?;
//! assert_eq!(store.get(70_000)?, Some(b"hello".to_vec()));
//! store.close()?;
//! # Ok::<(), segstore_core::CoreError>(())
//! ```
//!
//! ## Durability
//!
//! There is no write-ahead log. A reopened store reflects its last
//! checkpoint exactly; writes acknowledged after it are not replayed. Their
//! bytes stay in the segment files, unreferenced, until compaction reclaims
//! them. Call [`ArrayStore::sync`] to bound what a crash can lose.
//!
//! ## On-disk layout
//!
//! ```text
//! <store>/
//! ├─ LOCK
//! ├─ CHECKPOINT
//! ├─ INDEX/unit-00000-0000000001.dat ...
//! └─ SEGMENTS/seg-000001.dat ...
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod checkpoint;
mod compaction;
mod config;
mod dir;
mod error;
pub mod index;
pub mod segment;
mod stats;
mod store;
mod types;

pub use batch::{BatchAction, BatchController, BatchState};
pub use checkpoint::Checkpoint;
pub use compaction::{CompactionReport, CompactorHandle, SegmentCompaction};
pub use config::{
    StoreConfig, BATCH_SIZE_DEFAULT, HASH_LOAD_FACTOR_DEFAULT, MAX_SEGMENTS_DEFAULT,
    NUM_SYNC_BATCHES_DEFAULT, SEGMENT_COMPACT_FACTOR_DEFAULT, SEGMENT_FILE_SIZE_MB_DEFAULT,
    SEGMENT_FILE_SIZE_MB_MAX, SEGMENT_FILE_SIZE_MB_MIN, UNIT_CAPACITY_DEFAULT,
};
pub use dir::{unit_file_name, StoreDir};
pub use error::{CoreError, CoreResult};
pub use segment::{SegmentStats, SegmentStatus};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{ArrayStore, IndexedStore, StoreReader, VerifyReport};
pub use types::{Address, ArrayKind, SegmentId};

//! Store configuration.

use crate::error::{CoreError, CoreResult};
use crate::index::{max_capacity, MAX_UNITS};

const MB: u64 = 1024 * 1024;

/// Default number of staged updates per batch.
pub const BATCH_SIZE_DEFAULT: usize = 10_000;
/// Default number of complete batches between checkpoints.
pub const NUM_SYNC_BATCHES_DEFAULT: usize = 10;
/// Default segment file size in megabytes.
pub const SEGMENT_FILE_SIZE_MB_DEFAULT: u32 = 256;
/// Smallest accepted segment file size in megabytes.
pub const SEGMENT_FILE_SIZE_MB_MIN: u32 = 1;
/// Largest accepted segment file size in megabytes.
pub const SEGMENT_FILE_SIZE_MB_MAX: u32 = 2048;
/// Default live-ratio threshold below which a segment is compacted.
pub const SEGMENT_COMPACT_FACTOR_DEFAULT: f64 = 0.5;
/// Default load factor handed to a hashing layer built on the store.
pub const HASH_LOAD_FACTOR_DEFAULT: f64 = 0.75;
/// Default number of slots per index unit (2^16).
pub const UNIT_CAPACITY_DEFAULT: u32 = 1 << 16;
/// Default cap on the number of segment files.
pub const MAX_SEGMENTS_DEFAULT: u32 = u16::MAX as u32;
/// Smallest segment capacity accepted through the byte-level override.
pub const SEGMENT_CAPACITY_MIN: u64 = 4096;

/// Configuration for opening an array store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Requested length used when the store is created (or grown, for
    /// dynamic stores).
    pub initial_capacity: u64,

    /// Staged updates per batch.
    pub batch_size: usize,

    /// Complete batches between checkpoint flushes.
    pub num_sync_batches: usize,

    /// Capacity of each segment file in megabytes.
    pub segment_file_size_mb: u32,

    /// Exact segment capacity in bytes, overriding `segment_file_size_mb`.
    pub segment_capacity_bytes: Option<u64>,

    /// Live-ratio threshold in (0, 1) that makes a segment a compaction candidate.
    pub segment_compact_factor: f64,

    /// Resize threshold for an external hashing layer. Validated and carried,
    /// not interpreted by the array store.
    pub hash_load_factor: f64,

    /// Slots per index unit. Must be a power of two. Ignored when opening an
    /// existing store, whose persisted value wins.
    pub unit_capacity: u32,

    /// Maximum number of segment files.
    pub max_segments: u32,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: u64::from(UNIT_CAPACITY_DEFAULT),
            batch_size: BATCH_SIZE_DEFAULT,
            num_sync_batches: NUM_SYNC_BATCHES_DEFAULT,
            segment_file_size_mb: SEGMENT_FILE_SIZE_MB_DEFAULT,
            segment_capacity_bytes: None,
            segment_compact_factor: SEGMENT_COMPACT_FACTOR_DEFAULT,
            hash_load_factor: HASH_LOAD_FACTOR_DEFAULT,
            unit_capacity: UNIT_CAPACITY_DEFAULT,
            max_segments: MAX_SEGMENTS_DEFAULT,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested initial length.
    #[must_use]
    pub const fn initial_capacity(mut self, length: u64) -> Self {
        self.initial_capacity = length;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the number of batches per checkpoint.
    #[must_use]
    pub const fn num_sync_batches(mut self, count: usize) -> Self {
        self.num_sync_batches = count;
        self
    }

    /// Sets the segment file size in megabytes.
    #[must_use]
    pub const fn segment_file_size_mb(mut self, mb: u32) -> Self {
        self.segment_file_size_mb = mb;
        self.segment_capacity_bytes = None;
        self
    }

    /// Sets an exact segment capacity in bytes.
    #[must_use]
    pub const fn segment_capacity_bytes(mut self, bytes: u64) -> Self {
        self.segment_capacity_bytes = Some(bytes);
        self
    }

    /// Sets the compaction live-ratio threshold.
    #[must_use]
    pub const fn segment_compact_factor(mut self, factor: f64) -> Self {
        self.segment_compact_factor = factor;
        self
    }

    /// Sets the hashing-layer load factor.
    #[must_use]
    pub const fn hash_load_factor(mut self, factor: f64) -> Self {
        self.hash_load_factor = factor;
        self
    }

    /// Sets the unit capacity.
    #[must_use]
    pub const fn unit_capacity(mut self, slots: u32) -> Self {
        self.unit_capacity = slots;
        self
    }

    /// Sets the maximum number of segment files.
    #[must_use]
    pub const fn max_segments(mut self, count: u32) -> Self {
        self.max_segments = count;
        self
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Returns the capacity of a regular segment in bytes.
    #[must_use]
    pub fn segment_capacity(&self) -> u64 {
        self.segment_capacity_bytes
            .unwrap_or(u64::from(self.segment_file_size_mb) * MB)
    }

    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::invalid_config("batch_size must be at least 1"));
        }
        if self.num_sync_batches == 0 {
            return Err(CoreError::invalid_config(
                "num_sync_batches must be at least 1",
            ));
        }
        match self.segment_capacity_bytes {
            Some(bytes) => {
                if !(SEGMENT_CAPACITY_MIN..=u64::from(u32::MAX)).contains(&bytes) {
                    return Err(CoreError::invalid_config(format!(
                        "segment_capacity_bytes {bytes} outside [{SEGMENT_CAPACITY_MIN}, {}]",
                        u32::MAX
                    )));
                }
            }
            None => {
                if !(SEGMENT_FILE_SIZE_MB_MIN..=SEGMENT_FILE_SIZE_MB_MAX)
                    .contains(&self.segment_file_size_mb)
                {
                    return Err(CoreError::invalid_config(format!(
                        "segment_file_size_mb {} outside [{SEGMENT_FILE_SIZE_MB_MIN}, {SEGMENT_FILE_SIZE_MB_MAX}]",
                        self.segment_file_size_mb
                    )));
                }
            }
        }
        if !(self.segment_compact_factor > 0.0 && self.segment_compact_factor < 1.0) {
            return Err(CoreError::invalid_config(format!(
                "segment_compact_factor {} must be in (0, 1)",
                self.segment_compact_factor
            )));
        }
        if !(self.hash_load_factor > 0.0 && self.hash_load_factor <= 1.0) {
            return Err(CoreError::invalid_config(format!(
                "hash_load_factor {} must be in (0, 1]",
                self.hash_load_factor
            )));
        }
        if !self.unit_capacity.is_power_of_two() {
            return Err(CoreError::invalid_config(format!(
                "unit_capacity {} must be a power of two",
                self.unit_capacity
            )));
        }
        if self.initial_capacity > max_capacity(self.unit_capacity) {
            return Err(CoreError::invalid_config(format!(
                "initial_capacity {} exceeds {} units of {} slots",
                self.initial_capacity, MAX_UNITS, self.unit_capacity
            )));
        }
        if self.max_segments < 2 {
            return Err(CoreError::invalid_config("max_segments must be at least 2"));
        }
        Ok(())
    }
}

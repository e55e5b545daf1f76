//! Error types for SegStore core.

use crate::types::SegmentId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SegStore core operations.
///
/// `get` never uses an error to say "nothing stored here": an empty position
/// is `Ok(None)`. Every variant below means the operation could not be
/// completed.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] segstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Position lies outside `[index_start, index_start + capacity)`.
    #[error("position {position} out of range [{start}, {end})")]
    PositionOutOfRange {
        /// The requested position.
        position: u64,
        /// First valid position.
        start: u64,
        /// One past the last valid position.
        end: u64,
    },

    /// The record does not fit in the segment.
    ///
    /// Consumed by the store to rotate to a new segment; never returned from
    /// the public store API.
    #[error("segment {segment} full: {requested} bytes requested, {remaining} remaining")]
    SegmentFull {
        /// The full segment.
        segment: SegmentId,
        /// Frame size that did not fit.
        requested: u64,
        /// Bytes left in the segment.
        remaining: u64,
    },

    /// A stored record does not match its address or fails its checksum.
    #[error("corrupt record in segment {segment} at offset {offset}: {message}")]
    CorruptRecord {
        /// Segment holding the record.
        segment: SegmentId,
        /// Frame offset.
        offset: u64,
        /// Description of the mismatch.
        message: String,
    },

    /// The address refers to a segment that does not exist (or was released).
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),

    /// The configured segment budget is used up and nothing can be reclaimed.
    #[error("segment capacity exhausted: {max_segments} segments in use")]
    CapacityExhausted {
        /// Configured maximum number of segments.
        max_segments: u32,
    },

    /// A durability sync failed; acknowledged writes may not be on disk.
    #[error("flush failed: {message}")]
    FlushFailed {
        /// Description of the failure.
        message: String,
    },

    /// On-disk metadata is invalid or incompatible.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The store configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Another process or handle holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(segment: SegmentId, offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            segment,
            offset,
            message: message.into(),
        }
    }

    /// Creates a flush failed error.
    pub fn flush_failed(message: impl Into<String>) -> Self {
        Self::FlushFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate damaged or missing data.
    #[must_use]
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::SegmentNotFound(_) | Self::InvalidFormat { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_classification() {
        assert!(CoreError::corrupt_record(SegmentId::new(1), 16, "crc").is_integrity_error());
        assert!(CoreError::SegmentNotFound(SegmentId::new(3)).is_integrity_error());
        assert!(!CoreError::flush_failed("disk gone").is_integrity_error());
        assert!(!CoreError::StoreClosed.is_integrity_error());
    }

    #[test]
    fn display_messages() {
        let err = CoreError::PositionOutOfRange {
            position: 10,
            start: 0,
            end: 8,
        };
        assert_eq!(err.to_string(), "position 10 out of range [0, 8)");

        let err = CoreError::SegmentNotFound(SegmentId::new(7));
        assert_eq!(err.to_string(), "segment seg:7 not found");
    }
}

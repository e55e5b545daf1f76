//! Segment storage for values.
//!
//! Segments are append-only files that hold value records. Exactly one
//! segment receives the store writer's appends at a time; once sealed a
//! segment is never modified, only relocated out of by compaction.
//!
//! ## Segment File Format
//!
//! ```text
//! | magic (4) | version (2) | reserved (2) | capacity (8) |      header
//! | payload_len (4) | position (8) | payload (N) | crc32 (4) |  record, repeated
//! ```

mod file;
mod manager;
mod record;

pub use file::{Segment, SegmentStatus};
pub use manager::{segment_file_name, SegmentManager, SegmentStats};
pub use record::{
    compute_crc32, FrameError, SegmentHeader, SegmentRecord, RECORD_OVERHEAD,
    SEGMENT_HEADER_SIZE,
};

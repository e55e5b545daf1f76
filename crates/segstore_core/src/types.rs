//! Core type definitions for SegStore.

use crate::segment::RECORD_OVERHEAD;
use std::fmt;

/// Identifier of a segment file.
///
/// Segment IDs are monotonically increasing within a store and never reused.
/// ID 0 is reserved for [`Address::EMPTY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// The reserved "no segment" id.
    pub const NONE: Self = Self(0);

    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next segment ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true for the reserved id 0.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Location of one record: `(segment, offset, length)`.
///
/// `offset` is the start of the record frame inside the segment file and
/// `length` is the payload length. Addresses are plain values; an index slot
/// owns the address it stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address {
    segment: SegmentId,
    offset: u32,
    length: u32,
}

impl Address {
    /// The "no value at this position" sentinel.
    pub const EMPTY: Self = Self {
        segment: SegmentId::NONE,
        offset: 0,
        length: 0,
    };

    /// Encoded size of an address inside an index unit file.
    pub const ENCODED_SIZE: usize = 12;

    /// Creates a new address.
    #[must_use]
    pub const fn new(segment: SegmentId, offset: u32, length: u32) -> Self {
        Self {
            segment,
            offset,
            length,
        }
    }

    /// Returns the owning segment.
    #[must_use]
    pub const fn segment(self) -> SegmentId {
        self.segment
    }

    /// Returns the frame offset inside the segment.
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Returns the payload length.
    #[must_use]
    pub const fn length(self) -> u32 {
        self.length
    }

    /// Returns true for the empty sentinel.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.segment.is_none()
    }

    /// Bytes the record occupies in its segment, frame included.
    #[must_use]
    pub const fn frame_len(self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.length as u64 + RECORD_OVERHEAD as u64
        }
    }

    /// Encodes the address as 12 little-endian bytes.
    #[must_use]
    pub fn encode(self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..4].copy_from_slice(&self.segment.as_u32().to_le_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decodes an address written by [`Address::encode`].
    #[must_use]
    pub fn decode(buf: &[u8; Self::ENCODED_SIZE]) -> Self {
        let segment = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let offset = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let length = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if segment == 0 {
            return Self::EMPTY;
        }
        Self::new(SegmentId::new(segment), offset, length)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "empty")
        } else {
            write!(f, "{}@{}+{}", self.segment, self.offset, self.length)
        }
    }
}

/// Sizing policy of an index array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// Capacity fixed at creation.
    Static,
    /// Capacity grows on demand, never shrinks.
    Dynamic,
}

impl ArrayKind {
    /// Returns the on-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Static => 0,
            Self::Dynamic => 1,
        }
    }

    /// Parses an on-disk tag.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Static),
            1 => Some(Self::Dynamic),
            _ => None,
        }
    }
}

impl fmt::Display for ArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_ordering() {
        let s1 = SegmentId::new(1);
        assert!(s1 < s1.next());
        assert!(SegmentId::NONE.is_none());
        assert_eq!(format!("{s1}"), "seg:1");
    }

    #[test]
    fn address_encoding() {
        let addr = Address::new(SegmentId::new(9), 4096, 17);
        assert_eq!(Address::decode(&addr.encode()), addr);
        assert_eq!(Address::decode(&[0u8; 12]), Address::EMPTY);
        assert_eq!(addr.frame_len(), 17 + RECORD_OVERHEAD as u64);
        assert_eq!(Address::EMPTY.frame_len(), 0);
    }

    #[test]
    fn array_kind_tags() {
        for kind in [ArrayKind::Static, ArrayKind::Dynamic] {
            assert_eq!(ArrayKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(ArrayKind::from_byte(7), None);
    }
}

//! Segment record and header framing.

use thiserror::Error;

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SGSG";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Size of the segment file header.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Frame header: payload_len (4) + position (8).
pub const RECORD_HEADER_SIZE: usize = 12;

/// Trailing CRC size.
pub const RECORD_CRC_SIZE: usize = 4;

/// Bytes a frame adds around its payload.
pub const RECORD_OVERHEAD: usize = RECORD_HEADER_SIZE + RECORD_CRC_SIZE;

/// Computes the IEEE CRC32 used by segment frames and metadata files.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Fixed header at offset 0 of a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Segment capacity in bytes, header included.
    pub capacity: u64,
}

impl SegmentHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.capacity.to_le_bytes());
        buf
    }

    /// Decodes a header, checking magic and version.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < SEGMENT_HEADER_SIZE {
            return Err(FrameError::TooShort {
                needed: SEGMENT_HEADER_SIZE,
                available: data.len(),
            });
        }
        if data[0..4] != SEGMENT_MAGIC {
            return Err(FrameError::BadHeader("invalid segment magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > SEGMENT_VERSION {
            return Err(FrameError::BadHeader("unsupported segment version"));
        }
        let mut cap = [0u8; 8];
        cap.copy_from_slice(&data[8..16]);
        Ok(Self {
            capacity: u64::from_le_bytes(cap),
        })
    }
}

/// Reasons a frame failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than the frame needs.
    #[error("frame needs {needed} bytes, {available} available")]
    TooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },
    /// Stored CRC differs from the computed one.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    Checksum {
        /// CRC stored in the frame.
        expected: u32,
        /// CRC computed over the frame.
        actual: u32,
    },
    /// Segment header is not recognized.
    #[error("{0}")]
    BadHeader(&'static str),
}

/// A record stored in a segment.
///
/// ```text
/// | payload_len (4) | position (8) | payload (N) | crc32 (4) |
/// ```
///
/// The owning index position travels with the payload so a segment can be
/// walked and checked against the index without any side table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Index position that owned the record when it was written.
    pub position: u64,
    /// Value bytes.
    pub payload: Vec<u8>,
}

impl SegmentRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(position: u64, payload: Vec<u8>) -> Self {
        Self { position, payload }
    }

    /// Encodes a frame directly from borrowed parts.
    #[must_use]
    pub fn encode_parts(position: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_OVERHEAD + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&position.to_le_bytes());
        buf.extend_from_slice(payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Encodes the record to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        Self::encode_parts(self.position, &self.payload)
    }

    /// Reads `(payload_len, position)` from a frame header.
    pub fn decode_header(data: &[u8]) -> Result<(u32, u64), FrameError> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(FrameError::TooShort {
                needed: RECORD_HEADER_SIZE,
                available: data.len(),
            });
        }
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let mut pos = [0u8; 8];
        pos.copy_from_slice(&data[4..12]);
        Ok((len, u64::from_le_bytes(pos)))
    }

    /// Decodes a complete frame, verifying its CRC.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let (len, position) = Self::decode_header(data)?;
        let frame_len = RECORD_OVERHEAD + len as usize;
        if data.len() < frame_len {
            return Err(FrameError::TooShort {
                needed: frame_len,
                available: data.len(),
            });
        }

        let body_end = frame_len - RECORD_CRC_SIZE;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = compute_crc32(&data[..body_end]);
        if stored != computed {
            return Err(FrameError::Checksum {
                expected: stored,
                actual: computed,
            });
        }

        Ok(Self {
            position,
            payload: data[RECORD_HEADER_SIZE..body_end].to_vec(),
        })
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        RECORD_OVERHEAD + self.payload.len()
    }
}

//! Checkpoint marker: the durable root of a store.
//!
//! The marker names the array shape, the live generation of every index
//! unit, and the segments that were empty when it was written. Everything a
//! reopen needs is reachable from it.

use crate::error::{CoreError, CoreResult};
use crate::segment::compute_crc32;
use crate::types::{ArrayKind, SegmentId};

/// Magic bytes for the checkpoint marker.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"SGCK";

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// Decoded checkpoint marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Sizing policy of the index array.
    pub kind: ArrayKind,
    /// Slots per index unit.
    pub unit_capacity: u32,
    /// First valid position.
    pub index_start: u64,
    /// Number of addressable positions.
    pub capacity: u64,
    /// Checkpoint counter, starting at 1 for the first marker.
    pub sequence: u64,
    /// Batches completed over the life of the store.
    pub batches: u64,
    /// Next segment id to allocate.
    pub next_segment_id: SegmentId,
    /// Segment under compaction when the marker was written, if any.
    pub compacting: SegmentId,
    /// Live file generation per unit; 0 means the unit was never written.
    pub unit_generations: Vec<u64>,
    /// Segments with no live records at marker time.
    pub recyclable: Vec<SegmentId>,
}

impl Checkpoint {
    /// Creates the marker of an empty store.
    #[must_use]
    pub fn new(kind: ArrayKind, unit_capacity: u32, capacity: u64, units: usize) -> Self {
        Self {
            kind,
            unit_capacity,
            index_start: 0,
            capacity,
            sequence: 0,
            batches: 0,
            next_segment_id: SegmentId::new(1),
            compacting: SegmentId::NONE,
            unit_generations: vec![0; units],
            recyclable: Vec::new(),
        }
    }

    /// Encodes the marker to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.unit_generations.len() * 8);

        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.push(self.kind.as_byte());
        buf.push(0);
        buf.extend_from_slice(&self.unit_capacity.to_le_bytes());
        buf.extend_from_slice(&self.index_start.to_le_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.batches.to_le_bytes());
        buf.extend_from_slice(&self.next_segment_id.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.compacting.as_u32().to_le_bytes());

        let units = u32::try_from(self.unit_generations.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&units.to_le_bytes());
        for generation in &self.unit_generations {
            buf.extend_from_slice(&generation.to_le_bytes());
        }

        let recyclable = u32::try_from(self.recyclable.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&recyclable.to_le_bytes());
        for id in &self.recyclable {
            buf.extend_from_slice(&id.as_u32().to_le_bytes());
        }

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a marker, verifying magic, version and checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 8 {
            return Err(CoreError::invalid_format("checkpoint too short"));
        }
        let (body, crc) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if compute_crc32(body) != stored {
            return Err(CoreError::invalid_format("checkpoint checksum mismatch"));
        }

        let mut r = Reader::new(body);
        if r.take(4)? != CHECKPOINT_MAGIC {
            return Err(CoreError::invalid_format("invalid checkpoint magic"));
        }
        let version = r.u16()?;
        if version > CHECKPOINT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported checkpoint version: {version}"
            )));
        }
        let kind_byte = r.u8()?;
        let kind = ArrayKind::from_byte(kind_byte).ok_or_else(|| {
            CoreError::invalid_format(format!("unknown array kind tag {kind_byte}"))
        })?;
        let _reserved = r.u8()?;

        let unit_capacity = r.u32()?;
        if !unit_capacity.is_power_of_two() {
            return Err(CoreError::invalid_format(format!(
                "unit capacity {unit_capacity} is not a power of two"
            )));
        }
        let index_start = r.u64()?;
        let capacity = r.u64()?;
        let sequence = r.u64()?;
        let batches = r.u64()?;
        let next_segment_id = SegmentId::new(r.u32()?);
        let compacting = SegmentId::new(r.u32()?);

        let units = r.u32()? as usize;
        let expected_units = capacity.div_ceil(u64::from(unit_capacity));
        if units as u64 != expected_units {
            return Err(CoreError::invalid_format(format!(
                "checkpoint lists {units} units, capacity {capacity} needs {expected_units}"
            )));
        }
        let mut unit_generations = Vec::with_capacity(units);
        for _ in 0..units {
            unit_generations.push(r.u64()?);
        }

        let recyclable_count = r.u32()? as usize;
        let mut recyclable = Vec::with_capacity(recyclable_count.min(1024));
        for _ in 0..recyclable_count {
            recyclable.push(SegmentId::new(r.u32()?));
        }

        if !r.is_empty() {
            return Err(CoreError::invalid_format("trailing bytes in checkpoint"));
        }

        Ok(Self {
            kind,
            unit_capacity,
            index_start,
            capacity,
            sequence,
            batches,
            next_segment_id,
            compacting,
            unit_generations,
            recyclable,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(CoreError::invalid_format("checkpoint too short"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        let mut cp = Checkpoint::new(ArrayKind::Dynamic, 1024, 4096, 4);
        cp.sequence = 3;
        cp.batches = 12;
        cp.next_segment_id = SegmentId::new(9);
        cp.unit_generations = vec![3, 0, 2, 1];
        cp.recyclable = vec![SegmentId::new(4), SegmentId::new(6)];
        cp
    }

    #[test]
    fn encode_decode() {
        let cp = sample();
        assert_eq!(Checkpoint::decode(&cp.encode()).unwrap(), cp);
    }

    #[test]
    fn flipped_byte_is_rejected() {
        let mut data = sample().encode();
        data[20] ^= 0x01;
        assert!(matches!(
            Checkpoint::decode(&data),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn truncated_marker_is_rejected() {
        let data = sample().encode();
        assert!(Checkpoint::decode(&data[..data.len() - 5]).is_err());
        assert!(Checkpoint::decode(&data[..3]).is_err());
    }

    #[test]
    fn unit_count_must_match_capacity() {
        let mut cp = sample();
        cp.unit_generations.pop();
        assert!(Checkpoint::decode(&cp.encode()).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut cp = sample().encode();
        cp[0] = b'X';
        let len = cp.len();
        let crc = compute_crc32(&cp[..len - 4]);
        cp[len - 4..].copy_from_slice(&crc.to_le_bytes());
        let err = Checkpoint::decode(&cp).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }
}

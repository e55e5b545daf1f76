//! A single segment file.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{
    SegmentHeader, SegmentRecord, RECORD_HEADER_SIZE, RECORD_OVERHEAD,
    SEGMENT_HEADER_SIZE,
};
use crate::types::{Address, SegmentId};
use segstore_storage::{StorageBackend, StorageError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentStatus {
    /// Current append target.
    Writable,
    /// Sealed; content never changes.
    ReadOnly,
    /// Live records are being relocated out of it.
    Compacting,
    /// No live references remain; storage may be released once a checkpoint
    /// has recorded it.
    Recyclable,
}

impl SegmentStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Writable => 0,
            Self::ReadOnly => 1,
            Self::Compacting => 2,
            Self::Recyclable => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Writable,
            1 => Self::ReadOnly,
            2 => Self::Compacting,
            _ => Self::Recyclable,
        }
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Writable => "writable",
            Self::ReadOnly => "read-only",
            Self::Compacting => "compacting",
            Self::Recyclable => "recyclable",
        };
        f.write_str(s)
    }
}

/// One append-only segment file.
///
/// At most one thread appends to a segment (the store writer for the active
/// segment, or the compactor for its target). Reads are positional and may
/// run concurrently with the append.
pub struct Segment {
    id: SegmentId,
    capacity: u64,
    backend: Box<dyn StorageBackend>,
    status: AtomicU8,
    live_bytes: AtomicU64,
    /// Appended since the last sync.
    dirty: AtomicBool,
}

impl Segment {
    /// Initializes a fresh, writable segment on an empty backend.
    pub fn create(
        id: SegmentId,
        capacity: u64,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        if backend.size()? != 0 {
            backend.truncate(0)?;
        }
        backend.append(&SegmentHeader { capacity }.encode())?;

        Ok(Self {
            id,
            capacity,
            backend,
            status: AtomicU8::new(SegmentStatus::Writable.as_u8()),
            live_bytes: AtomicU64::new(0),
            dirty: AtomicBool::new(true),
        })
    }

    /// Opens an existing segment as read-only.
    pub fn open(id: SegmentId, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < SEGMENT_HEADER_SIZE as u64 {
            return Err(CoreError::invalid_format(format!(
                "segment {id} is {size} bytes, shorter than its header"
            )));
        }
        let header = SegmentHeader::decode(&backend.read_at(0, SEGMENT_HEADER_SIZE)?)
            .map_err(|e| CoreError::invalid_format(format!("segment {id}: {e}")))?;

        Ok(Self {
            id,
            capacity: header.capacity,
            backend,
            status: AtomicU8::new(SegmentStatus::ReadOnly.as_u8()),
            live_bytes: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        })
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the capacity in bytes, header included.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the current append offset.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn status(&self) -> SegmentStatus {
        SegmentStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: SegmentStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Moves `from` to `to` if the segment is currently in `from`.
    pub(crate) fn transition(&self, from: SegmentStatus, to: SegmentStatus) -> bool {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the bytes still referenced by the index.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub(crate) fn add_live(&self, bytes: u64) {
        self.live_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn sub_live(&self, bytes: u64) {
        let _ = self
            .live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    pub(crate) fn reset_live(&self) {
        self.live_bytes.store(0, Ordering::Release);
    }

    /// Fraction of the record area still referenced.
    #[must_use]
    pub fn live_ratio(&self) -> f64 {
        let usable = self.capacity.saturating_sub(SEGMENT_HEADER_SIZE as u64);
        if usable == 0 {
            return 0.0;
        }
        self.live_bytes() as f64 / usable as f64
    }

    /// Appends one record and returns its address.
    ///
    /// Fails with `SegmentFull` when the frame does not fit; the segment is
    /// left unchanged in that case.
    pub fn append(&self, position: u64, payload: &[u8]) -> CoreResult<Address> {
        if self.status() != SegmentStatus::Writable {
            return Err(CoreError::invalid_operation(format!(
                "append to {} segment {}",
                self.status(),
                self.id
            )));
        }
        let length = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("value larger than 4 GiB"))?;

        let frame_len = (RECORD_OVERHEAD + payload.len()) as u64;
        let offset = self.backend.size()?;
        if offset + frame_len > self.capacity {
            return Err(CoreError::SegmentFull {
                segment: self.id,
                requested: frame_len,
                remaining: self.capacity.saturating_sub(offset),
            });
        }

        let frame = SegmentRecord::encode_parts(position, payload);
        let written = self.backend.append(&frame)?;
        self.dirty.store(true, Ordering::Release);
        self.add_live(frame_len);

        let offset = u32::try_from(written)
            .map_err(|_| CoreError::invalid_operation("segment offset exceeds 4 GiB"))?;
        Ok(Address::new(self.id, offset, length))
    }

    /// Reads the record stored at `address`.
    pub fn read_record(&self, address: Address) -> CoreResult<SegmentRecord> {
        let offset = u64::from(address.offset());
        if offset < SEGMENT_HEADER_SIZE as u64 {
            return Err(CoreError::corrupt_record(
                self.id,
                offset,
                "address points into the segment header",
            ));
        }

        let frame_len = RECORD_OVERHEAD + address.length() as usize;
        let data = self
            .backend
            .read_at(offset, frame_len)
            .map_err(|e| match e {
                StorageError::ReadPastEnd { .. } => {
                    CoreError::corrupt_record(self.id, offset, "record extends beyond segment")
                }
                other => CoreError::Storage(other),
            })?;

        let (len, _) = SegmentRecord::decode_header(&data)
            .map_err(|e| CoreError::corrupt_record(self.id, offset, e.to_string()))?;
        if len != address.length() {
            return Err(CoreError::corrupt_record(
                self.id,
                offset,
                format!("frame length {len} does not match address length {}", address.length()),
            ));
        }

        SegmentRecord::decode(&data)
            .map_err(|e| CoreError::corrupt_record(self.id, offset, e.to_string()))
    }

    /// Reads the payload stored at `address`.
    pub fn read(&self, address: Address) -> CoreResult<Vec<u8>> {
        Ok(self.read_record(address)?.payload)
    }

    /// Reads the frame starting at `offset`, for sequential walks.
    ///
    /// Returns `Ok(None)` at the end of the data, including a torn final
    /// frame left by a crash mid-append. A complete frame with a bad CRC is
    /// an error.
    pub fn record_at(&self, offset: u64) -> CoreResult<Option<(Address, SegmentRecord)>> {
        let size = self.backend.size()?;
        if offset + RECORD_HEADER_SIZE as u64 > size {
            return Ok(None);
        }
        let header = self.backend.read_at(offset, RECORD_HEADER_SIZE)?;
        let (len, _) = SegmentRecord::decode_header(&header)
            .map_err(|e| CoreError::corrupt_record(self.id, offset, e.to_string()))?;

        let frame_len = RECORD_OVERHEAD as u64 + u64::from(len);
        if offset + frame_len > size {
            return Ok(None);
        }

        let data = self.backend.read_at(offset, frame_len as usize)?;
        let record = SegmentRecord::decode(&data)
            .map_err(|e| CoreError::corrupt_record(self.id, offset, e.to_string()))?;

        let offset32 = u32::try_from(offset)
            .map_err(|_| CoreError::corrupt_record(self.id, offset, "offset exceeds 4 GiB"))?;
        Ok(Some((Address::new(self.id, offset32, len), record)))
    }

    /// Offset of the first record.
    #[must_use]
    pub const fn first_record_offset() -> u64 {
        SEGMENT_HEADER_SIZE as u64
    }

    /// Syncs appended data if anything was written since the last sync.
    pub fn sync(&self) -> CoreResult<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(e) = self.backend.sync() {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(true)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("status", &self.status())
            .field("live_bytes", &self.live_bytes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_storage::InMemoryBackend;

    fn create_segment(capacity: u64) -> Segment {
        Segment::create(SegmentId::new(1), capacity, Box::new(InMemoryBackend::new())).unwrap()
    }

    #[test]
    fn append_and_read() {
        let segment = create_segment(4096);

        let a = segment.append(3, b"alpha").unwrap();
        let b = segment.append(9, b"beta").unwrap();

        assert_eq!(a.offset() as usize, SEGMENT_HEADER_SIZE);
        assert_eq!(b.offset() as usize, SEGMENT_HEADER_SIZE + RECORD_OVERHEAD + 5);
        assert_eq!(segment.read(a).unwrap(), b"alpha");
        assert_eq!(segment.read_record(b).unwrap().position, 9);
        assert_eq!(segment.live_bytes(), a.frame_len() + b.frame_len());
    }

    #[test]
    fn segment_full_leaves_segment_unchanged() {
        let segment = create_segment(64);
        segment.append(0, &[1u8; 20]).unwrap();
        let size = segment.size().unwrap();

        let result = segment.append(1, &[2u8; 20]);
        assert!(matches!(result, Err(CoreError::SegmentFull { .. })));
        assert_eq!(segment.size().unwrap(), size);
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let segment = create_segment(4096);
        let addr = segment.append(0, b"hello").unwrap();
        let wrong = Address::new(addr.segment(), addr.offset(), 3);

        assert!(matches!(
            segment.read(wrong),
            Err(CoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn read_past_end_is_corrupt() {
        let segment = create_segment(4096);
        let addr = Address::new(SegmentId::new(1), 2000, 10);
        assert!(matches!(
            segment.read(addr),
            Err(CoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn checksum_failure_is_corrupt() {
        let mut data = SegmentHeader { capacity: 4096 }.encode().to_vec();
        let mut frame = SegmentRecord::new(5, b"payload".to_vec()).encode();
        frame[14] ^= 0x55;
        data.extend_from_slice(&frame);

        let segment =
            Segment::open(SegmentId::new(2), Box::new(InMemoryBackend::with_data(data))).unwrap();
        let addr = Address::new(SegmentId::new(2), SEGMENT_HEADER_SIZE as u32, 7);
        assert!(matches!(
            segment.read(addr),
            Err(CoreError::CorruptRecord { .. })
        ));
        assert!(segment.record_at(addr.offset().into()).is_err());
    }

    #[test]
    fn walk_stops_at_torn_tail() {
        let mut data = SegmentHeader { capacity: 4096 }.encode().to_vec();
        data.extend_from_slice(&SegmentRecord::new(1, b"one".to_vec()).encode());
        let torn = SegmentRecord::new(2, b"two".to_vec()).encode();
        data.extend_from_slice(&torn[..torn.len() - 2]);

        let segment =
            Segment::open(SegmentId::new(4), Box::new(InMemoryBackend::with_data(data))).unwrap();
        assert_eq!(segment.status(), SegmentStatus::ReadOnly);

        let (addr, record) = segment
            .record_at(Segment::first_record_offset())
            .unwrap()
            .unwrap();
        assert_eq!(record.payload, b"one");
        let next = u64::from(addr.offset()) + addr.frame_len();
        assert!(segment.record_at(next).unwrap().is_none());
    }

    #[test]
    fn sealed_segment_rejects_append() {
        let segment = create_segment(4096);
        assert!(segment.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly));
        assert!(matches!(
            segment.append(0, b"x"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn live_bytes_never_underflow() {
        let segment = create_segment(4096);
        segment.append(0, b"abc").unwrap();
        segment.sub_live(10_000);
        assert_eq!(segment.live_bytes(), 0);
    }

    #[test]
    fn sync_only_when_dirty() {
        let segment = create_segment(4096);
        assert!(segment.sync().unwrap());
        assert!(!segment.sync().unwrap());
        segment.append(0, b"x").unwrap();
        assert!(segment.sync().unwrap());
    }
}

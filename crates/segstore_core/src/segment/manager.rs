//! Segment set management: allocation, lookup, accounting, recycling.

use crate::error::{CoreError, CoreResult};
use crate::segment::file::{Segment, SegmentStatus};
use crate::segment::record::SEGMENT_HEADER_SIZE;
use crate::types::{Address, SegmentId};
use parking_lot::{Mutex, RwLock};
use segstore_storage::BackendFactory;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Point-in-time description of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    /// Segment id.
    pub id: SegmentId,
    /// Lifecycle state.
    pub status: SegmentStatus,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Bytes written, header included.
    pub size: u64,
    /// Bytes still referenced by the index.
    pub live_bytes: u64,
    /// `live_bytes` over the usable capacity.
    pub live_ratio: f64,
}

/// Owns every segment of one store.
///
/// The segment table is behind a read-write lock that is only held long
/// enough to clone an `Arc<Segment>`; no I/O happens under it. Allocation is
/// serialized separately so the writer and the compactor can both request
/// segments.
pub struct SegmentManager {
    dir: PathBuf,
    factory: Arc<dyn BackendFactory>,
    segment_capacity: u64,
    max_segments: u32,
    segments: RwLock<BTreeMap<SegmentId, Arc<Segment>>>,
    next_id: Mutex<SegmentId>,
}

impl SegmentManager {
    /// Opens every `seg-*.dat` file under `dir`.
    ///
    /// Segments listed in `recyclable` were recorded by a durable checkpoint
    /// and are deleted; all others come back read-only. Ids continue after
    /// `max(next_id, highest id on disk + 1)`.
    pub fn open(
        dir: &Path,
        factory: Arc<dyn BackendFactory>,
        segment_capacity: u64,
        max_segments: u32,
        next_id: SegmentId,
        recyclable: &[SegmentId],
    ) -> CoreResult<Self> {
        fs::create_dir_all(dir)?;

        let mut segments = BTreeMap::new();
        let mut next = if next_id.is_none() {
            SegmentId::new(1)
        } else {
            next_id
        };

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(id) = parse_segment_file_name(&path) else {
                continue;
            };

            if id >= next {
                next = id.next();
            }
            if recyclable.contains(&id) {
                remove_segment_file(id, &path);
                continue;
            }

            let backend = factory.open(&path)?;
            if backend.size()? < SEGMENT_HEADER_SIZE as u64 {
                // Created but never synced before a crash; holds no records.
                drop(backend);
                warn!(segment = %id, "removing segment file with a torn header");
                fs::remove_file(&path)?;
                continue;
            }
            let segment = Segment::open(id, backend)?;
            segments.insert(id, Arc::new(segment));
        }

        debug!(count = segments.len(), next = %next, "opened segments");

        Ok(Self {
            dir: dir.to_path_buf(),
            factory,
            segment_capacity,
            max_segments,
            segments: RwLock::new(segments),
            next_id: Mutex::new(next),
        })
    }

    /// Returns the file path of a segment.
    #[must_use]
    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.dir.join(segment_file_name(id))
    }

    /// Returns the capacity of a regular segment.
    #[must_use]
    pub fn segment_capacity(&self) -> u64 {
        self.segment_capacity
    }

    /// Returns the id the next allocation will use.
    #[must_use]
    pub fn next_segment_id(&self) -> SegmentId {
        *self.next_id.lock()
    }

    /// Creates a writable segment that can hold at least `min_capacity` bytes
    /// of records.
    ///
    /// Released segments no longer count against the segment budget. Ids
    /// are never handed out twice.
    ///
    /// # Errors
    ///
    /// `CapacityExhausted` when `max_segments` segments exist.
    pub fn allocate_writable_segment(&self, min_capacity: u64) -> CoreResult<Arc<Segment>> {
        let mut next = self.next_id.lock();

        if self.segments.read().len() >= self.max_segments as usize {
            return Err(CoreError::CapacityExhausted {
                max_segments: self.max_segments,
            });
        }

        let capacity = self
            .segment_capacity
            .max(min_capacity + SEGMENT_HEADER_SIZE as u64);
        if capacity > u64::from(u32::MAX) {
            return Err(CoreError::invalid_operation(format!(
                "record of {min_capacity} bytes exceeds the largest segment"
            )));
        }

        let id = *next;
        let backend = self.factory.open(&self.segment_path(id))?;
        let segment = Arc::new(Segment::create(id, capacity, backend)?);
        *next = id.next();

        self.segments.write().insert(id, Arc::clone(&segment));
        debug!(segment = %id, capacity, "allocated segment");
        Ok(segment)
    }

    /// Looks up a segment.
    pub fn get(&self, id: SegmentId) -> CoreResult<Arc<Segment>> {
        self.segments
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::SegmentNotFound(id))
    }

    /// Reads the payload at `address`.
    pub fn read(&self, address: Address) -> CoreResult<Vec<u8>> {
        if address.is_empty() {
            return Err(CoreError::invalid_operation("read of the empty address"));
        }
        self.get(address.segment())?.read(address)
    }

    /// Accounts for `address` no longer being referenced.
    pub fn mark_overwritten(&self, address: Address) {
        if address.is_empty() {
            return;
        }
        match self.get(address.segment()) {
            Ok(segment) => segment.sub_live(address.frame_len()),
            Err(_) => debug!(address = %address, "overwritten address has no segment"),
        }
    }

    /// Accounts for `address` being referenced (used when rebuilding counters).
    pub(crate) fn mark_live(&self, address: Address) -> bool {
        match self.get(address.segment()) {
            Ok(segment) => {
                segment.add_live(address.frame_len());
                true
            }
            Err(_) => false,
        }
    }

    /// Syncs every segment appended since its last sync.
    ///
    /// Returns the number of segments synced.
    pub fn sync_dirty(&self) -> CoreResult<usize> {
        let segments: Vec<Arc<Segment>> = self.segments.read().values().cloned().collect();
        let mut synced = 0;
        for segment in segments {
            if segment.sync()? {
                synced += 1;
            }
        }
        Ok(synced)
    }

    /// Returns the read-only segment with the lowest live ratio below
    /// `factor`, ignoring the ids in `skip`.
    #[must_use]
    pub fn compaction_candidate(&self, factor: f64, skip: &[SegmentId]) -> Option<Arc<Segment>> {
        self.segments
            .read()
            .values()
            .filter(|s| {
                s.status() == SegmentStatus::ReadOnly
                    && s.live_ratio() < factor
                    && !skip.contains(&s.id())
            })
            .min_by(|a, b| a.live_ratio().total_cmp(&b.live_ratio()))
            .cloned()
    }

    /// Ids of all recyclable segments not yet released.
    #[must_use]
    pub fn recyclable_ids(&self) -> Vec<SegmentId> {
        self.segments
            .read()
            .values()
            .filter(|s| s.status() == SegmentStatus::Recyclable)
            .map(|s| s.id())
            .collect()
    }

    /// Releases every recyclable segment in `ids`, which a durable
    /// checkpoint has recorded, and deletes their files.
    ///
    /// Readers that still hold an `Arc<Segment>` keep reading the open
    /// handle; new lookups see `SegmentNotFound`. Returns the number of
    /// segments released.
    pub fn release_recyclable(&self, ids: &[SegmentId]) -> usize {
        let mut released = Vec::new();
        {
            let mut segments = self.segments.write();
            for &id in ids {
                if segments
                    .get(&id)
                    .is_some_and(|s| s.status() == SegmentStatus::Recyclable)
                {
                    segments.remove(&id);
                    released.push(id);
                }
            }
        }
        for &id in &released {
            remove_segment_file(id, &self.segment_path(id));
        }
        if !released.is_empty() {
            debug!(count = released.len(), "released recycled segments");
        }
        released.len()
    }

    /// Marks every segment recyclable, for a full clear.
    pub fn recycle_all(&self) {
        for segment in self.segments.read().values() {
            segment.reset_live();
            if segment.status() != SegmentStatus::Recyclable {
                segment.set_status(SegmentStatus::Recyclable);
            }
        }
    }

    /// Zeroes every live-byte counter before a recount.
    pub(crate) fn reset_live_bytes(&self) {
        for segment in self.segments.read().values() {
            segment.reset_live();
        }
    }

    /// Number of segments, recyclable ones included.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Per-segment statistics in id order.
    pub fn stats(&self) -> CoreResult<Vec<SegmentStats>> {
        let segments: Vec<Arc<Segment>> = self.segments.read().values().cloned().collect();
        segments
            .iter()
            .map(|s| {
                Ok(SegmentStats {
                    id: s.id(),
                    status: s.status(),
                    capacity: s.capacity(),
                    size: s.size()?,
                    live_bytes: s.live_bytes(),
                    live_ratio: s.live_ratio(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentManager")
            .field("dir", &self.dir)
            .field("segment_capacity", &self.segment_capacity)
            .field("segment_count", &self.segment_count())
            .finish_non_exhaustive()
    }
}

/// Returns the file name of a segment (`seg-000001.dat`).
#[must_use]
pub fn segment_file_name(id: SegmentId) -> String {
    format!("seg-{:06}.dat", id.as_u32())
}

fn remove_segment_file(id: SegmentId, path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(segment = %id, error = %e, "failed to delete recycled segment file");
        }
    }
}

fn parse_segment_file_name(path: &Path) -> Option<SegmentId> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix("seg-")?.strip_suffix(".dat")?;
    let id: u32 = digits.parse().ok()?;
    (id != 0).then_some(SegmentId::new(id))
}

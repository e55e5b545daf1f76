//! The array store: an index array over append-only segments.

use crate::batch::{BatchAction, BatchController, BatchState};
use crate::checkpoint::Checkpoint;
use crate::compaction::{CompactionReport, Compactor, CompactorHandle, SegmentCompaction};
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{max_capacity, unit_layout, IndexArray, Unit};
use crate::segment::{Segment, SegmentManager, SegmentStats, SegmentStatus, RECORD_OVERHEAD};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::types::{Address, ArrayKind, SegmentId};
use parking_lot::Mutex;
use segstore_storage::{BackendFactory, FileBackendFactory};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read access by key.
///
/// An absent value is `Ok(None)`; an `Err` always means the lookup failed.
pub trait StoreReader<K, V> {
    /// Returns the value stored under `key`.
    fn get(&self, key: &K) -> CoreResult<Option<V>>;
}

/// The operations a hashing layer needs from the array beneath it.
pub trait IndexedStore: StoreReader<u64, Vec<u8>> + Send + Sync {
    /// Stores `value` at `position`, growing a dynamic store if needed.
    fn set_expand(&self, position: u64, value: &[u8]) -> CoreResult<()>;
    /// Removes the value at `position`; returns whether one was present.
    fn delete(&self, position: u64) -> CoreResult<bool>;
    /// Removes every value.
    fn clear(&self) -> CoreResult<()>;
    /// Number of addressable positions.
    fn length(&self) -> u64;
    /// Same as [`IndexedStore::length`].
    fn capacity(&self) -> u64;
    /// Writes a checkpoint now.
    fn sync(&self) -> CoreResult<()>;
}

/// Outcome of [`ArrayStore::verify`].
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Positions holding an address.
    pub values: u64,
    /// Positions holding nothing.
    pub empty: u64,
    /// Positions whose value could not be read.
    pub errors: Vec<(u64, CoreError)>,
}

impl VerifyReport {
    /// Returns true if every stored value was readable.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Writer {
    active: Option<Arc<Segment>>,
    batch: BatchController,
}

struct CheckpointState {
    sequence: u64,
    generations: Vec<u64>,
}

struct StoreInner {
    dir: StoreDir,
    config: StoreConfig,
    array: IndexArray,
    segments: SegmentManager,
    writer: Mutex<Writer>,
    checkpoint: Mutex<CheckpointState>,
    /// Serializes compaction passes and holds the target they append to.
    compaction: Mutex<Option<Arc<Segment>>>,
    compacting: AtomicU32,
    stats: StoreStats,
}

/// A persistent array of byte values addressed by position.
///
/// Values live in append-only segment files; an in-memory index array maps
/// each position to the address of its latest value. Writers are serialized,
/// readers never block on them.
///
/// # Durability
///
/// A store is durable up to its last checkpoint. Checkpoints happen every
/// `num_sync_batches` batches of `batch_size` updates, and on
/// [`ArrayStore::sync`], [`ArrayStore::clear`] and [`ArrayStore::close`].
/// Dropping a store without closing it does not checkpoint; values written
/// since the last checkpoint are lost on reopen and their bytes are
/// reclaimed by compaction.
pub struct ArrayStore {
    inner: Arc<StoreInner>,
    compactor: Mutex<Option<CompactorHandle>>,
}

impl ArrayStore {
    /// Opens or creates a static store of `config.initial_capacity` positions.
    ///
    /// An existing store keeps its persisted capacity.
    pub fn open_static(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_factory(
            path.as_ref(),
            Some(ArrayKind::Static),
            config,
            Arc::new(FileBackendFactory),
        )
    }

    /// Opens or creates a dynamic store covering at least
    /// `config.initial_capacity` positions.
    ///
    /// An existing store grows if the requested capacity exceeds it.
    pub fn open_dynamic(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_factory(
            path.as_ref(),
            Some(ArrayKind::Dynamic),
            config,
            Arc::new(FileBackendFactory),
        )
    }

    /// Opens an existing store of either kind at its persisted capacity.
    pub fn open_existing(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_factory(
            path.as_ref(),
            None,
            config.create_if_missing(false),
            Arc::new(FileBackendFactory),
        )
    }

    /// Opens a store whose segment files come from `factory`.
    ///
    /// `kind` of `None` accepts whatever kind the store was created with and
    /// refuses to create a new one.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `config` fails validation
    /// - `StoreLocked` if the directory is open elsewhere
    /// - `InvalidFormat` if the on-disk state is unreadable, or the store is
    ///   missing and may not be created
    /// - `InvalidOperation` if the store exists with a different kind
    pub fn open_with_factory(
        path: &Path,
        kind: Option<ArrayKind>,
        config: StoreConfig,
        factory: Arc<dyn BackendFactory>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let dir = StoreDir::open(path, config.create_if_missing)?;

        let inner = match dir.load_checkpoint()? {
            Some(checkpoint) => StoreInner::recover(dir, config, kind, checkpoint, factory)?,
            None => match kind {
                Some(kind) if config.create_if_missing => {
                    StoreInner::create(dir, config, kind, factory)?
                }
                _ => {
                    return Err(CoreError::invalid_format(format!(
                        "no store at {}",
                        path.display()
                    )))
                }
            },
        };

        info!(
            path = %path.display(),
            kind = %inner.array.kind(),
            capacity = inner.array.capacity(),
            segments = inner.segments.segment_count(),
            "opened store"
        );

        Ok(Self {
            inner: Arc::new(inner),
            compactor: Mutex::new(None),
        })
    }

    /// Returns the value at `position`, `None` if nothing is stored there.
    ///
    /// # Errors
    ///
    /// `PositionOutOfRange` outside the array, `CorruptRecord` or
    /// `SegmentNotFound` if the stored value cannot be read.
    pub fn get(&self, position: u64) -> CoreResult<Option<Vec<u8>>> {
        let inner = &self.inner;
        let mut address = inner.array.get(position)?;
        loop {
            if address.is_empty() {
                return Ok(None);
            }
            match inner.segments.read(address) {
                Ok(value) => {
                    inner.stats.record_read(value.len() as u64);
                    return Ok(Some(value));
                }
                Err(CoreError::SegmentNotFound(id)) => {
                    // The value may have been relocated and its segment
                    // released since the slot was loaded.
                    let current = inner.array.get(position)?;
                    if current == address {
                        return Err(CoreError::SegmentNotFound(id));
                    }
                    address = current;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stores `value` at `position`.
    ///
    /// # Errors
    ///
    /// `PositionOutOfRange` outside the array (nothing is written), or
    /// `FlushFailed` if the write completed a checkpoint interval and the
    /// checkpoint failed.
    pub fn set(&self, position: u64, value: &[u8]) -> CoreResult<()> {
        self.inner.write(position, value, false)
    }

    /// Stores `value` at `position`, first growing a dynamic store to cover
    /// it. Behaves like [`ArrayStore::set`] on a static store.
    pub fn set_expand(&self, position: u64, value: &[u8]) -> CoreResult<()> {
        self.inner.write(position, value, true)
    }

    /// Removes the value at `position`; returns whether one was present.
    pub fn delete(&self, position: u64) -> CoreResult<bool> {
        let inner = &self.inner;
        let mut writer = inner.writer.lock();
        ensure_open(&writer)?;

        let old = inner.array.set(position, Address::EMPTY)?;
        if old.is_empty() {
            return Ok(false);
        }
        inner.segments.mark_overwritten(old);
        inner.stats.record_delete();
        inner.stage(&mut writer)?;
        Ok(true)
    }

    /// Removes every value, retires every segment and checkpoints.
    pub fn clear(&self) -> CoreResult<()> {
        let inner = &self.inner;
        let mut target = inner.compaction.lock();
        let mut writer = inner.writer.lock();
        ensure_open(&writer)?;

        let cleared = inner.array.clear();
        if let Some(active) = writer.active.take() {
            seal(&active);
        }
        if let Some(target) = target.take() {
            seal(&target);
        }
        inner.segments.recycle_all();
        writer.batch.reset();
        inner.checkpoint(&mut writer.batch)?;

        info!(cleared, "store cleared");
        Ok(())
    }

    /// Writes a checkpoint now.
    pub fn sync(&self) -> CoreResult<()> {
        let mut writer = self.inner.writer.lock();
        ensure_open(&writer)?;
        self.inner.checkpoint(&mut writer.batch)
    }

    /// Stops the compactor, writes a final checkpoint and releases the store.
    ///
    /// # Errors
    ///
    /// `FlushFailed` if the final checkpoint could not be written. The store
    /// is released either way.
    pub fn close(self) -> CoreResult<()> {
        self.stop_compactor();

        let inner = &self.inner;
        let mut target = inner.compaction.lock();
        let mut writer = inner.writer.lock();
        if writer.batch.state() == BatchState::Closed {
            return Ok(());
        }
        if let Some(active) = writer.active.take() {
            seal(&active);
        }
        if let Some(target) = target.take() {
            seal(&target);
        }
        let result = inner.checkpoint(&mut writer.batch);
        writer.batch.close();
        drop(writer);

        match result {
            Ok(()) => {
                info!(path = %inner.dir.path().display(), "closed store");
                Ok(())
            }
            Err(e @ CoreError::FlushFailed { .. }) => Err(e),
            Err(e) => Err(CoreError::flush_failed(e.to_string())),
        }
    }

    /// Compacts every segment below the compaction factor.
    ///
    /// Emptied segments become recyclable; their storage is released after
    /// the next checkpoint.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        ensure_open(&self.inner.writer.lock())?;
        Ok(self.inner.compact_pass(None))
    }

    /// Compacts the sparsest candidate segment, if any.
    pub fn compact_once(&self) -> CoreResult<Option<SegmentCompaction>> {
        ensure_open(&self.inner.writer.lock())?;
        let inner = &self.inner;
        let mut target = inner.compaction.lock();
        let mut compactor = inner.compactor(target.take());
        let result = compactor.compact_once();
        *target = compactor.finish();
        if let Some(result) = &result {
            inner.record_compaction(result);
        }
        Ok(result)
    }

    /// Starts compacting in a background thread every `interval`.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if a compactor is already running.
    pub fn start_compactor(&self, interval: Duration) -> CoreResult<()> {
        let mut slot = self.compactor.lock();
        if slot.is_some() {
            return Err(CoreError::invalid_operation("compactor already running"));
        }

        let store = Arc::downgrade(&self.inner);
        let handle = CompactorHandle::spawn(interval, move |stop| {
            let Some(inner) = store.upgrade() else {
                return false;
            };
            let report = inner.compact_pass(Some(stop));
            if !report.segments.is_empty() {
                debug!(
                    segments = report.segments.len(),
                    relocated = report.records_relocated(),
                    "background compaction pass"
                );
            }
            true
        })?;
        *slot = Some(handle);
        info!(?interval, "started background compactor");
        Ok(())
    }

    /// Stops the background compactor, waiting for its current segment.
    pub fn stop_compactor(&self) {
        if let Some(handle) = self.compactor.lock().take() {
            handle.stop();
            debug!("stopped background compactor");
        }
    }

    /// Reads every stored value, collecting failures.
    pub fn verify(&self) -> VerifyReport {
        let inner = &self.inner;
        let mut report = VerifyReport::default();
        for unit in inner.array.units() {
            for slot in 0..unit.len() {
                let address = unit.load(slot);
                if address.is_empty() {
                    report.empty += 1;
                    continue;
                }
                report.values += 1;
                if let Err(e) = inner.segments.read(address) {
                    let position = inner.array.position_of(unit.number(), slot);
                    report.errors.push((position, e));
                }
            }
        }
        report
    }

    /// Number of addressable positions.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.inner.array.length()
    }

    /// Same as [`ArrayStore::length`].
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.inner.array.capacity()
    }

    /// First valid position.
    #[must_use]
    pub fn index_start(&self) -> u64 {
        self.inner.array.index_start()
    }

    /// Sizing policy.
    #[must_use]
    pub fn kind(&self) -> ArrayKind {
        self.inner.array.kind()
    }

    /// Slots per index unit.
    #[must_use]
    pub fn unit_capacity(&self) -> u32 {
        self.inner.array.unit_capacity()
    }

    /// Store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.dir.path()
    }

    /// Configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Sequence number of the last durable checkpoint.
    #[must_use]
    pub fn checkpoint_sequence(&self) -> u64 {
        self.inner.checkpoint.lock().sequence
    }

    /// Batches completed over the life of the store.
    #[must_use]
    pub fn total_batches(&self) -> u64 {
        self.inner.writer.lock().batch.total_batches()
    }

    /// Operation counters since open.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Per-segment statistics.
    pub fn segment_stats(&self) -> CoreResult<Vec<SegmentStats>> {
        self.inner.segments.stats()
    }
}

impl Drop for ArrayStore {
    fn drop(&mut self) {
        self.stop_compactor();
    }
}

impl std::fmt::Debug for ArrayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayStore")
            .field("path", &self.inner.dir.path())
            .field("array", &self.inner.array)
            .field("segments", &self.inner.segments)
            .finish_non_exhaustive()
    }
}

impl StoreReader<u64, Vec<u8>> for ArrayStore {
    fn get(&self, key: &u64) -> CoreResult<Option<Vec<u8>>> {
        ArrayStore::get(self, *key)
    }
}

impl IndexedStore for ArrayStore {
    fn set_expand(&self, position: u64, value: &[u8]) -> CoreResult<()> {
        ArrayStore::set_expand(self, position, value)
    }

    fn delete(&self, position: u64) -> CoreResult<bool> {
        ArrayStore::delete(self, position)
    }

    fn clear(&self) -> CoreResult<()> {
        ArrayStore::clear(self)
    }

    fn length(&self) -> u64 {
        ArrayStore::length(self)
    }

    fn capacity(&self) -> u64 {
        ArrayStore::capacity(self)
    }

    fn sync(&self) -> CoreResult<()> {
        ArrayStore::sync(self)
    }
}

impl StoreInner {
    fn create(
        dir: StoreDir,
        config: StoreConfig,
        kind: ArrayKind,
        factory: Arc<dyn BackendFactory>,
    ) -> CoreResult<Self> {
        let array = IndexArray::create(kind, config.unit_capacity, config.initial_capacity);
        let segments = SegmentManager::open(
            &dir.segments_dir(),
            factory,
            config.segment_capacity(),
            config.max_segments,
            SegmentId::NONE,
            &[],
        )?;
        let generations = vec![0; array.unit_count()];
        let batch = BatchController::new(config.batch_size, config.num_sync_batches, 0);

        let inner = Self::assemble(dir, config, array, segments, batch, 0, generations);
        {
            let mut writer = inner.writer.lock();
            inner.checkpoint(&mut writer.batch)?;
        }
        debug!(kind = %kind, capacity = inner.array.capacity(), "created store");
        Ok(inner)
    }

    fn recover(
        dir: StoreDir,
        config: StoreConfig,
        kind: Option<ArrayKind>,
        checkpoint: Checkpoint,
        factory: Arc<dyn BackendFactory>,
    ) -> CoreResult<Self> {
        if let Some(kind) = kind {
            if kind != checkpoint.kind {
                return Err(CoreError::invalid_operation(format!(
                    "store at {} is {}, not {kind}",
                    dir.path().display(),
                    checkpoint.kind
                )));
            }
        }

        if checkpoint.unit_capacity == 0
            || checkpoint.capacity > max_capacity(checkpoint.unit_capacity)
        {
            return Err(CoreError::invalid_format(format!(
                "checkpoint capacity {} does not fit units of {} slots",
                checkpoint.capacity, checkpoint.unit_capacity
            )));
        }
        let layout = unit_layout(checkpoint.capacity, checkpoint.unit_capacity);
        let mut units = Vec::with_capacity(layout.len());
        for (i, (&slots, &generation)) in layout
            .iter()
            .zip(&checkpoint.unit_generations)
            .enumerate()
        {
            let number = u32::try_from(i)
                .map_err(|_| CoreError::invalid_format("too many index units"))?;
            let unit = if generation == 0 {
                Unit::new(number, slots)
            } else {
                Unit::decode(&dir.read_unit_file(number, generation)?, number, generation, slots)?
            };
            units.push(unit);
        }
        let array = IndexArray::from_units(
            checkpoint.kind,
            checkpoint.unit_capacity,
            checkpoint.index_start,
            checkpoint.capacity,
            units,
        )?;

        let stale = dir.remove_stale_unit_files(&checkpoint.unit_generations)?;
        if stale > 0 {
            warn!(files = stale, "removed index files not named by the checkpoint");
        }

        let segments = SegmentManager::open(
            &dir.segments_dir(),
            factory,
            config.segment_capacity(),
            config.max_segments,
            checkpoint.next_segment_id,
            &checkpoint.recyclable,
        )?;

        let missing = rebuild_live_bytes(&array, &segments);
        if missing > 0 {
            warn!(addresses = missing, "index references segments that do not exist");
        }
        if !checkpoint.compacting.is_none() {
            warn!(
                segment = %checkpoint.compacting,
                "compaction was interrupted; its copies will be reclaimed"
            );
        }

        let batch = BatchController::new(
            config.batch_size,
            config.num_sync_batches,
            checkpoint.batches,
        );
        // Opening without a kind keeps the persisted capacity.
        let requested = kind.map_or(0, |_| config.initial_capacity);
        let inner = Self::assemble(
            dir,
            config,
            array,
            segments,
            batch,
            checkpoint.sequence,
            checkpoint.unit_generations,
        );

        if inner.array.ensure_length(requested)? {
            let mut writer = inner.writer.lock();
            inner.checkpoint(&mut writer.batch)?;
        }

        debug!(
            sequence = checkpoint.sequence,
            batches = checkpoint.batches,
            "recovered store from checkpoint"
        );
        Ok(inner)
    }

    fn assemble(
        dir: StoreDir,
        config: StoreConfig,
        array: IndexArray,
        segments: SegmentManager,
        batch: BatchController,
        sequence: u64,
        generations: Vec<u64>,
    ) -> Self {
        Self {
            dir,
            config,
            array,
            segments,
            writer: Mutex::new(Writer {
                active: None,
                batch,
            }),
            checkpoint: Mutex::new(CheckpointState {
                sequence,
                generations,
            }),
            compaction: Mutex::new(None),
            compacting: AtomicU32::new(0),
            stats: StoreStats::new(),
        }
    }

    fn write(&self, position: u64, value: &[u8], expand: bool) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        ensure_open(&writer)?;

        if expand {
            self.array.expand_to(position)?;
        }
        // Validate before writing any bytes.
        self.array.get(position)?;

        let address = self.append(&mut writer, position, value)?;
        let old = self.array.set(position, address)?;
        self.segments.mark_overwritten(old);
        self.stats.record_write(value.len() as u64);
        self.stage(&mut writer)
    }

    fn append(&self, writer: &mut Writer, position: u64, value: &[u8]) -> CoreResult<Address> {
        let frame_len = (RECORD_OVERHEAD + value.len()) as u64;
        for _ in 0..2 {
            let segment = match &writer.active {
                Some(segment) => Arc::clone(segment),
                None => {
                    let segment = self.segments.allocate_writable_segment(frame_len)?;
                    debug!(segment = %segment.id(), "new active segment");
                    writer.active = Some(Arc::clone(&segment));
                    segment
                }
            };

            match segment.append(position, value) {
                Ok(address) => return Ok(address),
                Err(CoreError::SegmentFull { .. }) => {
                    seal(&segment);
                    writer.active = None;
                }
                Err(e) => {
                    if matches!(e, CoreError::Storage(_) | CoreError::Io(_)) {
                        // A partial frame may follow; append elsewhere.
                        seal(&segment);
                        writer.active = None;
                    }
                    return Err(e);
                }
            }
        }
        Err(CoreError::invalid_operation(
            "fresh segment cannot hold the record",
        ))
    }

    fn stage(&self, writer: &mut Writer) -> CoreResult<()> {
        match writer.batch.stage()? {
            BatchAction::None => Ok(()),
            BatchAction::BatchComplete => {
                debug!(
                    complete = writer.batch.complete_batches(),
                    "batch complete"
                );
                Ok(())
            }
            BatchAction::Checkpoint => self.checkpoint(&mut writer.batch),
        }
    }

    /// Makes every change up to now durable.
    ///
    /// Called with the writer lock held, so no user write runs concurrently;
    /// the compactor may.
    fn checkpoint(&self, batch: &mut BatchController) -> CoreResult<()> {
        batch.begin_flush()?;
        match self.write_checkpoint(batch.total_batches()) {
            Ok(sequence) => {
                batch.finish_flush();
                self.stats.record_checkpoint();
                debug!(sequence, "checkpoint written");
                Ok(())
            }
            Err(e) => {
                batch.abort_flush();
                warn!(error = %e, "checkpoint failed");
                Err(match e {
                    CoreError::Io(_) | CoreError::Storage(_) => CoreError::flush_failed(e.to_string()),
                    other => other,
                })
            }
        }
    }

    fn write_checkpoint(&self, batches: u64) -> CoreResult<u64> {
        let mut state = self.checkpoint.lock();
        let sequence = state.sequence + 1;

        // Collected before the unit snapshots: a segment listed here was
        // emptied before any snapshot was taken.
        let recyclable = self.segments.recyclable_ids();

        let units = self.array.units();
        let pending: Vec<(Arc<Unit>, Vec<u8>)> = units
            .iter()
            .filter(|unit| unit.take_dirty())
            .map(|unit| (Arc::clone(unit), unit.encode(sequence)))
            .collect();

        if let Err(e) = self.persist_units(&pending, sequence) {
            pending.iter().for_each(|(unit, _)| unit.mark_dirty());
            return Err(e);
        }

        let mut generations = state.generations.clone();
        generations.resize(units.len(), 0);
        for (unit, _) in &pending {
            generations[unit.number() as usize] = sequence;
        }

        let marker = Checkpoint {
            kind: self.array.kind(),
            unit_capacity: self.array.unit_capacity(),
            index_start: self.array.index_start(),
            capacity: units.iter().map(|u| u.len() as u64).sum(),
            sequence,
            batches,
            next_segment_id: self.segments.next_segment_id(),
            compacting: SegmentId::new(self.compacting.load(Ordering::Acquire)),
            unit_generations: generations,
            recyclable,
        };
        if let Err(e) = self.dir.save_checkpoint(&marker) {
            pending.iter().for_each(|(unit, _)| unit.mark_dirty());
            return Err(e);
        }

        self.segments.release_recyclable(&marker.recyclable);
        state.sequence = sequence;
        state.generations = marker.unit_generations;

        if let Err(e) = self.dir.remove_stale_unit_files(&state.generations) {
            warn!(error = %e, "failed to remove superseded index files");
        }
        Ok(sequence)
    }

    /// Syncs segment data, then writes the unit snapshots.
    ///
    /// Segments are synced after the snapshots were taken so every address
    /// they hold points at durable bytes.
    fn persist_units(&self, pending: &[(Arc<Unit>, Vec<u8>)], sequence: u64) -> CoreResult<()> {
        let synced = self.segments.sync_dirty()?;
        for (unit, data) in pending {
            self.dir.write_unit_file(unit.number(), sequence, data)?;
        }
        if !pending.is_empty() {
            self.dir.sync_index_dir()?;
        }
        debug!(segments = synced, units = pending.len(), "persisted checkpoint data");
        Ok(())
    }

    fn compactor(&self, target: Option<Arc<Segment>>) -> Compactor<'_> {
        Compactor::new(
            &self.array,
            &self.segments,
            self.config.segment_compact_factor,
            &self.compacting,
            target,
        )
    }

    fn compact_pass(&self, stop: Option<&AtomicBool>) -> CompactionReport {
        let mut target = self.compaction.lock();
        let mut compactor = self.compactor(target.take());
        let mut report = CompactionReport::default();

        while !stop.is_some_and(|s| s.load(Ordering::Acquire)) {
            let Some(result) = compactor.compact_once() else {
                break;
            };
            self.record_compaction(&result);
            report.segments.push(result);
        }
        *target = compactor.finish();
        report
    }

    fn record_compaction(&self, result: &SegmentCompaction) {
        if result.succeeded() {
            self.stats.record_compaction(result.records_relocated);
        } else {
            self.stats.record_compaction_failure();
        }
    }
}

fn ensure_open(writer: &Writer) -> CoreResult<()> {
    if writer.batch.state() == BatchState::Closed {
        return Err(CoreError::StoreClosed);
    }
    Ok(())
}

fn seal(segment: &Segment) {
    if segment.transition(SegmentStatus::Writable, SegmentStatus::ReadOnly) {
        debug!(segment = %segment.id(), "sealed segment");
    }
}

/// Recounts live bytes from the index. Returns how many addresses name a
/// segment that does not exist.
fn rebuild_live_bytes(array: &IndexArray, segments: &SegmentManager) -> u64 {
    segments.reset_live_bytes();
    let mut missing = 0;
    for unit in array.units() {
        for (_, address) in unit.live_slots() {
            if !segments.mark_live(address) {
                missing += 1;
            }
        }
    }
    missing
}

//! Store directory management.
//!
//! This module handles the file system layout of a store:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ CHECKPOINT        # Durable root (array shape, unit generations)
//! ├─ INDEX/            # unit-00000-0000000003.dat, one file per unit generation
//! └─ SEGMENTS/         # seg-000001.dat, ...
//! ```
//!
//! The LOCK file ensures only one process opens the store at a time.

use crate::checkpoint::Checkpoint;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "LOCK";
const CHECKPOINT_FILE: &str = "CHECKPOINT";
const CHECKPOINT_TEMP: &str = "CHECKPOINT.tmp";
const INDEX_DIR: &str = "INDEX";
const SEGMENTS_DIR: &str = "SEGMENTS";

/// Manages the store directory structure and file locking.
///
/// A `StoreDir` holds an exclusive lock on the directory for its whole
/// lifetime; the lock is released when the handle is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the directory is missing and `create_if_missing`
    ///   is false, or the path is not a directory
    /// - `StoreLocked` if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        fs::create_dir_all(path.join(INDEX_DIR))?;
        fs::create_dir_all(path.join(SEGMENTS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding index unit files.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.path.join(INDEX_DIR)
    }

    /// Returns the directory holding segment files.
    #[must_use]
    pub fn segments_dir(&self) -> PathBuf {
        self.path.join(SEGMENTS_DIR)
    }

    /// Returns the path of the checkpoint marker.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.join(CHECKPOINT_FILE)
    }

    /// Returns the path of one generation of a unit file.
    #[must_use]
    pub fn unit_path(&self, unit: u32, generation: u64) -> PathBuf {
        self.index_dir().join(unit_file_name(unit, generation))
    }

    /// Loads the checkpoint marker.
    ///
    /// Returns `None` for a new store.
    pub fn load_checkpoint(&self) -> CoreResult<Option<Checkpoint>> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Checkpoint::decode(&data).map(Some)
    }

    /// Replaces the checkpoint marker atomically.
    ///
    /// Write to a temporary file, sync it, rename over `CHECKPOINT`, then
    /// sync the directory so the rename itself is durable.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> CoreResult<()> {
        let temp = self.path.join(CHECKPOINT_TEMP);
        let mut file = File::create(&temp)?;
        file.write_all(&checkpoint.encode())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, self.checkpoint_path())?;
        sync_directory(&self.path)
    }

    /// Writes one unit file generation and syncs it.
    pub fn write_unit_file(&self, unit: u32, generation: u64, data: &[u8]) -> CoreResult<()> {
        let mut file = File::create(self.unit_path(unit, generation))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads one unit file generation.
    pub fn read_unit_file(&self, unit: u32, generation: u64) -> CoreResult<Vec<u8>> {
        let path = self.unit_path(unit, generation);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::invalid_format(format!("missing index file {}", path.display()))
            } else {
                CoreError::Io(e)
            }
        })
    }

    /// Syncs the index directory so new unit files are durable.
    pub fn sync_index_dir(&self) -> CoreResult<()> {
        sync_directory(&self.index_dir())
    }

    /// Deletes every unit file not named by `live` (indexed by unit).
    ///
    /// Returns the number of files removed. Failures are logged and skipped;
    /// a leftover file is retried on the next call.
    pub fn remove_stale_unit_files(&self, live: &[u64]) -> CoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.index_dir())? {
            let path = entry?.path();
            let Some((unit, generation)) = parse_unit_file_name(&path) else {
                continue;
            };
            if live.get(unit as usize) == Some(&generation) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale index file"),
            }
        }
        Ok(removed)
    }
}

/// Returns the file name of a unit generation (`unit-00003-0000000012.dat`).
#[must_use]
pub fn unit_file_name(unit: u32, generation: u64) -> String {
    format!("unit-{unit:05}-{generation:010}.dat")
}

fn parse_unit_file_name(path: &Path) -> Option<(u32, u64)> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("unit-")?.strip_suffix(".dat")?;
    let (unit, generation) = rest.split_once('-')?;
    Some((unit.parse().ok()?, generation.parse().ok()?))
}

/// Syncs a directory so file creations, renames and deletions in it are
/// durable.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}

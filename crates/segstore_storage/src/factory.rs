//! Backend factories.
//!
//! The segment manager never opens files directly; it asks a
//! [`BackendFactory`] for a backend per segment path. Production stores use
//! [`FileBackendFactory`]; tests plug in factories that wrap the file backend
//! with fault injection.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use std::fmt::Debug;
use std::path::Path;

/// Creates storage backends for segment files.
pub trait BackendFactory: Send + Sync + Debug {
    /// Opens (creating if missing) the backend stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>>;
}

/// Factory producing [`FileBackend`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackendFactory;

impl BackendFactory for FileBackendFactory {
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open_with_create_dirs(path)?))
    }
}

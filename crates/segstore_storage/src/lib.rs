//! # SegStore Storage
//!
//! Storage backend trait and implementations for SegStore.
//!
//! This crate provides the lowest-level storage abstraction for SegStore.
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (positional read, append, sync)
//! - No knowledge of segment frames, index units, or checkpoints
//! - All operations take `&self`, so one appender and many readers can share
//!   a backend without an outer lock
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! Backends are created through a [`BackendFactory`], which lets callers swap
//! in instrumented backends (for example to inject sync failures in tests).
//!
//! ## Example
//!
//! ```rust
//! use segstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod factory;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use factory::{BackendFactory, FileBackendFactory};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

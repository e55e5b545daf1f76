//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod value;
pub mod verify;

use segstore_core::{ArrayStore, CoreError, StoreConfig};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] CoreError),

    /// JSON output could not be produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Verification found unreadable values.
    #[error("{0} stored values failed verification")]
    VerificationFailed(usize),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::InvalidArgument(format!(
                "unknown format '{other}', expected text or json"
            ))),
        }
    }
}

/// Opens an existing store at `path` with default settings.
///
/// Read-only commands drop the store instead of closing it, so they do not
/// write a checkpoint.
pub fn open_store(path: &Path) -> CliResult<ArrayStore> {
    Ok(ArrayStore::open_existing(path, StoreConfig::new())?)
}

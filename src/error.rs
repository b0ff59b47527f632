//! Error type shared by the scan, extract and move pipeline.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type used throughout modsort.
pub type Result<T> = std::result::Result<T, ModsortError>;

/// Errors that can occur while sorting mods.
#[derive(Debug, Error)]
pub enum ModsortError {
    /// Filesystem operation failed on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external unpack tool could not be started at all.
    #[error("failed to launch {} for {}: {source}", tool.display(), archive.display())]
    ExtractorLaunch {
        archive: PathBuf,
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external unpack tool ran but reported failure.
    #[error("extraction of {} failed ({status}): {diagnostics}", archive.display())]
    ExtractionFailed {
        archive: PathBuf,
        status: ExitStatus,
        diagnostics: String,
    },

    /// The built-in zip reader rejected the archive.
    #[error("cannot read zip archive {}: {source}", archive.display())]
    Zip {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Configuration file has invalid syntax or an unknown value.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Configuration could not be persisted.
    #[error("failed to write configuration {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS notification backend failed.
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A blocking helper task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ModsortError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

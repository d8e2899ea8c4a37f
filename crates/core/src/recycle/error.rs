//! Error types for the recycle bin.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while moving a file into the recycle bin.
#[derive(Debug, Error)]
pub enum RecycleError {
    /// Source file not found.
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Source path is relative or contains `..`.
    #[error("Refusing to recycle unsafe source path: {path}")]
    UnsafeSource { path: PathBuf },

    /// Failed to create destination directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No free destination name could be found.
    #[error("Could not find a free destination for {path}")]
    CollisionUnresolved { path: PathBuf },

    /// Failed to copy file across filesystems.
    #[error("Failed to copy file from {source} to {destination}")]
    CopyFailed {
        source: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Failed to move/rename file.
    #[error("Failed to move file from {source} to {destination}")]
    MoveFailed {
        source: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// The copy landed but the source could not be removed; the copy was
    /// rolled back and the source is untouched.
    #[error("Moved copy of {source} rolled back: source could not be removed")]
    PartialMove {
        source: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Rolling back a partial move failed; both copies exist.
    #[error("Rollback failed, {destination} duplicates {original}: {reason}")]
    RollbackFailed {
        original: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecycleError {
    pub fn copy_failed(source: PathBuf, destination: PathBuf, error: std::io::Error) -> Self {
        Self::CopyFailed {
            source,
            destination,
            error,
        }
    }

    pub fn move_failed(source: PathBuf, destination: PathBuf, error: std::io::Error) -> Self {
        Self::MoveFailed {
            source,
            destination,
            error,
        }
    }

    /// Path the error is about, for reporting.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::SourceNotFound { path }
            | Self::UnsafeSource { path }
            | Self::DirectoryCreationFailed { path, .. }
            | Self::CollisionUnresolved { path } => Some(path),
            Self::CopyFailed { source, .. }
            | Self::MoveFailed { source, .. }
            | Self::PartialMove { source, .. }
            | Self::RollbackFailed {
                original: source, ..
            } => Some(source),
            Self::Io(_) => None,
        }
    }

    /// Whether the filesystem may be left with both copies present.
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}

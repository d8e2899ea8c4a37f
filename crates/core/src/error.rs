//! Run-level error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::recycle::RecycleError;
use crate::torrent_client::TorrentClientError;

/// Errors surfaced by a reconciliation run.
///
/// Only configuration errors (and a failed torrent listing) abort a run;
/// everything else is collected per item and reported in the summary.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Remote call {operation} failed: {source}")]
    RemoteCall {
        operation: &'static str,
        #[source]
        source: TorrentClientError,
    },

    #[error("Filesystem error at {}: {reason}", path.display())]
    Filesystem { path: PathBuf, reason: String },

    #[error("Integrity warning for {}: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("Run cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub fn remote(operation: &'static str, source: TorrentClientError) -> Self {
        Self::RemoteCall { operation, source }
    }

    pub fn filesystem(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Filesystem {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the run must stop before any further work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Whether retrying on a later run could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteCall { source, .. } => source.is_retryable(),
            Self::Filesystem { .. } => true,
            _ => false,
        }
    }
}

impl From<RecycleError> for ReconcileError {
    fn from(err: RecycleError) -> Self {
        let path = err.path().cloned().unwrap_or_default();
        Self::Filesystem {
            path,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let config = ReconcileError::from(ConfigError::RelativeExcludeDir("tmp".into()));
        assert!(config.is_fatal());
        assert!(!config.is_retryable());

        let timeout = ReconcileError::remote("list_torrents", TorrentClientError::Timeout);
        assert!(!timeout.is_fatal());
        assert!(timeout.is_retryable());

        let auth = ReconcileError::remote(
            "add_tags",
            TorrentClientError::AuthenticationFailed("bad".into()),
        );
        assert!(!auth.is_retryable());

        assert!(!ReconcileError::Cancelled.is_fatal());
    }

    #[test]
    fn test_from_recycle_error_keeps_path() {
        let err = ReconcileError::from(RecycleError::SourceNotFound {
            path: PathBuf::from("/data/x.mkv"),
        });
        match err {
            ReconcileError::Filesystem { path, reason } => {
                assert_eq!(path, PathBuf::from("/data/x.mkv"));
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

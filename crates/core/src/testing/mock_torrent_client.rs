//! Mock torrent client for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::cache::CacheScope;
use crate::torrent_client::{
    ContentFile, ShareLimits, TorrentClient, TorrentClientError, TorrentInfo, TorrentRecord,
    Tracker,
};

/// A recorded client call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    ListTorrents,
    TorrentFiles(String),
    TorrentTrackers(String),
    AddTags {
        hashes: Vec<String>,
        tags: Vec<String>,
    },
    SetShareLimits {
        hashes: Vec<String>,
        limits: ShareLimits,
    },
    DeleteTorrents {
        hashes: Vec<String>,
        delete_files: bool,
    },
}

impl RecordedCall {
    pub fn operation(&self) -> &'static str {
        match self {
            RecordedCall::ListTorrents => "list_torrents",
            RecordedCall::TorrentFiles(_) => "torrent_files",
            RecordedCall::TorrentTrackers(_) => "torrent_trackers",
            RecordedCall::AddTags { .. } => "add_tags",
            RecordedCall::SetShareLimits { .. } => "set_share_limits",
            RecordedCall::DeleteTorrents { .. } => "delete_torrents",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RecordedCall::AddTags { .. }
                | RecordedCall::SetShareLimits { .. }
                | RecordedCall::DeleteTorrents { .. }
        )
    }
}

/// Mock implementation of the TorrentClient trait.
///
/// Provides controllable behavior for testing:
/// - Records every call for assertions
/// - Applies tag and delete mutations to its torrent list
/// - Simulates failures per operation or per torrent, and slow responses
///
/// Deleting with `delete_files` removes the content files from disk the way
/// a real client would.
#[derive(Debug)]
pub struct MockTorrentClient {
    identity: CacheScope,
    /// Torrents in listing order.
    torrents: Arc<RwLock<Vec<TorrentRecord>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<TorrentClientError>>>,
    /// Operations that always fail.
    failing_operations: Arc<RwLock<HashMap<&'static str, TorrentClientError>>>,
    /// Torrents whose detail calls always fail.
    failing_hashes: Arc<RwLock<HashMap<String, TorrentClientError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl Default for MockTorrentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTorrentClient {
    pub fn new() -> Self {
        Self::with_identity("mock://default")
    }

    /// Create a mock with a specific connection identity.
    pub fn with_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: CacheScope::new(identity),
            torrents: Arc::new(RwLock::new(Vec::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            failing_operations: Arc::new(RwLock::new(HashMap::new())),
            failing_hashes: Arc::new(RwLock::new(HashMap::new())),
            delay: Arc::new(RwLock::new(None)),
        }
    }

    /// Pre-populate a torrent.
    pub async fn add_torrent(&self, record: TorrentRecord) {
        self.torrents.write().await.push(record);
    }

    pub async fn torrent(&self, hash: &str) -> Option<TorrentRecord> {
        self.torrents
            .read()
            .await
            .iter()
            .find(|t| t.hash() == hash)
            .cloned()
    }

    pub async fn has_torrent(&self, hash: &str) -> bool {
        self.torrent(hash).await.is_some()
    }

    pub async fn torrent_count(&self) -> usize {
        self.torrents.read().await.len()
    }

    /// All recorded calls, in order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Recorded mutation calls only.
    pub async fn mutations(&self) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    pub async fn clear_recorded(&self) {
        self.calls.write().await.clear();
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: TorrentClientError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every call to `operation` fail.
    pub async fn fail_operation(&self, operation: &'static str, error: TorrentClientError) {
        self.failing_operations
            .write()
            .await
            .insert(operation, error);
    }

    /// Make file and tracker lookups for `hash` fail.
    pub async fn fail_hash(&self, hash: &str, error: TorrentClientError) {
        self.failing_hashes
            .write()
            .await
            .insert(hash.to_string(), error);
    }

    /// Delay every call, to exercise timeouts.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Record the call, apply the configured delay and return any injected
    /// failure.
    async fn enter(&self, call: RecordedCall) -> Result<(), TorrentClientError> {
        let operation = call.operation();
        let hash = match &call {
            RecordedCall::TorrentFiles(h) | RecordedCall::TorrentTrackers(h) => Some(h.clone()),
            _ => None,
        };
        self.calls.write().await.push(call);

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if let Some(error) = self.failing_operations.read().await.get(operation) {
            return Err(error.clone());
        }
        if let Some(hash) = hash {
            if let Some(error) = self.failing_hashes.read().await.get(&hash) {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    async fn find<T>(
        &self,
        hash: &str,
        f: impl FnOnce(&TorrentRecord) -> T,
    ) -> Result<T, TorrentClientError> {
        self.torrents
            .read()
            .await
            .iter()
            .find(|t| t.hash() == hash)
            .map(f)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn identity(&self) -> CacheScope {
        self.identity.clone()
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentInfo>, TorrentClientError> {
        self.enter(RecordedCall::ListTorrents).await?;
        Ok(self
            .torrents
            .read()
            .await
            .iter()
            .map(|t| t.info.clone())
            .collect())
    }

    async fn torrent_files(&self, hash: &str) -> Result<Vec<ContentFile>, TorrentClientError> {
        self.enter(RecordedCall::TorrentFiles(hash.to_string()))
            .await?;
        self.find(hash, |t| t.files.clone()).await
    }

    async fn torrent_trackers(&self, hash: &str) -> Result<Vec<Tracker>, TorrentClientError> {
        self.enter(RecordedCall::TorrentTrackers(hash.to_string()))
            .await?;
        self.find(hash, |t| t.trackers.clone()).await
    }

    async fn add_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError> {
        self.enter(RecordedCall::AddTags {
            hashes: hashes.to_vec(),
            tags: tags.to_vec(),
        })
        .await?;

        let mut torrents = self.torrents.write().await;
        for torrent in torrents.iter_mut().filter(|t| hashes.contains(&t.info.hash)) {
            for tag in tags {
                if !torrent.has_tag(tag) {
                    torrent.info.tags.push(tag.clone());
                }
            }
        }
        Ok(())
    }

    async fn set_share_limits(
        &self,
        hashes: &[String],
        limits: ShareLimits,
    ) -> Result<(), TorrentClientError> {
        self.enter(RecordedCall::SetShareLimits {
            hashes: hashes.to_vec(),
            limits,
        })
        .await
    }

    async fn delete_torrents(
        &self,
        hashes: &[String],
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        self.enter(RecordedCall::DeleteTorrents {
            hashes: hashes.to_vec(),
            delete_files,
        })
        .await?;

        let mut torrents = self.torrents.write().await;
        let (removed, kept): (Vec<_>, Vec<_>) = torrents
            .drain(..)
            .partition(|t| hashes.contains(&t.info.hash));
        *torrents = kept;

        if delete_files {
            for torrent in removed {
                let save_path = Path::new(&torrent.info.save_path);
                for file in &torrent.files {
                    let _ = tokio::fs::remove_file(save_path.join(&file.name)).await;
                }
            }
        }
        Ok(())
    }
}

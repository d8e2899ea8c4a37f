//! One-shot fetch of every torrent's state for a run.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::cache::{cached_call, CacheKey, RunCache};
use crate::error::ReconcileError;
use crate::torrent_client::{call_with_timeout, TorrentClient, TorrentInfo, TorrentRecord};

/// Per-torrent detail requests kept in flight at once.
const DETAIL_CONCURRENCY: usize = 8;

/// Immutable torrent state for one run.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Torrents in the order the client listed them.
    pub torrents: Vec<TorrentRecord>,
    /// Listed torrents whose details could not be fetched. Their files are
    /// unknown, so anything under their save paths may still be in use.
    pub incomplete: Vec<TorrentInfo>,
    /// Why each incomplete torrent was dropped.
    pub errors: Vec<ReconcileError>,
}

impl Snapshot {
    pub fn get(&self, hash: &str) -> Option<&TorrentRecord> {
        self.torrents.iter().find(|t| t.hash() == hash)
    }

    /// Whether every listed torrent made it into the snapshot.
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

/// List torrents once, then fetch files and trackers for each through the
/// cache.
///
/// A failed listing is returned as an error; a torrent whose details cannot
/// be fetched is left out of `torrents` and kept in `incomplete`.
pub async fn fetch_snapshot(
    client: &dyn TorrentClient,
    cache: &RunCache,
    timeout: Duration,
) -> Result<Snapshot, ReconcileError> {
    let listed = call_with_timeout("list_torrents", timeout, client.list_torrents())
        .await
        .map_err(|e| ReconcileError::remote("list_torrents", e))?;
    info!(client = client.name(), torrents = listed.len(), "Listed torrents");

    let results: Vec<(TorrentInfo, Result<TorrentRecord, ReconcileError>)> =
        stream::iter(listed)
            .map(|info| async move {
                let listed = info.clone();
                (listed, fetch_details(client, cache, timeout, info).await)
            })
            .buffered(DETAIL_CONCURRENCY)
            .collect()
            .await;

    let mut snapshot = Snapshot::default();
    for (info, result) in results {
        match result {
            Ok(record) => snapshot.torrents.push(record),
            Err(e) => {
                warn!(
                    hash = %info.hash,
                    save_path = %info.save_path,
                    error = %e,
                    "Dropping torrent from snapshot"
                );
                snapshot.incomplete.push(info);
                snapshot.errors.push(e);
            }
        }
    }
    Ok(snapshot)
}

async fn fetch_details(
    client: &dyn TorrentClient,
    cache: &RunCache,
    timeout: Duration,
    info: TorrentInfo,
) -> Result<TorrentRecord, ReconcileError> {
    let scope = cache.scope();

    let files_key = CacheKey::derive(scope, "torrent_files", info.hash.as_str());
    let files = cached_call(&cache.files, files_key, || {
        call_with_timeout("torrent_files", timeout, client.torrent_files(&info.hash))
    })
    .await
    .map_err(|e| ReconcileError::remote("torrent_files", e))?;

    let trackers_key = CacheKey::derive(scope, "torrent_trackers", info.hash.as_str());
    let trackers = cached_call(&cache.trackers, trackers_key, || {
        call_with_timeout("torrent_trackers", timeout, client.torrent_trackers(&info.hash))
    })
    .await
    .map_err(|e| ReconcileError::remote("torrent_trackers", e))?;

    debug!(
        hash = %info.hash,
        files = files.len(),
        trackers = trackers.len(),
        "Fetched torrent details"
    );
    Ok(TorrentRecord {
        info,
        files,
        trackers,
    })
}

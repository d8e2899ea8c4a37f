//! Claimed-file index: which files on disk belong to which torrents.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cache::{CacheKey, Lookup, RunCache};
use crate::error::ReconcileError;
use crate::torrent_client::{TorrentInfo, TorrentRecord};

/// Resolved absolute paths of every file referenced by a known torrent,
/// with the set of torrents referencing each.
///
/// Cross-seeded torrents referencing the same path share one entry; the
/// entry goes away only when its last holder is retired.
#[derive(Debug, Clone, Default)]
pub struct ClaimedFileIndex {
    holders: HashMap<PathBuf, BTreeSet<String>>,
    sizes: HashMap<PathBuf, u64>,
    by_torrent: HashMap<String, Vec<PathBuf>>,
    roots: Vec<PathBuf>,
    unresolved: Vec<PathBuf>,
    /// Save paths of torrents whose file lists are unknown this run.
    unknown_roots: Vec<PathBuf>,
}

impl ClaimedFileIndex {
    /// Build the index from a snapshot.
    ///
    /// Each distinct save path is resolved once through the cache. A save
    /// path that cannot be resolved is recorded as an integrity warning and
    /// its torrents contribute no files.
    pub async fn build(torrents: &[TorrentRecord], cache: &RunCache) -> Self {
        let distinct: BTreeSet<&str> = torrents.iter().map(|t| t.info.save_path.as_str()).collect();

        let mut resolved: HashMap<&str, PathBuf> = HashMap::new();
        let mut index = ClaimedFileIndex::default();
        for raw in distinct {
            match resolve_save_path(raw, cache).await {
                Some(path) => {
                    resolved.insert(raw, path);
                }
                None => {
                    warn!(save_path = raw, "Save path cannot be resolved, excluding it from the index");
                    index.unresolved.push(PathBuf::from(raw));
                }
            }
        }

        for torrent in torrents {
            let hash = torrent.hash().to_string();
            let Some(root) = resolved.get(torrent.info.save_path.as_str()) else {
                index.by_torrent.entry(hash).or_default();
                continue;
            };
            for file in &torrent.files {
                index.insert(&hash, root.join(&file.name), file.size);
            }
            index.by_torrent.entry(hash).or_default();
        }

        index.roots = covering_roots(resolved.into_values());
        debug!(
            files = index.holders.len(),
            torrents = index.by_torrent.len(),
            roots = index.roots.len(),
            "Built claimed file index"
        );
        index
    }

    /// Record the save paths of torrents that are live but whose files could
    /// not be listed. Nothing under these paths is treated as unreferenced.
    pub async fn add_unknown_holders(&mut self, torrents: &[TorrentInfo], cache: &RunCache) {
        let distinct: BTreeSet<&str> = torrents.iter().map(|t| t.save_path.as_str()).collect();
        let mut roots = std::mem::take(&mut self.unknown_roots);
        for raw in distinct {
            let raw_path = PathBuf::from(raw);
            if raw_path.is_absolute() {
                roots.push(raw_path);
            }
            if let Some(resolved) = resolve_save_path(raw, cache).await {
                roots.push(resolved);
            }
        }
        self.unknown_roots = covering_roots(roots);
        if !self.unknown_roots.is_empty() {
            warn!(
                torrents = torrents.len(),
                roots = self.unknown_roots.len(),
                "Torrents with unknown files, their save paths are protected"
            );
        }
    }

    /// Whether `path` lies under the save path of a torrent with unknown files.
    pub fn has_unknown_holder(&self, path: &Path) -> bool {
        self.unknown_roots.iter().any(|root| path.starts_with(root))
    }

    /// Whether any file of `hash` might also belong to a torrent with unknown
    /// files.
    pub fn may_share_with_unknown(&self, hash: &str) -> bool {
        self.files_of(hash).iter().any(|p| self.has_unknown_holder(p))
    }

    pub fn unknown_roots(&self) -> &[PathBuf] {
        &self.unknown_roots
    }

    /// Add one reference. Adding the same `(hash, path)` twice is a no-op.
    pub fn insert(&mut self, hash: &str, path: PathBuf, size: u64) {
        let holders = self.holders.entry(path.clone()).or_default();
        if holders.insert(hash.to_string()) {
            self.by_torrent
                .entry(hash.to_string())
                .or_default()
                .push(path.clone());
        }
        self.sizes.entry(path).or_insert(size);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.holders.contains_key(path)
    }

    /// Number of torrents referencing `path`.
    pub fn references(&self, path: &Path) -> usize {
        self.holders.get(path).map_or(0, BTreeSet::len)
    }

    pub fn holders(&self, path: &Path) -> Option<&BTreeSet<String>> {
        self.holders.get(path)
    }

    /// Files referenced by `hash`, in snapshot order.
    pub fn files_of(&self, hash: &str) -> &[PathBuf] {
        self.by_torrent.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any of the torrent's files is also referenced by another
    /// torrent.
    pub fn shares_files(&self, hash: &str) -> bool {
        self.files_of(hash).iter().any(|p| self.references(p) > 1)
    }

    /// Whether every file of the torrent is referenced by it alone.
    pub fn exclusively_owned(&self, hash: &str) -> bool {
        self.files_of(hash).iter().all(|p| self.references(p) <= 1)
    }

    /// Drop every reference held by `hash` and return the paths that no
    /// torrent references anymore.
    pub fn retire(&mut self, hash: &str) -> Vec<PathBuf> {
        let Some(paths) = self.by_torrent.remove(hash) else {
            return Vec::new();
        };

        let mut freed = Vec::new();
        for path in paths {
            let now_unreferenced = match self.holders.get_mut(&path) {
                Some(holders) => {
                    holders.remove(hash);
                    holders.is_empty()
                }
                None => false,
            };
            if now_unreferenced {
                self.holders.remove(&path);
                self.sizes.remove(&path);
                freed.push(path);
            }
        }
        freed
    }

    /// Distinct claimed paths.
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Total claimed bytes, each path counted once.
    pub fn total_size(&self) -> u64 {
        self.sizes.values().sum()
    }

    pub fn size_of(&self, path: &Path) -> Option<u64> {
        self.sizes.get(path).copied()
    }

    /// Minimal set of resolved save paths covering every other one.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Save paths that could not be resolved while building.
    pub fn unresolved(&self) -> &[PathBuf] {
        &self.unresolved
    }

    /// The unresolved save paths as integrity errors, for reporting.
    pub fn integrity_warnings(&self) -> Vec<ReconcileError> {
        self.unresolved
            .iter()
            .map(|path| ReconcileError::Integrity {
                path: path.clone(),
                reason: "save path cannot be resolved".to_string(),
            })
            .collect()
    }
}

/// Resolve a raw save path to its canonical form, through the run cache.
/// Failures are cached as well.
async fn resolve_save_path(raw: &str, cache: &RunCache) -> Option<PathBuf> {
    let key = CacheKey::derive(cache.scope(), "resolve_save_path", raw);
    if let Lookup::Hit(resolved) = cache.save_paths.get(&key) {
        return resolved;
    }

    let resolved = if raw.is_empty() || !Path::new(raw).is_absolute() {
        None
    } else {
        match tokio::fs::canonicalize(raw).await {
            Ok(path) => match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => Some(path),
                _ => None,
            },
            Err(e) => {
                debug!(save_path = raw, error = %e, "canonicalize failed");
                None
            }
        }
    };
    cache.save_paths.set(key, resolved.clone(), None);
    resolved
}

/// Reduce a set of directories to those not nested inside another.
pub fn covering_roots(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let sorted: BTreeSet<PathBuf> = paths.into_iter().collect();
    let mut roots: Vec<PathBuf> = Vec::new();
    for path in sorted {
        if !roots.iter().any(|root| path.starts_with(root)) {
            roots.push(path);
        }
    }
    roots
}

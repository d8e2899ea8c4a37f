use std::path::PathBuf;

use super::key::CacheScope;
use super::ttl::{CacheSettings, CacheStats, TtlCache};
use crate::torrent_client::{ContentFile, Tracker};

/// Typed caches for one reconciliation run.
///
/// Everything here is keyed under `scope`; a different client identity never
/// observes these entries.
pub struct RunCache {
    scope: CacheScope,
    /// Resolved (canonical) save paths. `None` means resolution failed and the
    /// failure itself is cached.
    pub save_paths: TtlCache<Option<PathBuf>>,
    pub files: TtlCache<Vec<ContentFile>>,
    pub trackers: TtlCache<Vec<Tracker>>,
}

impl RunCache {
    pub fn new(scope: CacheScope, settings: CacheSettings) -> Self {
        Self {
            scope,
            save_paths: TtlCache::new("save_paths", settings),
            files: TtlCache::new("files", settings),
            trackers: TtlCache::new("trackers", settings),
        }
    }

    pub fn scope(&self) -> &CacheScope {
        &self.scope
    }

    /// Aggregate stats across every typed cache.
    pub fn stats(&self) -> CacheStats {
        self.save_paths
            .stats()
            .merge(self.files.stats())
            .merge(self.trackers.stats())
    }

    /// Drop torrent-derived entries after a mutation changes remote state.
    pub fn invalidate_remote(&self) -> usize {
        self.files.invalidate_scope(&self.scope) + self.trackers.invalidate_scope(&self.scope)
    }
}

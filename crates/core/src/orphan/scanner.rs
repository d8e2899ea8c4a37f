//! Directory walk and classification.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::fs;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::rules::ExclusionRules;
use crate::error::ReconcileError;
use crate::index::{covering_roots, ClaimedFileIndex};
use crate::metrics;

/// Terminal state of a file seen during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    /// Matched an exclusion rule.
    Excluded,
    /// Referenced by at least one torrent.
    Claimed,
    /// Neither excluded nor claimed.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanCandidate {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub state: CandidateState,
}

/// Everything one scan found, sorted by path.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub candidates: Vec<OrphanCandidate>,
    /// Directories with no entries at all.
    pub empty_dirs: Vec<PathBuf>,
    pub errors: Vec<ReconcileError>,
}

impl ScanReport {
    pub fn orphans(&self) -> impl Iterator<Item = &OrphanCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.state == CandidateState::Orphaned)
    }

    pub fn orphan_paths(&self) -> BTreeSet<PathBuf> {
        self.orphans().map(|c| c.path.clone()).collect()
    }

    pub fn count(&self, state: CandidateState) -> usize {
        self.candidates.iter().filter(|c| c.state == state).count()
    }

    pub fn orphaned_bytes(&self) -> u64 {
        self.orphans().map(|c| c.size_bytes).sum()
    }
}

/// One file found by the walk, before the index lookup.
struct WalkedFile {
    path: PathBuf,
    size_bytes: u64,
    excluded: bool,
}

#[derive(Default)]
struct WalkOutput {
    files: Vec<WalkedFile>,
    empty_dirs: Vec<PathBuf>,
    errors: Vec<ReconcileError>,
}

/// Walk one root, pruning excluded directories and testing each file against
/// the file exclusions.
fn walk_root(root: &Path, rules: &ExclusionRules) -> WalkOutput {
    let mut output = WalkOutput::default();
    if rules.is_excluded_dir(root) {
        debug!(root = %root.display(), "Scan root is excluded");
        return output;
    }

    let mut dirs = BTreeSet::new();
    let mut parents = BTreeSet::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            // Pruned entries still make their parent non-empty.
            if entry.depth() > 0 {
                if let Some(parent) = entry.path().parent() {
                    parents.insert(parent.to_path_buf());
                }
            }
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !rules.is_excluded_dir(entry.path())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!(path = %path.display(), error = %e, "Failed to read directory entry");
                output.errors.push(ReconcileError::filesystem(path, e));
                continue;
            }
        };

        if entry.file_type().is_dir() {
            if entry.depth() > 0 {
                dirs.insert(entry.path().to_path_buf());
            }
            continue;
        }

        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                output
                    .errors
                    .push(ReconcileError::filesystem(entry.path(), e));
                continue;
            }
        };
        metrics::FILES_SCANNED.inc();
        output.files.push(WalkedFile {
            excluded: rules.is_excluded_file(entry.path()),
            path: entry.into_path(),
            size_bytes,
        });
    }

    output.empty_dirs = dirs.difference(&parents).cloned().collect();
    output
}

/// Run `walk` for `root` on the blocking pool, giving up after `timeout`.
///
/// The existence check shares the same deadline. A walk that overruns keeps
/// its blocking thread until it returns, but its output is discarded.
async fn bounded_walk<F>(root: PathBuf, timeout: Duration, walk: F) -> WalkOutput
where
    F: FnOnce(&Path) -> WalkOutput + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let mut output = WalkOutput::default();

    let reason = match time::timeout_at(deadline, fs::metadata(&root)).await {
        Ok(Ok(meta)) if meta.is_dir() => None,
        Ok(Ok(_)) => Some("scan directory is not a directory".to_string()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Some("scan directory does not exist".to_string())
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("scan directory not reachable within {:?}", timeout)),
    };
    if let Some(reason) = reason {
        output.errors.push(ReconcileError::filesystem(&root, reason));
        return output;
    }

    let walk_path = root.clone();
    let task = tokio::task::spawn_blocking(move || walk(&walk_path));
    match time::timeout_at(deadline, task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            output.errors.push(ReconcileError::filesystem(&root, e));
            output
        }
        Err(_) => {
            warn!(root = %root.display(), ?timeout, "Scan timed out, skipping root");
            output.errors.push(ReconcileError::filesystem(
                &root,
                format!("scan timed out after {:?}", timeout),
            ));
            output
        }
    }
}

/// Scan `directories` and classify every file against the exclusions and
/// the claimed index.
///
/// Nested directories are collapsed to their covering set first. Covering
/// directories are walked in parallel on the blocking pool, each bounded by
/// `timeout`; the index must be complete before this is called. Files under
/// the save path of a torrent whose file list is unknown are never orphaned.
pub async fn scan(
    directories: &[PathBuf],
    index: &ClaimedFileIndex,
    rules: Arc<ExclusionRules>,
    timeout: Duration,
) -> ScanReport {
    let roots = covering_roots(directories.iter().cloned());
    let mut report = ScanReport::default();

    let walks = roots.into_iter().map(|root| {
        let rules = Arc::clone(&rules);
        bounded_walk(root, timeout, move |root| walk_root(root, &rules))
    });

    for output in join_all(walks).await {
        for file in output.files {
            let state = if file.excluded {
                CandidateState::Excluded
            } else if index.contains(&file.path) {
                CandidateState::Claimed
            } else if index.has_unknown_holder(&file.path) {
                debug!(path = %file.path.display(), "Unindexed file under a torrent with unknown files");
                CandidateState::Excluded
            } else {
                CandidateState::Orphaned
            };
            report.candidates.push(OrphanCandidate {
                path: file.path,
                size_bytes: file.size_bytes,
                state,
            });
        }
        report.empty_dirs.extend(output.empty_dirs);
        report.errors.extend(output.errors);
    }

    report.candidates.sort_by(|a, b| a.path.cmp(&b.path));
    report.empty_dirs.sort();

    let orphaned = report.count(CandidateState::Orphaned);
    metrics::ORPHANS_FOUND.set(orphaned as i64);
    info!(
        scanned = report.candidates.len(),
        claimed = report.count(CandidateState::Claimed),
        excluded = report.count(CandidateState::Excluded),
        orphaned,
        empty_dirs = report.empty_dirs.len(),
        "Orphan scan finished"
    );
    report
}

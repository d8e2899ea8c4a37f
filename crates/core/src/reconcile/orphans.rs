//! Orphan detection over the post-deletion index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::context::StageContext;
use super::report::{Stage, StageReport};
use crate::index::ClaimedFileIndex;
use crate::orphan::{scan, CandidateState, ExclusionRules};
use crate::recycle::RecycleReason;

/// Configured scan directories, canonicalized where possible, followed by
/// the index's covering save paths.
pub(crate) async fn scan_directories(
    scan_dirs: &[PathBuf],
    index: &ClaimedFileIndex,
) -> Vec<PathBuf> {
    let mut directories = Vec::with_capacity(scan_dirs.len() + index.roots().len());
    for dir in scan_dirs {
        match tokio::fs::canonicalize(dir).await {
            Ok(resolved) => directories.push(resolved),
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Cannot canonicalize scan directory");
                directories.push(dir.clone());
            }
        }
    }
    directories.extend(index.roots().iter().cloned());
    directories
}

pub(crate) async fn run(
    ctx: &StageContext<'_>,
    index: &ClaimedFileIndex,
    rules: Arc<ExclusionRules>,
) -> StageReport {
    let config = &ctx.config.orphans;
    let mut report = StageReport::new(Stage::Orphans);

    let directories = scan_directories(&config.scan_dirs, index).await;
    let timeout = Duration::from_secs(config.scan_timeout_secs);
    let scan_report = scan(&directories, index, rules, timeout).await;

    report.scanned = scan_report.candidates.len();
    report.claimed = scan_report.count(CandidateState::Claimed);
    report.excluded = scan_report.count(CandidateState::Excluded);
    report.orphaned = scan_report.count(CandidateState::Orphaned);
    for error in &scan_report.errors {
        warn!(error = %error, "Orphan scan error");
        report.record_error(1, error.to_string());
    }
    for dir in &scan_report.empty_dirs {
        info!(dir = %dir.display(), "Empty directory");
    }
    for orphan in scan_report.orphans() {
        info!(path = %orphan.path.display(), size = orphan.size_bytes, "Orphaned file");
    }

    match ctx.recycle {
        Some(bin) if config.move_to_recycle_bin => {
            let paths: Vec<PathBuf> = scan_report.orphans().map(|o| o.path.clone()).collect();
            ctx.recycle_files(bin, &paths, None, RecycleReason::Orphaned, &mut report)
                .await;
        }
        _ => report.bytes = scan_report.orphaned_bytes(),
    }

    info!(
        scanned = report.scanned,
        claimed = report.claimed,
        excluded = report.excluded,
        orphaned = report.orphaned,
        moved = report.moved,
        "Orphan scan finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::reconcile::cancel::CancelFlag;
    use crate::reconcile::context::test_support;
    use crate::recycle::RecycleBin;
    use crate::testing::MockTorrentClient;

    fn write(path: &std::path::Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"data").unwrap();
    }

    #[tokio::test]
    async fn test_orphans_reported_and_recycled() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let data = root.join("data");
        write(&data.join("kept.mkv"));
        write(&data.join("stray.nfo"));
        write(&data.join("partial.mkv.!qB"));

        let bin = RecycleBin::open(root.join("recycle")).unwrap();
        let client = MockTorrentClient::new();
        let mut config = test_support::config();
        config.dry_run = false;
        config.orphans.enabled = true;
        config.orphans.scan_dirs = vec![data.clone()];
        config.orphans.move_to_recycle_bin = true;
        let cancel = CancelFlag::new();
        let ctx = test_support::context(&client, &config, Some(&bin), &cancel);

        let mut index = ClaimedFileIndex::default();
        index.insert("a", data.join("kept.mkv"), 4);
        let rules = ExclusionRules::compile(&["*.!qB"], &[] as &[&str])
            .unwrap()
            .with_excluded_dir(bin.root());

        let report = run(&ctx, &index, Arc::new(rules)).await;
        assert_eq!(report.scanned, 3);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.excluded, 1);
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.moved, 1);
        assert!(!data.join("stray.nfo").exists());
        assert!(data.join("partial.mkv.!qB").exists());
        assert!(bin.root().join("orphaned/uncategorized").is_dir());
    }

    #[tokio::test]
    async fn test_report_only_without_move() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().canonicalize().unwrap();
        write(&data.join("stray.nfo"));

        let client = MockTorrentClient::new();
        let mut config = test_support::config();
        config.orphans.scan_dirs = vec![data.clone()];
        let cancel = CancelFlag::new();
        let ctx = test_support::context(&client, &config, None, &cancel);

        let index = ClaimedFileIndex::default();
        let report = run(&ctx, &index, Arc::new(ExclusionRules::default())).await;
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.moved, 0);
        assert_eq!(report.bytes, 4);
        assert!(data.join("stray.nfo").exists());
    }
}

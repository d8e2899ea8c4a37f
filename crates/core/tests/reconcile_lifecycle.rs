//! Reconciliation lifecycle integration tests.
//!
//! These tests run the full reconciler against the mock client and a real
//! temporary directory tree:
//! - Cross-seeded data survives until its last holder is deleted
//! - Exclusions keep partial downloads out of the recycle bin
//! - Repeated moves of the same path get distinct destinations
//! - Mutations are grouped into one call per distinct target state
//! - Dry runs compute everything and change nothing
//! - Torrents whose details failed to load keep their data

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walkdir::WalkDir;

use reconcile_core::{
    load_config_from_str, scan, CacheSettings, ClaimedFileIndex, ExclusionRules, Reconciler,
    RunCache, RunOutcome, RunSummary, Stage, TorrentClient,
    testing::{fixtures, MockTorrentClient, RecordedCall},
    TorrentClientError,
};

/// Temporary data tree, recycle bin and mock client.
struct TestHarness {
    _temp_dir: TempDir,
    data: PathBuf,
    recycle: PathBuf,
    client: Arc<MockTorrentClient>,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().canonicalize().unwrap();
        let data = root.join("data");
        std::fs::create_dir_all(&data).unwrap();
        Self {
            _temp_dir: temp_dir,
            data,
            recycle: root.join("recycle"),
            client: Arc::new(MockTorrentClient::new()),
        }
    }

    fn write(&self, relative: &str) -> PathBuf {
        let path = self.data.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, relative.as_bytes()).unwrap();
        path
    }

    fn save_path(&self) -> &str {
        self.data.to_str().unwrap()
    }

    async fn add(&self, hash: &str, files: &[&str], tags: &[&str]) {
        let record = fixtures::with_tags(fixtures::torrent(hash, self.save_path(), files), tags);
        self.client.add_torrent(record).await;
    }

    /// Config with the recycle bin and the given extra TOML sections.
    fn config(&self, dry_run: bool, sections: &str) -> String {
        format!(
            r#"
dry_run = {dry_run}

[client]
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"

[recycle_bin]
path = "{recycle}"

{sections}
"#,
            recycle = self.recycle.display(),
        )
    }

    async fn run(&self, config: &str) -> RunSummary {
        let config = load_config_from_str(config).expect("Failed to parse config");
        let client: Arc<dyn TorrentClient> = self.client.clone();
        let reconciler = Reconciler::new(config, client).expect("Failed to build reconciler");
        reconciler.run().await
    }

    fn recycled_files(&self) -> Vec<PathBuf> {
        if !self.recycle.exists() {
            return Vec::new();
        }
        WalkDir::new(&self.recycle)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    fn recycle_destination(&self, reason: &str, category: &str, source: &Path) -> PathBuf {
        self.recycle
            .join(reason)
            .join(category)
            .join(source.strip_prefix("/").unwrap())
    }
}

const DELETION: &str = r#"
[deletion]
enabled = true
tags = ["unregistered"]
delete_files = { unregistered = true }
"#;

const ORPHANS: &str = r#"
[orphans]
enabled = true
exclude_files = ["*.!qB"]
move_to_recycle_bin = true
"#;

#[tokio::test]
async fn test_cross_seed_file_survives_first_deletion() {
    let harness = TestHarness::new();
    let shared = harness.write("show/ep1.mkv");
    let extra = harness.write("show/a_extra.nfo");
    harness
        .add("a", &["show/ep1.mkv", "show/a_extra.nfo"], &["unregistered"])
        .await;
    harness.add("b", &["show/ep1.mkv"], &[]).await;

    let config = harness.config(false, DELETION);
    let summary = harness.run(&config).await;
    assert_eq!(summary.outcome, RunOutcome::Success);

    let deletion = summary.stage(Stage::Deletion).unwrap();
    assert_eq!(deletion.matched, 1);
    assert_eq!(deletion.moved, 1);
    assert!(shared.exists(), "shared file must stay while b holds it");
    assert!(!extra.exists());
    assert!(harness
        .recycle_destination("unregistered", "uncategorized", &extra)
        .exists());
    assert_eq!(
        harness.client.mutations().await,
        vec![RecordedCall::DeleteTorrents {
            hashes: vec!["a".to_string()],
            delete_files: false,
        }]
    );

    // The last holder goes away on a later run.
    harness
        .client
        .add_tags(&["b".to_string()], &["unregistered".to_string()])
        .await
        .unwrap();
    harness.client.clear_recorded().await;

    let summary = harness.run(&config).await;
    assert_eq!(summary.stage(Stage::Deletion).unwrap().moved, 1);
    assert!(!shared.exists());
    assert!(harness
        .recycle_destination("unregistered", "uncategorized", &shared)
        .exists());
    assert_eq!(harness.client.torrent_count().await, 0);
}

#[tokio::test]
async fn test_partial_download_is_never_orphaned() {
    let harness = TestHarness::new();
    harness.write("movie/movie.mkv");
    let partial = harness.write("incoming/next.mkv.!qB");
    let stray = harness.write("movie/sample.txt");
    harness.add("a", &["movie/movie.mkv"], &[]).await;

    let summary = harness.run(&harness.config(false, ORPHANS)).await;
    let orphans = summary.stage(Stage::Orphans).unwrap();
    assert_eq!(orphans.claimed, 1);
    assert_eq!(orphans.excluded, 1);
    assert_eq!(orphans.orphaned, 1);
    assert_eq!(orphans.moved, 1);

    assert!(partial.exists());
    assert!(!stray.exists());
    assert!(harness
        .recycle_destination("orphaned", "uncategorized", &stray)
        .exists());
}

#[tokio::test]
async fn test_repeated_moves_get_distinct_destinations() {
    let harness = TestHarness::new();
    let config = harness.config(false, ORPHANS);
    harness.write("movie.mkv");
    harness.add("a", &["movie.mkv"], &[]).await;

    harness.write("leftover.txt");
    harness.run(&config).await;
    harness.write("leftover.txt");
    let summary = harness.run(&config).await;
    assert_eq!(summary.stage(Stage::Orphans).unwrap().moved, 1);

    let recycled = harness.recycled_files();
    assert_eq!(recycled.len(), 2);
    let names: BTreeSet<String> = recycled
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains("leftover.txt"));
    assert!(names
        .iter()
        .any(|n| n.starts_with("leftover_") && n.ends_with(".txt")));
}

#[tokio::test]
async fn test_one_call_per_distinct_tag() {
    let harness = TestHarness::new();
    let trackers = [
        ("a", "https://aither.cc/announce/k1"),
        ("b", "https://tracker.blutopia.cc/announce"),
        ("c", "https://aither.cc/announce/k2"),
        ("d", "https://beyond-hd.me/announce"),
        ("e", "https://tracker.blutopia.cc/announce"),
        ("f", "https://aither.cc/announce/k3"),
    ];
    for (hash, url) in trackers {
        let record = fixtures::with_trackers(
            fixtures::torrent(hash, harness.save_path(), &[hash]),
            vec![fixtures::working_tracker(url)],
        );
        harness.client.add_torrent(record).await;
    }

    let sections = r#"
[tracker_tags.aither]
tag = "AITHER"

[tracker_tags.blutopia]
tag = "BLU"
seed_time_limit = 1440

[tracker_tags."beyond-hd"]
tag = "BHD"
seed_time_limit = 1440
"#;
    let summary = harness.run(&harness.config(false, sections)).await;

    let stage = summary.stage(Stage::TrackerTags).unwrap();
    assert_eq!(stage.matched, 6);
    // Three tags plus one share-limit pair.
    assert_eq!(stage.grouped_calls, 4);
    assert_eq!(harness.client.call_count("add_tags").await, 3);
    assert_eq!(harness.client.call_count("set_share_limits").await, 1);
    assert!(harness
        .client
        .torrent("c")
        .await
        .unwrap()
        .has_tag("AITHER"));
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let harness = TestHarness::new();
    let doomed = harness.write("old/old.mkv");
    let stray = harness.write("stray.txt");
    harness.write("keep/keep.mkv");
    harness.add("old", &["old/old.mkv"], &["unregistered"]).await;
    harness.add("keep", &["keep/keep.mkv"], &[]).await;

    let sections = format!(
        "{}{}\n[cross_seed_tagging]\nenabled = true\n\n[age_tagging]\nenabled = true\n",
        DELETION, ORPHANS
    );
    let summary = harness.run(&harness.config(true, &sections)).await;

    assert!(summary.dry_run);
    assert!(harness.client.mutations().await.is_empty());
    assert!(doomed.exists());
    assert!(stray.exists());
    assert!(harness.recycled_files().is_empty());

    let deletion = summary.stage(Stage::Deletion).unwrap();
    assert_eq!(deletion.matched, 1);
    assert_eq!(deletion.moved, 1);
    let orphans = summary.stage(Stage::Orphans).unwrap();
    assert_eq!(orphans.orphaned, 1);
    assert!(summary.stage(Stage::CrossSeed).unwrap().grouped_calls > 0);
    assert!(summary.format_summary().contains("(dry run)"));
}

#[tokio::test]
async fn test_orphan_scan_is_idempotent() {
    let harness = TestHarness::new();
    harness.write("a/a.mkv");
    harness.write("a/extra.srt");
    harness.write("b/nested/b.mkv");
    harness.write("b/nested/readme.txt");
    harness.add("a", &["a/a.mkv"], &[]).await;
    harness.add("b", &["b/nested/b.mkv"], &[]).await;

    let cache = RunCache::new(harness.client.identity(), CacheSettings::default());
    let torrents = vec![
        harness.client.torrent("a").await.unwrap(),
        harness.client.torrent("b").await.unwrap(),
    ];
    let index = ClaimedFileIndex::build(&torrents, &cache).await;
    let rules = Arc::new(ExclusionRules::default());

    let dirs = vec![harness.data.clone(), harness.data.join("b")];
    let timeout = Duration::from_secs(30);
    let first = scan(&dirs, &index, Arc::clone(&rules), timeout).await;
    let second = scan(&dirs, &index, rules, timeout).await;

    assert_eq!(first.orphan_paths(), second.orphan_paths());
    assert_eq!(first.candidates.len(), 4);
    assert_eq!(
        first.orphan_paths(),
        [
            harness.data.join("a/extra.srt"),
            harness.data.join("b/nested/readme.txt"),
        ]
        .into_iter()
        .collect()
    );
}

#[tokio::test]
async fn test_torrent_with_failed_details_keeps_its_data() {
    let harness = TestHarness::new();
    let shared = harness.write("show/ep1.mkv");
    let flaky_only = harness.write("flaky/flaky.mkv");
    let doomed_extra = harness.write("show/a.nfo");
    harness
        .add("a", &["show/ep1.mkv", "show/a.nfo"], &["unregistered"])
        .await;
    harness
        .add("flaky", &["show/ep1.mkv", "flaky/flaky.mkv"], &[])
        .await;
    harness
        .client
        .fail_hash("flaky", TorrentClientError::Timeout)
        .await;

    let sections = format!("{}{}", DELETION, ORPHANS);
    let summary = harness.run(&harness.config(false, &sections)).await;
    assert_eq!(summary.outcome, RunOutcome::Partial);
    assert_eq!(summary.snapshot_errors.len(), 1);

    assert_eq!(
        harness.client.mutations().await,
        vec![RecordedCall::DeleteTorrents {
            hashes: vec!["a".to_string()],
            delete_files: false,
        }]
    );
    let orphans = summary.stage(Stage::Orphans).unwrap();
    assert_eq!(orphans.orphaned, 0);
    assert_eq!(orphans.moved, 0);
    assert!(shared.exists());
    assert!(flaky_only.exists());
    assert!(doomed_extra.exists());
    assert!(harness.recycled_files().is_empty());
}

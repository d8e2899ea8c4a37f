//! One reconciliation pass over a torrent client.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cancel::CancelFlag;
use super::context::{StageContext, TagState};
use super::report::RunSummary;
use super::trackers::TrackerMatcher;
use super::{deletion, orphans, tagging, unregistered};
use crate::cache::{CacheSettings, RunCache};
use crate::classifier::PatternRuleSet;
use crate::config::{validate_config, Config, ConfigError};
use crate::index::ClaimedFileIndex;
use crate::metrics;
use crate::orphan::ExclusionRules;
use crate::recycle::RecycleBin;
use crate::snapshot::fetch_snapshot;
use crate::torrent_client::TorrentClient;

/// Runs the reconciliation stages against a torrent client.
///
/// Everything that can be rejected up front (patterns, exclusions, the
/// recycle bin root) is compiled in [`Reconciler::new`], so a misconfigured
/// run fails before any remote call.
pub struct Reconciler {
    config: Config,
    client: Arc<dyn TorrentClient>,
    recycle: Option<RecycleBin>,
    classifier: PatternRuleSet,
    matcher: TrackerMatcher,
    exclusions: Arc<ExclusionRules>,
    cancel: CancelFlag,
}

impl Reconciler {
    pub fn new(config: Config, client: Arc<dyn TorrentClient>) -> Result<Self, ConfigError> {
        validate_config(&config)?;

        let recycle = config
            .recycle_bin
            .as_ref()
            .map(|rb| RecycleBin::open(rb.path.clone()))
            .transpose()?;
        let classifier = PatternRuleSet::compile(&config.unregistered.patterns)?;
        let matcher = TrackerMatcher::new(&config.tracker_tags);

        let mut exclusions =
            ExclusionRules::compile(&config.orphans.exclude_files, &config.orphans.exclude_dirs)?;
        if let Some(bin) = &recycle {
            exclusions = exclusions.with_excluded_dir(bin.root());
        }

        Ok(Self {
            config,
            client,
            recycle,
            classifier,
            matcher,
            exclusions: Arc::new(exclusions),
            cancel: CancelFlag::new(),
        })
    }

    /// Share an externally owned cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every enabled stage once and summarize the outcome.
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("reconcile", run_id = %run_id, dry_run = self.config.dry_run);
        let summary = self.run_stages(run_id).instrument(span).await;

        metrics::RUNS
            .with_label_values(&[summary.outcome.as_str()])
            .inc();
        summary
    }

    async fn run_stages(&self, run_id: String) -> RunSummary {
        let config = &self.config;
        let mut summary = RunSummary::new(run_id, config.dry_run);
        let cache = RunCache::new(self.client.identity(), CacheSettings::from(&config.cache));
        let timeout = Duration::from_secs(u64::from(config.client.timeout_secs));

        info!(client = self.client.name(), "Starting reconciliation");

        let snapshot = match fetch_snapshot(self.client.as_ref(), &cache, timeout).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Cannot fetch torrents");
                summary.fatal = Some(e.to_string());
                summary.cache = cache.stats();
                summary.finish();
                return summary;
            }
        };
        summary.torrents = snapshot.torrents.len();
        summary.snapshot_errors = snapshot.errors.iter().map(ToString::to_string).collect();

        let mut index = ClaimedFileIndex::build(&snapshot.torrents, &cache).await;
        if !snapshot.is_complete() {
            index.add_unknown_holders(&snapshot.incomplete, &cache).await;
        }
        for warning in index.integrity_warnings() {
            warn!(warning = %warning, "Save path excluded from index");
            summary.integrity_warnings.push(warning.to_string());
        }
        info!(
            torrents = summary.torrents,
            claimed = index.len(),
            roots = index.roots().len(),
            unknown_roots = index.unknown_roots().len(),
            "Claimed file index built"
        );

        let mut tags = TagState::from_snapshot(&snapshot);
        let ctx = StageContext {
            client: self.client.as_ref(),
            config,
            recycle: self.recycle.as_ref(),
            timeout,
            dry_run: config.dry_run,
            cancel: &self.cancel,
        };

        if config.unregistered.enabled && !self.stopped(&mut summary) {
            let report =
                unregistered::run(&ctx, &snapshot, &index, &self.classifier, &mut tags).await;
            summary.stages.push(report);
        }
        if !self.matcher.is_empty() && !self.stopped(&mut summary) {
            let report = tagging::tracker_tags(&ctx, &snapshot, &self.matcher, &mut tags).await;
            summary.stages.push(report);
        }
        if config.cross_seed_tagging.enabled && !self.stopped(&mut summary) {
            let report = tagging::cross_seed_tags(&ctx, &snapshot, &index, &mut tags).await;
            summary.stages.push(report);
        }
        if config.age_tagging.enabled && !self.stopped(&mut summary) {
            let report = tagging::age_tags(&ctx, &snapshot, &mut tags).await;
            summary.stages.push(report);
        }
        if config.deletion.enabled && !self.stopped(&mut summary) {
            let report = deletion::run(&ctx, &snapshot, &mut index, &cache, &tags).await;
            summary.stages.push(report);
        }
        if config.orphans.enabled && !self.stopped(&mut summary) {
            let report = orphans::run(&ctx, &index, Arc::clone(&self.exclusions)).await;
            summary.stages.push(report);
        }

        self.stopped(&mut summary);
        summary.cache = cache.stats();
        summary.finish();
        info!(
            outcome = summary.outcome.as_str(),
            errors = summary.total_errors(),
            cache_hits = summary.cache.hits,
            cache_misses = summary.cache.misses,
            "Reconciliation finished"
        );
        summary
    }

    fn stopped(&self, summary: &mut RunSummary) -> bool {
        if self.cancel.is_cancelled() {
            if !summary.cancelled {
                warn!("Run cancelled, skipping remaining stages");
            }
            summary.cancelled = true;
        }
        summary.cancelled
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::RecycleBinConfig;
    use crate::reconcile::context::test_support;
    use crate::reconcile::report::{RunOutcome, Stage};
    use crate::testing::{fixtures, MockTorrentClient, RecordedCall};
    use crate::torrent_client::TorrentClientError;

    #[test]
    fn test_new_rejects_bad_patterns() {
        let mut config = test_support::config();
        config.unregistered.patterns = vec!["starts_with:".to_string()];
        let client: Arc<dyn TorrentClient> = Arc::new(MockTorrentClient::new());
        assert!(Reconciler::new(config, client).is_err());
    }

    #[tokio::test]
    async fn test_list_failure_is_fatal() {
        let client = Arc::new(MockTorrentClient::new());
        client
            .fail_operation(
                "list_torrents",
                TorrentClientError::AuthenticationFailed("bad password".to_string()),
            )
            .await;
        let reconciler = Reconciler::new(test_support::config(), client.clone()).unwrap();

        let summary = reconciler.run().await;
        assert_eq!(summary.outcome, RunOutcome::Failed);
        assert!(summary.fatal.is_some());
        assert!(summary.stages.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_tags_without_mutating() {
        let client = Arc::new(MockTorrentClient::new());
        client
            .add_torrent(fixtures::with_trackers(
                fixtures::torrent("aaa", "/nonexistent/data", &["a.mkv"]),
                vec![fixtures::failing_tracker(
                    "https://tracker.example.org/announce",
                    "Unregistered torrent",
                )],
            ))
            .await;
        let mut config = test_support::config();
        config.unregistered.patterns = vec!["Unregistered torrent".to_string()];
        let reconciler = Reconciler::new(config, client.clone()).unwrap();

        let summary = reconciler.run().await;
        let stage = summary.stage(Stage::Unregistered).unwrap();
        assert_eq!(stage.matched, 1);
        assert_eq!(stage.grouped_calls, 1);
        assert!(client.mutations().await.is_empty());
        assert_eq!(summary.integrity_warnings.len(), 1);
        assert_eq!(summary.outcome, RunOutcome::Success);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let client = Arc::new(MockTorrentClient::new());
        client
            .add_torrent(fixtures::torrent("aaa", "/data", &["a.mkv"]))
            .await;
        let reconciler = Reconciler::new(test_support::config(), client.clone()).unwrap();
        reconciler.cancel_flag().cancel();

        let summary = reconciler.run().await;
        assert!(summary.cancelled);
        assert!(summary.stages.is_empty());
        assert_eq!(summary.outcome, RunOutcome::Partial);
    }

    fn data_dir(temp: &TempDir, files: &[&str]) -> std::path::PathBuf {
        let data = temp.path().canonicalize().unwrap().join("data");
        for file in files {
            let path = data.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"seeding").unwrap();
        }
        std::fs::create_dir_all(&data).unwrap();
        data
    }

    #[tokio::test]
    async fn test_files_of_undetailed_torrent_are_not_recycled() {
        let temp = TempDir::new().unwrap();
        let data = data_dir(&temp, &["flaky.mkv"]);
        let save = data.to_str().unwrap();

        let client = Arc::new(MockTorrentClient::new());
        client.add_torrent(fixtures::torrent("ok", save, &[])).await;
        client
            .add_torrent(fixtures::torrent("flaky", save, &["flaky.mkv"]))
            .await;
        client.fail_hash("flaky", TorrentClientError::Timeout).await;

        let mut config = test_support::config();
        config.dry_run = false;
        config.orphans.enabled = true;
        config.orphans.move_to_recycle_bin = true;
        config.recycle_bin = Some(RecycleBinConfig {
            path: temp.path().join("recycle"),
        });
        let reconciler = Reconciler::new(config, client.clone()).unwrap();

        let summary = reconciler.run().await;
        assert_eq!(summary.torrents, 1);
        assert_eq!(summary.snapshot_errors.len(), 1);
        let orphans = summary.stage(Stage::Orphans).unwrap();
        assert_eq!(orphans.scanned, 1);
        assert_eq!(orphans.excluded, 1);
        assert_eq!(orphans.orphaned, 0);
        assert_eq!(orphans.moved, 0);
        assert!(data.join("flaky.mkv").exists());
    }

    #[tokio::test]
    async fn test_data_shared_with_undetailed_torrent_is_kept() {
        let temp = TempDir::new().unwrap();
        let data = data_dir(&temp, &["show/ep1.mkv", "show/a.nfo"]);
        let save = data.to_str().unwrap();

        let client = Arc::new(MockTorrentClient::new());
        client
            .add_torrent(fixtures::with_tags(
                fixtures::torrent("a", save, &["show/ep1.mkv", "show/a.nfo"]),
                &["unregistered"],
            ))
            .await;
        client
            .add_torrent(fixtures::torrent("b", save, &["show/ep1.mkv"]))
            .await;
        client.fail_hash("b", TorrentClientError::Timeout).await;

        let mut config = test_support::config();
        config.dry_run = false;
        config.unregistered.enabled = false;
        config.deletion.enabled = true;
        config.deletion.tags = vec!["unregistered".to_string()];
        config
            .deletion
            .delete_files
            .insert("unregistered".to_string(), true);
        let reconciler = Reconciler::new(config, client.clone()).unwrap();

        let summary = reconciler.run().await;
        assert_eq!(summary.stage(Stage::Deletion).unwrap().matched, 1);
        assert_eq!(
            client.mutations().await,
            vec![RecordedCall::DeleteTorrents {
                hashes: vec!["a".to_string()],
                delete_files: false,
            }]
        );
        assert!(data.join("show/ep1.mkv").exists());
        assert!(data.join("show/a.nfo").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recycled_files_stay_recycled_through_symlink() {
        let temp = TempDir::new().unwrap();
        let data = data_dir(&temp, &["stray.txt"]);
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&data, &link).unwrap();

        let client = Arc::new(MockTorrentClient::new());
        let mut config = test_support::config();
        config.dry_run = false;
        config.orphans.enabled = true;
        config.orphans.scan_dirs = vec![link.clone()];
        config.orphans.move_to_recycle_bin = true;
        config.recycle_bin = Some(RecycleBinConfig {
            path: link.join(".recycle"),
        });

        let first = Reconciler::new(config.clone(), client.clone())
            .unwrap()
            .run()
            .await;
        let orphans = first.stage(Stage::Orphans).unwrap();
        assert_eq!(orphans.orphaned, 1);
        assert_eq!(orphans.moved, 1);
        assert!(!data.join("stray.txt").exists());

        let second = Reconciler::new(config, client).unwrap().run().await;
        let orphans = second.stage(Stage::Orphans).unwrap();
        assert_eq!(orphans.scanned, 0);
        assert_eq!(orphans.orphaned, 0);
        assert_eq!(orphans.moved, 0);
    }
}

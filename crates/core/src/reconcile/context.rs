//! State shared by the stages of one run.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use super::cancel::CancelFlag;
use super::report::StageReport;
use crate::batch::ActionGroups;
use crate::config::Config;
use crate::metrics;
use crate::recycle::{RecycleBin, RecycleReason};
use crate::snapshot::Snapshot;
use crate::torrent_client::{call_with_timeout, ShareLimits, TorrentClient};

/// Borrowed collaborators handed to every stage.
pub(crate) struct StageContext<'a> {
    pub client: &'a dyn TorrentClient,
    pub config: &'a Config,
    pub recycle: Option<&'a RecycleBin>,
    pub timeout: Duration,
    pub dry_run: bool,
    pub cancel: &'a CancelFlag,
}

/// Tags each torrent carries, including tags added earlier in this run (or
/// that would have been, in dry-run).
#[derive(Debug, Default)]
pub(crate) struct TagState {
    tags: HashMap<String, BTreeSet<String>>,
}

impl TagState {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            tags: snapshot
                .torrents
                .iter()
                .map(|t| (t.hash().to_string(), t.info.tags.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn has(&self, hash: &str, tag: &str) -> bool {
        self.tags.get(hash).is_some_and(|tags| tags.contains(tag))
    }

    pub fn add(&mut self, hash: &str, tag: &str) {
        self.tags
            .entry(hash.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    /// First of `candidates` the torrent carries.
    pub fn first_of<'c>(&self, hash: &str, candidates: &'c [String]) -> Option<&'c str> {
        candidates
            .iter()
            .find(|tag| self.has(hash, tag))
            .map(String::as_str)
    }
}

impl StageContext<'_> {
    /// Issue one `add_tags` call per group.
    pub async fn apply_tags(
        &self,
        groups: ActionGroups<String, String>,
        tags: &mut TagState,
        report: &mut StageReport,
    ) {
        for (tag, hashes) in groups {
            if self.cancel.is_cancelled() {
                return;
            }
            report.grouped_calls += 1;

            if self.dry_run {
                info!(tag = %tag, torrents = hashes.len(), "Would add tag");
            } else {
                let tag_list = [tag.clone()];
                let result = call_with_timeout(
                    "add_tags",
                    self.timeout,
                    self.client.add_tags(&hashes, &tag_list),
                )
                .await;
                if let Err(e) = result {
                    warn!(tag = %tag, torrents = hashes.len(), error = %e, "Failed to add tag");
                    report.record_error(hashes.len(), format!("add_tags {}: {}", tag, e));
                    continue;
                }
                metrics::TORRENTS_TAGGED
                    .with_label_values(&[tag.as_str()])
                    .inc_by(hashes.len() as u64);
                info!(tag = %tag, torrents = hashes.len(), "Added tag");
            }

            for hash in &hashes {
                tags.add(hash, &tag);
            }
        }
    }

    /// Issue one `set_share_limits` call per distinct limits pair.
    pub async fn apply_share_limits(
        &self,
        groups: ActionGroups<ShareLimits, String>,
        report: &mut StageReport,
    ) {
        for (limits, hashes) in groups {
            if self.cancel.is_cancelled() {
                return;
            }
            report.grouped_calls += 1;

            if self.dry_run {
                info!(
                    seeding_time = limits.seeding_time_minutes,
                    ratio = limits.ratio.0,
                    torrents = hashes.len(),
                    "Would set share limits"
                );
                continue;
            }

            let result = call_with_timeout(
                "set_share_limits",
                self.timeout,
                self.client.set_share_limits(&hashes, limits),
            )
            .await;
            match result {
                Ok(()) => info!(
                    seeding_time = limits.seeding_time_minutes,
                    ratio = limits.ratio.0,
                    torrents = hashes.len(),
                    "Set share limits"
                ),
                Err(e) => {
                    warn!(torrents = hashes.len(), error = %e, "Failed to set share limits");
                    report.record_error(hashes.len(), format!("set_share_limits: {}", e));
                }
            }
        }
    }

    /// Move each file into the recycle bin, or in dry-run only reserve its
    /// destination. Stops between files once cancelled.
    pub async fn recycle_files(
        &self,
        bin: &RecycleBin,
        paths: &[PathBuf],
        category: Option<&str>,
        reason: RecycleReason,
        report: &mut StageReport,
    ) {
        for path in paths {
            if self.cancel.is_cancelled() {
                return;
            }
            let result = if self.dry_run {
                bin.plan(path, category, reason).await
            } else {
                bin.move_file(path, category, reason).await
            };
            match result {
                Ok(moved) => {
                    if self.dry_run {
                        info!(
                            source = %moved.source.display(),
                            destination = %moved.destination.display(),
                            reason = %reason,
                            "Would move file to recycle bin"
                        );
                    }
                    report.moved += 1;
                    report.bytes += moved.size_bytes;
                }
                Err(e) => {
                    if e.needs_attention() {
                        error!(path = %path.display(), error = %e, "Recycle move left both copies");
                    } else {
                        warn!(path = %path.display(), error = %e, "Failed to recycle file");
                    }
                    report.record_error(1, format!("{}: {}", path.display(), e));
                }
            }
        }
    }
}

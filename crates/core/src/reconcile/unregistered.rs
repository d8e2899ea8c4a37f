//! Tagging of torrents whose trackers report them unregistered.

use std::collections::HashSet;

use tracing::{debug, info};

use super::context::{StageContext, TagState};
use super::report::{Stage, StageReport};
use crate::batch::group_by;
use crate::classifier::PatternRuleSet;
use crate::config::UnregisteredConfig;
use crate::index::ClaimedFileIndex;
use crate::snapshot::Snapshot;
use crate::torrent_client::{TorrentRecord, TrackerStatus};

/// Tracker verdict for one torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerVerdict {
    /// `count` not-working trackers report the torrent unregistered.
    Unregistered { count: usize },
    /// A not-working tracker reports something else worth flagging.
    OtherIssue,
    Healthy,
}

/// Classify a torrent's trackers. Pseudo-trackers and trackers that are not
/// in the not-working state are ignored.
pub fn assess_trackers(
    torrent: &TorrentRecord,
    rules: &PatternRuleSet,
    ignored: &HashSet<&str>,
) -> TrackerVerdict {
    let mut count = 0;
    let mut other_issue = false;

    for tracker in &torrent.trackers {
        if tracker.is_pseudo() || tracker.status != TrackerStatus::NotWorking {
            continue;
        }
        if rules.classify(&tracker.message) {
            count += 1;
            info!(
                torrent = %torrent.info.name,
                message = %tracker.message,
                tracker = %tracker.url,
                "Tracker reports torrent unregistered"
            );
        } else if !tracker.message.is_empty() && !ignored.contains(tracker.message.as_str()) {
            other_issue = true;
        }
    }

    if count > 0 {
        TrackerVerdict::Unregistered { count }
    } else if other_issue {
        TrackerVerdict::OtherIssue
    } else {
        TrackerVerdict::Healthy
    }
}

/// Pick the tag for a verdict; cross-seeded unregistered torrents get their
/// own tag so their shared data is not mistaken for dead content.
fn tag_for<'c>(
    verdict: &TrackerVerdict,
    shares_files: bool,
    config: &'c UnregisteredConfig,
) -> Option<&'c str> {
    match verdict {
        TrackerVerdict::Unregistered { .. } if shares_files => {
            Some(config.cross_seeding_tag.as_str())
        }
        TrackerVerdict::Unregistered { .. } => Some(config.default_tag.as_str()),
        TrackerVerdict::OtherIssue => Some(config.other_issues_tag.as_str()),
        TrackerVerdict::Healthy => None,
    }
}

pub(crate) async fn run(
    ctx: &StageContext<'_>,
    snapshot: &Snapshot,
    index: &ClaimedFileIndex,
    rules: &PatternRuleSet,
    tags: &mut TagState,
) -> StageReport {
    let config = &ctx.config.unregistered;
    let ignored: HashSet<&str> = config.ignored_messages.iter().map(String::as_str).collect();
    let mut report = StageReport::new(Stage::Unregistered);

    let mut decisions: Vec<(String, String)> = Vec::new();
    for torrent in &snapshot.torrents {
        if ctx.cancel.is_cancelled() {
            return report;
        }
        report.scanned += 1;

        let verdict = assess_trackers(torrent, rules, &ignored);
        if matches!(verdict, TrackerVerdict::Unregistered { .. }) {
            report.matched += 1;
        }
        let Some(tag) = tag_for(&verdict, index.shares_files(torrent.hash()), config) else {
            continue;
        };
        if tags.has(torrent.hash(), tag) {
            debug!(hash = torrent.hash(), tag, "Tag already present");
            continue;
        }
        decisions.push((torrent.hash().to_string(), tag.to_string()));
    }

    let groups = group_by(decisions, |(_, tag)| tag.clone()).map_items(|(hash, _)| hash);
    ctx.apply_tags(groups, tags, &mut report).await;

    info!(
        scanned = report.scanned,
        unregistered = report.matched,
        calls = report.grouped_calls,
        "Unregistered check finished"
    );
    report
}

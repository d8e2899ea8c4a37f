//! Tracker, cross-seed and age tagging.

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info};

use super::context::{StageContext, TagState};
use super::report::{Stage, StageReport};
use super::trackers::TrackerMatcher;
use crate::batch::group_by;
use crate::index::ClaimedFileIndex;
use crate::snapshot::Snapshot;
use crate::torrent_client::ShareLimits;

/// Tag every torrent with the tag and share limits of the first configured
/// tracker it announces to.
pub(crate) async fn tracker_tags(
    ctx: &StageContext<'_>,
    snapshot: &Snapshot,
    matcher: &TrackerMatcher,
    tags: &mut TagState,
) -> StageReport {
    let mut report = StageReport::new(Stage::TrackerTags);
    let mut tag_decisions: Vec<(String, String)> = Vec::new();
    let mut limit_decisions: Vec<(String, ShareLimits)> = Vec::new();

    for torrent in &snapshot.torrents {
        if ctx.cancel.is_cancelled() {
            return report;
        }
        report.scanned += 1;

        let Some(tracker) = matcher.match_torrent(torrent) else {
            continue;
        };
        report.matched += 1;

        if let Some(tag) = tracker.tag.as_deref().filter(|t| !t.is_empty()) {
            if !tags.has(torrent.hash(), tag) {
                tag_decisions.push((torrent.hash().to_string(), tag.to_string()));
            }
        }

        if tracker.seed_time_limit.is_some() || tracker.seed_ratio_limit.is_some() {
            let limits = ShareLimits::new(tracker.seed_time_limit, tracker.seed_ratio_limit);
            if !limits.is_global() {
                limit_decisions.push((torrent.hash().to_string(), limits));
            }
        }
    }

    let tag_groups = group_by(tag_decisions, |(_, tag)| tag.clone()).map_items(|(hash, _)| hash);
    ctx.apply_tags(tag_groups, tags, &mut report).await;

    let limit_groups = group_by(limit_decisions, |(_, limits)| *limits).map_items(|(hash, _)| hash);
    ctx.apply_share_limits(limit_groups, &mut report).await;

    info!(
        scanned = report.scanned,
        matched = report.matched,
        calls = report.grouped_calls,
        "Tracker tagging finished"
    );
    report
}

/// Tag torrents by whether any of their files is shared with another torrent.
pub(crate) async fn cross_seed_tags(
    ctx: &StageContext<'_>,
    snapshot: &Snapshot,
    index: &ClaimedFileIndex,
    tags: &mut TagState,
) -> StageReport {
    let config = &ctx.config.cross_seed_tagging;
    let mut report = StageReport::new(Stage::CrossSeed);
    let mut decisions: Vec<(String, String)> = Vec::new();

    for torrent in &snapshot.torrents {
        if ctx.cancel.is_cancelled() {
            return report;
        }
        report.scanned += 1;

        // Nothing indexed means the save path did not resolve; no verdict.
        if index.files_of(torrent.hash()).is_empty() {
            debug!(hash = torrent.hash(), "No indexed files, skipping");
            continue;
        }

        let tag = if index.shares_files(torrent.hash()) {
            report.matched += 1;
            &config.tag
        } else {
            &config.unique_tag
        };
        if !tags.has(torrent.hash(), tag) {
            decisions.push((torrent.hash().to_string(), tag.clone()));
        }
    }

    let groups = group_by(decisions, |(_, tag)| tag.clone()).map_items(|(hash, _)| hash);
    ctx.apply_tags(groups, tags, &mut report).await;

    info!(
        scanned = report.scanned,
        cross_seeded = report.matched,
        calls = report.grouped_calls,
        "Cross-seed tagging finished"
    );
    report
}

/// Bucket for a torrent completed at `completed`, counted in calendar months.
pub fn age_bucket(completed: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    let months = (now.year() - completed.year()) * 12 + now.month() as i32 - completed.month() as i32;
    match months {
        i32::MIN..=1 => ">1_month",
        2 => ">2_months",
        3 => ">3_months",
        4 => ">4_months",
        5 => ">5_months",
        6 => ">6_months",
        _ => "6_months_plus",
    }
}

/// Tag completed torrents with their age bucket.
pub(crate) async fn age_tags(
    ctx: &StageContext<'_>,
    snapshot: &Snapshot,
    tags: &mut TagState,
) -> StageReport {
    let mut report = StageReport::new(Stage::Age);
    let now = Utc::now();
    let mut decisions: Vec<(String, &'static str)> = Vec::new();

    for torrent in &snapshot.torrents {
        if ctx.cancel.is_cancelled() {
            return report;
        }
        report.scanned += 1;

        let Some(completed) = torrent.info.completed_at else {
            continue;
        };
        report.matched += 1;
        let bucket = age_bucket(completed, now);
        if !tags.has(torrent.hash(), bucket) {
            decisions.push((torrent.hash().to_string(), bucket));
        }
    }

    let groups = group_by(decisions, |(_, bucket)| bucket.to_string()).map_items(|(hash, _)| hash);
    ctx.apply_tags(groups, tags, &mut report).await;

    info!(
        scanned = report.scanned,
        completed = report.matched,
        calls = report.grouped_calls,
        "Age tagging finished"
    );
    report
}

//! Deletion of torrents carrying a deletion tag.

use std::path::PathBuf;

use tracing::{info, warn};

use super::context::{StageContext, TagState};
use super::report::{Stage, StageReport};
use crate::batch::group_by;
use crate::cache::RunCache;
use crate::index::ClaimedFileIndex;
use crate::metrics;
use crate::recycle::{RecycleBin, RecycleReason};
use crate::snapshot::Snapshot;
use crate::torrent_client::{call_with_timeout, TorrentRecord};

struct Target<'s> {
    torrent: &'s TorrentRecord,
    wants_files: bool,
}

/// Delete every torrent carrying one of the configured deletion tags.
///
/// References of deleted torrents are retired from `index`, so the orphan
/// scan that follows sees the post-deletion state. In dry-run the index is
/// left untouched.
pub(crate) async fn run(
    ctx: &StageContext<'_>,
    snapshot: &Snapshot,
    index: &mut ClaimedFileIndex,
    cache: &RunCache,
    tags: &TagState,
) -> StageReport {
    let config = &ctx.config.deletion;
    let mut report = StageReport::new(Stage::Deletion);
    report.scanned = snapshot.torrents.len();

    let targets: Vec<Target<'_>> = snapshot
        .torrents
        .iter()
        .filter_map(|torrent| {
            let tag = tags.first_of(torrent.hash(), &config.tags)?;
            Some(Target {
                torrent,
                wants_files: config.deletes_files_for(tag),
            })
        })
        .collect();
    report.matched = targets.len();
    if targets.is_empty() {
        return report;
    }

    let mut preview;
    let index = if ctx.dry_run {
        preview = index.clone();
        &mut preview
    } else {
        index
    };

    match ctx.recycle {
        Some(bin) => delete_into_recycle_bin(ctx, bin, &targets, index, cache, &mut report).await,
        None => delete_in_place(ctx, &targets, index, cache, &mut report).await,
    }

    info!(
        matched = report.matched,
        calls = report.grouped_calls,
        moved = report.moved,
        bytes = report.bytes,
        "Deletion finished"
    );
    report
}

/// Remove the torrents remotely without their data, then recycle the files
/// nothing references anymore.
async fn delete_into_recycle_bin(
    ctx: &StageContext<'_>,
    bin: &RecycleBin,
    targets: &[Target<'_>],
    index: &mut ClaimedFileIndex,
    cache: &RunCache,
    report: &mut StageReport,
) {
    if ctx.cancel.is_cancelled() {
        return;
    }
    let hashes: Vec<String> = targets.iter().map(|t| t.torrent.hash().to_string()).collect();
    report.grouped_calls += 1;

    if ctx.dry_run {
        info!(torrents = hashes.len(), "Would delete torrents, keeping files");
    } else {
        let result = call_with_timeout(
            "delete_torrents",
            ctx.timeout,
            ctx.client.delete_torrents(&hashes, false),
        )
        .await;
        if let Err(e) = result {
            warn!(torrents = hashes.len(), error = %e, "Failed to delete torrents");
            report.record_error(hashes.len(), format!("delete_torrents: {}", e));
            return;
        }
        metrics::TORRENTS_DELETED.inc_by(hashes.len() as u64);
        cache.invalidate_remote();
        info!(torrents = hashes.len(), "Deleted torrents, keeping files");
    }

    for target in targets {
        if ctx.cancel.is_cancelled() {
            return;
        }
        let (held_elsewhere, freed): (Vec<PathBuf>, Vec<PathBuf>) = index
            .retire(target.torrent.hash())
            .into_iter()
            .partition(|path| index.has_unknown_holder(path));
        if target.wants_files && !held_elsewhere.is_empty() {
            warn!(
                hash = target.torrent.hash(),
                files = held_elsewhere.len(),
                "Keeping files under the save path of a torrent with unknown files"
            );
        }
        if !target.wants_files || freed.is_empty() {
            continue;
        }
        ctx.recycle_files(
            bin,
            &freed,
            target.torrent.category(),
            RecycleReason::Unregistered,
            report,
        )
        .await;
    }
}

/// Remove the torrents remotely, letting the client delete data only for
/// torrents that are the sole owner of every file.
async fn delete_in_place(
    ctx: &StageContext<'_>,
    targets: &[Target<'_>],
    index: &mut ClaimedFileIndex,
    cache: &RunCache,
    report: &mut StageReport,
) {
    let decisions: Vec<(&Target<'_>, bool)> = targets
        .iter()
        .map(|t| (t, t.wants_files && owns_all_files(index, t.torrent.hash())))
        .collect();
    let groups = group_by(decisions, |(_, delete_files)| *delete_files)
        .map_items(|(target, _)| target.torrent.hash().to_string());

    for (delete_files, hashes) in groups {
        if ctx.cancel.is_cancelled() {
            return;
        }
        report.grouped_calls += 1;

        if ctx.dry_run {
            info!(torrents = hashes.len(), delete_files, "Would delete torrents");
        } else {
            let result = call_with_timeout(
                "delete_torrents",
                ctx.timeout,
                ctx.client.delete_torrents(&hashes, delete_files),
            )
            .await;
            if let Err(e) = result {
                warn!(torrents = hashes.len(), delete_files, error = %e, "Failed to delete torrents");
                report.record_error(hashes.len(), format!("delete_torrents: {}", e));
                continue;
            }
            metrics::TORRENTS_DELETED.inc_by(hashes.len() as u64);
            cache.invalidate_remote();
            info!(torrents = hashes.len(), delete_files, "Deleted torrents");
        }

        for hash in &hashes {
            let sizes: Vec<u64> = index
                .files_of(hash)
                .iter()
                .filter_map(|p| index.size_of(p))
                .collect();
            index.retire(hash);
            if delete_files {
                report.bytes += sizes.iter().sum::<u64>();
            }
        }
    }
}

/// Whether the client may delete the torrent's data: no other torrent,
/// known or not, can be referencing any of its files.
fn owns_all_files(index: &ClaimedFileIndex, hash: &str) -> bool {
    if !index.exclusively_owned(hash) {
        return false;
    }
    if index.may_share_with_unknown(hash) {
        warn!(hash, "Keeping data, a torrent with unknown files shares its save path");
        return false;
    }
    true
}

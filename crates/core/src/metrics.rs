//! Prometheus metrics for a reconciliation run.
//!
//! Counters cover:
//! - Remote torrent client calls
//! - The TTL cache
//! - Orphan detection and the recycle bin
//! - Tagging and deletion stages

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Torrent client
// =============================================================================

/// Remote calls by operation and result.
pub static REMOTE_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "qbit_reconcile_remote_calls_total",
            "Total torrent client calls",
        ),
        &["operation", "result"], // result: "success", "error", "timeout"
    )
    .unwrap()
});

/// Remote call duration in seconds.
pub static REMOTE_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "qbit_reconcile_remote_call_duration_seconds",
            "Duration of torrent client calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .unwrap()
});

// =============================================================================
// Cache
// =============================================================================

/// Cache lookups by result.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qbit_reconcile_cache_lookups_total", "Total cache lookups"),
        &["result"], // "hit", "miss"
    )
    .unwrap()
});

// =============================================================================
// Filesystem
// =============================================================================

/// Files examined by the orphan scanner.
pub static FILES_SCANNED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "qbit_reconcile_files_scanned_total",
        "Total files examined by the orphan scanner",
    )
    .unwrap()
});

/// Orphaned files found in the last run.
pub static ORPHANS_FOUND: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "qbit_reconcile_orphans_found",
        "Orphaned files found in the last run",
    )
    .unwrap()
});

/// Files moved into the recycle bin by reason.
pub static FILES_RECYCLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "qbit_reconcile_files_recycled_total",
            "Total files moved to the recycle bin",
        ),
        &["reason"], // "orphaned", "unregistered"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Torrents tagged, by tag.
pub static TORRENTS_TAGGED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qbit_reconcile_torrents_tagged_total", "Total torrents tagged"),
        &["tag"],
    )
    .unwrap()
});

/// Torrents deleted from the client.
pub static TORRENTS_DELETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "qbit_reconcile_torrents_deleted_total",
        "Total torrents deleted from the client",
    )
    .unwrap()
});

/// Runs by outcome.
pub static RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qbit_reconcile_runs_total", "Total reconciliation runs"),
        &["outcome"], // "success", "partial", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(REMOTE_CALLS.clone()),
        Box::new(REMOTE_CALL_DURATION.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(FILES_SCANNED.clone()),
        Box::new(ORPHANS_FOUND.clone()),
        Box::new(FILES_RECYCLED.clone()),
        Box::new(TORRENTS_TAGGED.clone()),
        Box::new(TORRENTS_DELETED.clone()),
        Box::new(RUNS.clone()),
    ]
}

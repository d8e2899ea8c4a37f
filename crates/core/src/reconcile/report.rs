//! Per-stage results and the run summary.

use std::fmt::Write;

use serde::Serialize;

use crate::cache::CacheStats;

const WARN_DELETIONS: usize = 20;
const WARN_ORPHANS: usize = 50;
const WARN_BYTES: u64 = 50 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unregistered,
    TrackerTags,
    CrossSeed,
    Age,
    Deletion,
    Orphans,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unregistered => "unregistered",
            Stage::TrackerTags => "tracker_tags",
            Stage::CrossSeed => "cross_seed",
            Stage::Age => "age",
            Stage::Deletion => "deletion",
            Stage::Orphans => "orphans",
        }
    }
}

/// Counts produced by one stage.
///
/// The same numbers come out of a dry run; only `moved` and the remote
/// calls are then hypothetical.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Items examined (torrents or files).
    pub scanned: usize,
    pub claimed: usize,
    pub excluded: usize,
    pub orphaned: usize,
    /// Items the stage decided to act on.
    pub matched: usize,
    /// Remote calls issued (or that would be issued).
    pub grouped_calls: usize,
    pub moved: usize,
    pub errored: usize,
    /// Bytes freed (or that would be freed).
    pub bytes: u64,
    pub errors: Vec<String>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            scanned: 0,
            claimed: 0,
            excluded: 0,
            orphaned: 0,
            matched: 0,
            grouped_calls: 0,
            moved: 0,
            errored: 0,
            bytes: 0,
            errors: Vec::new(),
        }
    }

    /// Count `count` failed items with one message.
    pub fn record_error(&mut self, count: usize, message: impl Into<String>) {
        self.errored += count;
        self.errors.push(message.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No errors.
    Success,
    /// Some per-item errors, or the run was cancelled.
    Partial,
    /// A fatal error prevented any work.
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failed => "failed",
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Partial => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dry_run: bool,
    pub outcome: RunOutcome,
    pub cancelled: bool,
    /// The error that stopped the run, if any.
    pub fatal: Option<String>,
    pub torrents: usize,
    /// Torrents dropped from the snapshot.
    pub snapshot_errors: Vec<String>,
    /// Save paths that could not be resolved.
    pub integrity_warnings: Vec<String>,
    pub stages: Vec<StageReport>,
    pub cache: CacheStats,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: run_id.into(),
            dry_run,
            outcome: RunOutcome::Success,
            cancelled: false,
            fatal: None,
            torrents: 0,
            snapshot_errors: Vec::new(),
            integrity_warnings: Vec::new(),
            stages: Vec::new(),
            cache: CacheStats::default(),
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn total_errors(&self) -> usize {
        self.snapshot_errors.len() + self.stages.iter().map(|s| s.errored).sum::<usize>()
    }

    /// Derive the outcome from what was recorded.
    pub fn finish(&mut self) {
        self.outcome = if self.fatal.is_some() {
            RunOutcome::Failed
        } else if self.cancelled || self.total_errors() > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        };
    }

    /// Large-impact warnings for the operator.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(deletion) = self.stage(Stage::Deletion) {
            if deletion.matched > WARN_DELETIONS {
                warnings.push(format!(
                    "{} torrents deleted (more than {})",
                    deletion.matched, WARN_DELETIONS
                ));
            }
        }
        if let Some(orphans) = self.stage(Stage::Orphans) {
            if orphans.orphaned > WARN_ORPHANS {
                warnings.push(format!(
                    "{} orphaned files (more than {})",
                    orphans.orphaned, WARN_ORPHANS
                ));
            }
        }
        let bytes: u64 = self.stages.iter().map(|s| s.bytes).sum();
        if bytes > WARN_BYTES {
            warnings.push(format!(
                "{} to be freed (more than {})",
                format_bytes(bytes),
                format_bytes(WARN_BYTES)
            ));
        }
        warnings
    }

    /// Human readable summary, also used as the dry-run preview.
    pub fn format_summary(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let _ = writeln!(
            out,
            "Run {}{}: {} - {} torrents",
            self.run_id,
            mode,
            self.outcome.as_str(),
            self.torrents
        );
        if let Some(fatal) = &self.fatal {
            let _ = writeln!(out, "  fatal: {}", fatal);
        }
        if self.cancelled {
            let _ = writeln!(out, "  cancelled before completion");
        }
        for stage in &self.stages {
            let _ = writeln!(
                out,
                "  {:<13} scanned={} matched={} calls={} claimed={} excluded={} orphaned={} moved={} errored={} bytes={}",
                stage.stage.as_str(),
                stage.scanned,
                stage.matched,
                stage.grouped_calls,
                stage.claimed,
                stage.excluded,
                stage.orphaned,
                stage.moved,
                stage.errored,
                format_bytes(stage.bytes),
            );
        }
        if !self.snapshot_errors.is_empty() {
            let _ = writeln!(out, "  {} torrents skipped", self.snapshot_errors.len());
        }
        if !self.integrity_warnings.is_empty() {
            let _ = writeln!(
                out,
                "  {} save paths unresolved",
                self.integrity_warnings.len()
            );
        }
        let _ = writeln!(
            out,
            "  cache: {} hits, {} misses ({:.1}%)",
            self.cache.hits,
            self.cache.misses,
            self.cache.hit_rate()
        );
        for warning in self.warnings() {
            let _ = writeln!(out, "  WARNING: {}", warning);
        }
        out
    }
}

/// Format bytes using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

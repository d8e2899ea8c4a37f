//! Reconciliation stages and the runner that sequences them.
//!
//! A run fetches one snapshot of the client's torrents, builds the claimed
//! file index from it and then applies, in order: unregistered tagging,
//! tracker tagging, cross-seed tagging, age tagging, deletion and the orphan
//! scan. Every stage returns a [`StageReport`]; the run returns a
//! [`RunSummary`].

mod cancel;
mod context;
mod deletion;
mod orphans;
mod report;
mod runner;
mod tagging;
mod trackers;
mod unregistered;

pub use cancel::CancelFlag;
pub use report::{format_bytes, RunOutcome, RunSummary, Stage, StageReport};
pub use runner::Reconciler;
pub use tagging::age_bucket;
pub use trackers::TrackerMatcher;
pub use unregistered::{assess_trackers, TrackerVerdict};

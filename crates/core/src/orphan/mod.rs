//! Orphan detection: files on disk that no torrent claims.

mod rules;
mod scanner;

pub use rules::ExclusionRules;
pub use scanner::{scan, CandidateState, OrphanCandidate, ScanReport};

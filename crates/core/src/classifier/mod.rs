//! Tracker message classification.
//!
//! Rules are compiled once per run into an exact-match set and an ordered
//! prefix list, then every tracker message of every torrent is checked
//! against the compiled form.

mod rules;

pub use rules::{PatternError, PatternRuleSet, RuleMatch, PREFIX_MARKER};

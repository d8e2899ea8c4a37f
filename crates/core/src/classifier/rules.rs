use std::collections::HashSet;

use thiserror::Error;

/// Marker that turns a rule into a prefix rule.
pub const PREFIX_MARKER: &str = "starts_with:";

/// Errors raised while compiling pattern rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("rule #{index} is empty")]
    EmptyRule { index: usize },

    #[error("rule #{index} ('{rule}') has an empty prefix")]
    EmptyPrefix { index: usize, rule: String },

    #[error("rule #{index} ('{rule}') would match every tracker message")]
    MatchesEverything { index: usize, rule: String },
}

/// Which rule a message matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch<'a> {
    Exact,
    Prefix(&'a str),
}

/// Compiled unregistered-message rules.
///
/// Matching is case-sensitive: tracker messages are exact external strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternRuleSet {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl PatternRuleSet {
    /// Compile an ordered list of rules.
    ///
    /// Rules starting with [`PREFIX_MARKER`] become prefix rules, everything
    /// else is an exact rule. Empty rules and rules made only of `*` are
    /// rejected.
    pub fn compile<S: AsRef<str>>(rules: &[S]) -> Result<Self, PatternError> {
        let mut exact = HashSet::new();
        let mut prefixes: Vec<String> = Vec::new();

        for (index, rule) in rules.iter().enumerate() {
            let rule = rule.as_ref();
            match rule.strip_prefix(PREFIX_MARKER) {
                Some(prefix) => {
                    if prefix.trim().is_empty() {
                        return Err(PatternError::EmptyPrefix {
                            index,
                            rule: rule.to_string(),
                        });
                    }
                    if is_wildcard(prefix) {
                        return Err(PatternError::MatchesEverything {
                            index,
                            rule: rule.to_string(),
                        });
                    }
                    if !prefixes.iter().any(|p| p == prefix) {
                        prefixes.push(prefix.to_string());
                    }
                }
                None => {
                    if rule.is_empty() {
                        return Err(PatternError::EmptyRule { index });
                    }
                    if is_wildcard(rule) {
                        return Err(PatternError::MatchesEverything {
                            index,
                            rule: rule.to_string(),
                        });
                    }
                    exact.insert(rule.to_string());
                }
            }
        }

        Ok(Self { exact, prefixes })
    }

    /// Whether `message` is an unregistered message.
    pub fn classify(&self, message: &str) -> bool {
        self.find_match(message).is_some()
    }

    /// Exact rules first, then prefixes in configured order; first match wins.
    pub fn find_match(&self, message: &str) -> Option<RuleMatch<'_>> {
        if self.exact.contains(message) {
            return Some(RuleMatch::Exact);
        }
        self.prefixes
            .iter()
            .find(|prefix| message.starts_with(prefix.as_str()))
            .map(|prefix| RuleMatch::Prefix(prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }

    pub fn exact_count(&self) -> usize {
        self.exact.len()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

fn is_wildcard(rule: &str) -> bool {
    let trimmed = rule.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '*')
}

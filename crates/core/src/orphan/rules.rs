//! Compiled exclusion rules for the orphan scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::config::ConfigError;

/// File patterns that match every file.
const MATCH_ALL_PATTERNS: &[&str] = &["*", "*.*", "**/*", "**"];

/// Exclusions split into literal lookups and compiled glob sets.
///
/// File rules match either the file name or the full path. Directory rules
/// must be absolute; a matching directory is pruned with everything below
/// it.
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    literal_files: HashSet<String>,
    file_globs: GlobSet,
    literal_dirs: Vec<PathBuf>,
    dir_globs: GlobSet,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            literal_files: HashSet::new(),
            file_globs: GlobSet::empty(),
            literal_dirs: Vec::new(),
            dir_globs: GlobSet::empty(),
        }
    }
}

fn is_glob(rule: &str) -> bool {
    rule.contains(['*', '?', '[', '{'])
}

fn invalid_pattern(pattern: &str, e: globset::Error) -> ConfigError {
    ConfigError::InvalidExcludePattern {
        pattern: pattern.to_string(),
        reason: e.kind().to_string(),
    }
}

fn compile_glob(pattern: &str) -> Result<Glob, ConfigError> {
    Glob::new(pattern).map_err(|e| invalid_pattern(pattern, e))
}

/// Directory globs match one path component per `*`.
fn compile_dir_glob(pattern: &str) -> Result<Glob, ConfigError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| invalid_pattern(pattern, e))
}

/// Add `dir` and, when it exists under another name, its canonical form.
/// Scan roots are canonicalized, so a rule written through a symlink would
/// otherwise never match.
fn push_dir(dirs: &mut Vec<PathBuf>, dir: PathBuf) {
    if let Ok(canonical) = std::fs::canonicalize(&dir) {
        if canonical != dir && !dirs.contains(&canonical) {
            dirs.push(canonical);
        }
    }
    if !dirs.contains(&dir) {
        dirs.push(dir);
    }
}

fn build_set(globs: Vec<Glob>) -> Result<GlobSet, ConfigError> {
    globs
        .into_iter()
        .fold(&mut GlobSetBuilder::new(), |builder, glob| builder.add(glob))
        .build()
        .map_err(|e| ConfigError::InvalidExcludePattern {
            pattern: e.glob().unwrap_or_default().to_string(),
            reason: e.kind().to_string(),
        })
}

impl ExclusionRules {
    pub fn compile<S: AsRef<str>>(
        exclude_files: &[S],
        exclude_dirs: &[S],
    ) -> Result<Self, ConfigError> {
        let mut literal_files = HashSet::new();
        let mut file_globs = Vec::new();
        for rule in exclude_files.iter().map(AsRef::as_ref) {
            let rule = rule.trim();
            if rule.is_empty() {
                return Err(ConfigError::InvalidExcludePattern {
                    pattern: rule.to_string(),
                    reason: "empty pattern".to_string(),
                });
            }
            if MATCH_ALL_PATTERNS.contains(&rule) {
                warn!(pattern = rule, "Exclude pattern matches every file");
            }
            if is_glob(rule) {
                file_globs.push(compile_glob(rule)?);
            } else {
                literal_files.insert(rule.to_string());
            }
        }

        let mut literal_dirs = Vec::new();
        let mut dir_globs = Vec::new();
        for rule in exclude_dirs.iter().map(AsRef::as_ref) {
            let rule = rule.trim();
            if !Path::new(rule).is_absolute() {
                return Err(ConfigError::RelativeExcludeDir(rule.to_string()));
            }
            if is_glob(rule) {
                dir_globs.push(compile_dir_glob(rule.trim_end_matches('/'))?);
            } else {
                push_dir(&mut literal_dirs, PathBuf::from(rule));
            }
        }

        Ok(Self {
            literal_files,
            file_globs: build_set(file_globs)?,
            literal_dirs,
            dir_globs: build_set(dir_globs)?,
        })
    }

    /// Also prune `dir` (used for the recycle bin root).
    pub fn with_excluded_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        push_dir(&mut self.literal_dirs, dir.into());
        self
    }

    pub fn is_excluded_file(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy());
        if let Some(name) = &name {
            if self.literal_files.contains(name.as_ref()) {
                return true;
            }
        }
        if self
            .literal_files
            .contains(path.to_string_lossy().as_ref())
        {
            return true;
        }
        if self.file_globs.is_empty() {
            return false;
        }
        self.file_globs.is_match(path)
            || name.is_some_and(|name| self.file_globs.is_match(name.as_ref()))
    }

    pub fn is_excluded_dir(&self, path: &Path) -> bool {
        self.literal_dirs.iter().any(|dir| path.starts_with(dir))
            || (!self.dir_globs.is_empty() && self.dir_globs.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.literal_files.is_empty()
            && self.file_globs.is_empty()
            && self.literal_dirs.is_empty()
            && self.dir_globs.is_empty()
    }
}

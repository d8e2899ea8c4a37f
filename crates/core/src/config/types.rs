use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Compute everything but skip remote mutations and file moves.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    pub client: ClientConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub unregistered: UnregisteredConfig,
    #[serde(default)]
    pub deletion: DeletionConfig,
    #[serde(default)]
    pub orphans: OrphansConfig,
    #[serde(default)]
    pub recycle_bin: Option<RecycleBinConfig>,
    /// Tracker key (matched against the announce host) to tag/limits.
    #[serde(default)]
    pub tracker_tags: BTreeMap<String, TrackerTagConfig>,
    #[serde(default)]
    pub cross_seed_tagging: CrossSeedTaggingConfig,
    #[serde(default)]
    pub age_tagging: AgeTaggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_true() -> bool {
    true
}

/// qBittorrent Web API connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Web UI URL (e.g., "http://localhost:8080")
    pub url: String,
    pub username: String,
    pub password: String,
    /// Per-call timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// TTL cache tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Sweep expired entries after this many accesses.
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
    /// Sweep expired entries after this many seconds.
    #[serde(default = "default_ttl_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_every: default_sweep_every(),
            sweep_interval_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_every() -> u64 {
    100
}

/// Unregistered tracker message handling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnregisteredConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Exact messages, or `starts_with:<prefix>` rules.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_unregistered_tag")]
    pub default_tag: String,
    #[serde(default = "default_cross_seeding_tag")]
    pub cross_seeding_tag: String,
    #[serde(default = "default_other_issues_tag")]
    pub other_issues_tag: String,
    /// Not-working messages that are never reported as issues.
    #[serde(default = "default_ignored_messages")]
    pub ignored_messages: Vec<String>,
}

impl Default for UnregisteredConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
            default_tag: default_unregistered_tag(),
            cross_seeding_tag: default_cross_seeding_tag(),
            other_issues_tag: default_other_issues_tag(),
            ignored_messages: default_ignored_messages(),
        }
    }
}

fn default_unregistered_tag() -> String {
    "unregistered".to_string()
}

fn default_cross_seeding_tag() -> String {
    "unregistered:crossseeding".to_string()
}

fn default_other_issues_tag() -> String {
    "issue".to_string()
}

fn default_ignored_messages() -> Vec<String> {
    vec!["This torrent is private".to_string()]
}

/// Deletion of torrents carrying specific tags
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeletionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Per tag: whether content files go too.
    #[serde(default)]
    pub delete_files: BTreeMap<String, bool>,
}

impl DeletionConfig {
    /// Whether deleting a torrent because of `tag` should also remove its files.
    pub fn deletes_files_for(&self, tag: &str) -> bool {
        self.delete_files.get(tag).copied().unwrap_or(false)
    }
}

/// Orphaned file detection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrphansConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Extra absolute roots scanned alongside the torrents' save paths.
    #[serde(default)]
    pub scan_dirs: Vec<PathBuf>,
    /// File name or path globs (`*.!qB`) and literal names.
    #[serde(default)]
    pub exclude_files: Vec<String>,
    /// Absolute directories or directory globs.
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub move_to_recycle_bin: bool,
    /// Upper bound for walking one scan root, in seconds (default: 600)
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
}

impl Default for OrphansConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_dirs: Vec::new(),
            exclude_files: Vec::new(),
            exclude_dirs: Vec::new(),
            move_to_recycle_bin: false,
            scan_timeout_secs: default_scan_timeout_secs(),
        }
    }
}

fn default_scan_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecycleBinConfig {
    pub path: PathBuf,
}

/// Per-tracker tag and share limits
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TrackerTagConfig {
    #[serde(default)]
    pub tag: Option<String>,
    /// Minutes; -2 = global, -1 = unlimited.
    #[serde(default)]
    pub seed_time_limit: Option<i64>,
    /// -2 = global, -1 = unlimited.
    #[serde(default)]
    pub seed_ratio_limit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrossSeedTaggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cross_seed_tag")]
    pub tag: String,
    #[serde(default = "default_unique_tag")]
    pub unique_tag: String,
}

impl Default for CrossSeedTaggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tag: default_cross_seed_tag(),
            unique_tag: default_unique_tag(),
        }
    }
}

fn default_cross_seed_tag() -> String {
    "cross-seed".to_string()
}

fn default_unique_tag() -> String {
    "not-cross-seeding".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgeTaggingConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prometheus text file written at the end of each run.
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[client]
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"
"#;

    #[test]
    fn test_deserialize_minimal_config_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.client.timeout_secs, 30);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.sweep_every, 100);
        assert!(config.unregistered.enabled);
        assert_eq!(config.unregistered.default_tag, "unregistered");
        assert_eq!(
            config.unregistered.cross_seeding_tag,
            "unregistered:crossseeding"
        );
        assert_eq!(config.unregistered.other_issues_tag, "issue");
        assert_eq!(
            config.unregistered.ignored_messages,
            vec!["This torrent is private".to_string()]
        );
        assert!(!config.deletion.enabled);
        assert!(!config.orphans.enabled);
        assert_eq!(config.orphans.scan_timeout_secs, 600);
        assert!(config.recycle_bin.is_none());
        assert!(config.tracker_tags.is_empty());
        assert_eq!(config.cross_seed_tagging.tag, "cross-seed");
        assert!(config.metrics.textfile_path.is_none());
    }

    #[test]
    fn test_deserialize_missing_client_fails() {
        let result: Result<Config, _> = toml::from_str("dry_run = false");
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
dry_run = false

[client]
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"

[unregistered]
patterns = ["Unregistered torrent", "starts_with:Trump"]

[deletion]
enabled = true
tags = ["unregistered"]
delete_files = { unregistered = true }

[orphans]
enabled = true
exclude_files = ["*.!qB", "*_unpackerred"]
exclude_dirs = ["/data/torrents/temp/"]
move_to_recycle_bin = true

[recycle_bin]
path = "/data/recycle"

[tracker_tags.aither]
tag = "AITHER"
seed_time_limit = 100
seed_ratio_limit = 1.0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(!config.dry_run);
        assert_eq!(config.unregistered.patterns.len(), 2);
        assert!(config.deletion.deletes_files_for("unregistered"));
        assert!(!config.deletion.deletes_files_for("issue"));
        assert_eq!(
            config.recycle_bin.unwrap().path,
            PathBuf::from("/data/recycle")
        );
        let aither = &config.tracker_tags["aither"];
        assert_eq!(aither.tag.as_deref(), Some("AITHER"));
        assert_eq!(aither.seed_time_limit, Some(100));
        assert_eq!(aither.seed_ratio_limit, Some(1.0));
    }
}

//! Types for torrent client operations.

use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheScope;
use crate::metrics;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Clone, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,
}

impl TorrentClientError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TorrentClientError::Timeout | TorrentClientError::ConnectionFailed(_)
        )
    }
}

/// Tracker status as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Disabled,
    NotContacted,
    Working,
    Updating,
    NotWorking,
    Unknown,
}

impl TrackerStatus {
    /// Map a qBittorrent status code (0..=4).
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => TrackerStatus::Disabled,
            1 => TrackerStatus::NotContacted,
            2 => TrackerStatus::Working,
            3 => TrackerStatus::Updating,
            4 => TrackerStatus::NotWorking,
            _ => TrackerStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerStatus::Disabled => "disabled",
            TrackerStatus::NotContacted => "not_contacted",
            TrackerStatus::Working => "working",
            TrackerStatus::Updating => "updating",
            TrackerStatus::NotWorking => "not_working",
            TrackerStatus::Unknown => "unknown",
        }
    }
}

/// One tracker entry of a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub url: String,
    pub status: TrackerStatus,
    pub message: String,
}

impl Tracker {
    pub fn new(url: impl Into<String>, status: TrackerStatus, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// DHT, PeX and LSD show up as `** [DHT] **` style entries.
    pub fn is_pseudo(&self) -> bool {
        self.url.starts_with("** [")
    }
}

/// A content file, relative to the torrent's save path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFile {
    pub name: String,
    pub size: u64,
}

impl ContentFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Torrent metadata as returned by the list call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Info hash (lowercase hex).
    pub hash: String,
    pub name: String,
    /// Empty when uncategorized.
    pub category: String,
    pub save_path: String,
    pub tags: Vec<String>,
    pub size_bytes: u64,
    pub ratio: f64,
    pub seeding_time_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Immutable view of one torrent for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    pub info: TorrentInfo,
    pub files: Vec<ContentFile>,
    pub trackers: Vec<Tracker>,
}

impl TorrentRecord {
    pub fn hash(&self) -> &str {
        &self.info.hash
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.info.tags.iter().any(|t| t == tag)
    }

    /// Category, or `None` when the torrent is uncategorized.
    pub fn category(&self) -> Option<&str> {
        let category = self.info.category.trim();
        (!category.is_empty()).then_some(category)
    }
}

/// Ratio limit with bitwise equality so it can be used as a grouping key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatioLimit(pub f64);

impl PartialEq for RatioLimit {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for RatioLimit {}

impl Hash for RatioLimit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Share limits applied in one `set_share_limits` call.
///
/// `-2` means "use the global limit", `-1` means "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareLimits {
    pub seeding_time_minutes: i64,
    pub ratio: RatioLimit,
}

impl ShareLimits {
    pub const USE_GLOBAL: i64 = -2;

    pub fn new(seeding_time_minutes: Option<i64>, ratio: Option<f64>) -> Self {
        Self {
            seeding_time_minutes: seeding_time_minutes.unwrap_or(Self::USE_GLOBAL),
            ratio: RatioLimit(ratio.unwrap_or(Self::USE_GLOBAL as f64)),
        }
    }

    pub fn is_global(&self) -> bool {
        self.seeding_time_minutes == Self::USE_GLOBAL
            && self.ratio == RatioLimit(Self::USE_GLOBAL as f64)
    }
}

/// Capability set the reconciliation engine needs from a torrent client.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Identity of the connection. Cache entries are scoped by it.
    fn identity(&self) -> CacheScope;

    /// List all torrents.
    async fn list_torrents(&self) -> Result<Vec<TorrentInfo>, TorrentClientError>;

    /// Content files of one torrent.
    async fn torrent_files(&self, hash: &str) -> Result<Vec<ContentFile>, TorrentClientError>;

    /// Trackers of one torrent.
    async fn torrent_trackers(&self, hash: &str) -> Result<Vec<Tracker>, TorrentClientError>;

    /// Add tags to every torrent in `hashes`.
    async fn add_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError>;

    /// Apply share limits to every torrent in `hashes`.
    async fn set_share_limits(
        &self,
        hashes: &[String],
        limits: ShareLimits,
    ) -> Result<(), TorrentClientError>;

    /// Remove torrents. If `delete_files` is true the client also deletes
    /// their data.
    async fn delete_torrents(
        &self,
        hashes: &[String],
        delete_files: bool,
    ) -> Result<(), TorrentClientError>;
}

/// Bound a remote call by `timeout`, mapping expiry to
/// [`TorrentClientError::Timeout`], and record it in the remote call metrics.
pub async fn call_with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, TorrentClientError>
where
    F: Future<Output = Result<T, TorrentClientError>>,
{
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TorrentClientError::Timeout),
    };

    let outcome = match &result {
        Ok(_) => "success",
        Err(TorrentClientError::Timeout) => "timeout",
        Err(_) => "error",
    };
    metrics::REMOTE_CALLS
        .with_label_values(&[operation, outcome])
        .inc();
    metrics::REMOTE_CALL_DURATION
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_status_from_code() {
        assert_eq!(TrackerStatus::from_code(0), TrackerStatus::Disabled);
        assert_eq!(TrackerStatus::from_code(2), TrackerStatus::Working);
        assert_eq!(TrackerStatus::from_code(4), TrackerStatus::NotWorking);
        assert_eq!(TrackerStatus::from_code(9), TrackerStatus::Unknown);
        assert_eq!(TrackerStatus::NotWorking.as_str(), "not_working");
    }

    #[test]
    fn test_pseudo_trackers() {
        assert!(Tracker::new("** [DHT] **", TrackerStatus::Working, "").is_pseudo());
        assert!(!Tracker::new("https://t.example/announce", TrackerStatus::Working, "").is_pseudo());
    }

    #[test]
    fn test_share_limits_defaults_to_global() {
        let limits = ShareLimits::new(None, None);
        assert!(limits.is_global());
        assert_eq!(limits.seeding_time_minutes, -2);

        let limits = ShareLimits::new(Some(1440), None);
        assert!(!limits.is_global());
    }

    #[test]
    fn test_share_limits_usable_as_key() {
        use std::collections::HashSet;
        let mut keys = HashSet::new();
        keys.insert(ShareLimits::new(Some(60), Some(1.5)));
        keys.insert(ShareLimits::new(Some(60), Some(1.5)));
        keys.insert(ShareLimits::new(Some(60), Some(2.0)));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_error_retryable() {
        assert!(TorrentClientError::Timeout.is_retryable());
        assert!(TorrentClientError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!TorrentClientError::AuthenticationFailed("bad".into()).is_retryable());
        assert!(!TorrentClientError::MalformedResponse("eof".into()).is_retryable());
    }

    #[test]
    fn test_record_category() {
        let mut record = TorrentRecord {
            info: TorrentInfo {
                hash: "abc".into(),
                name: "n".into(),
                category: "  ".into(),
                save_path: "/data".into(),
                tags: vec!["keep".into()],
                size_bytes: 0,
                ratio: 0.0,
                seeding_time_secs: 0,
                completed_at: None,
            },
            files: vec![],
            trackers: vec![],
        };
        assert_eq!(record.category(), None);
        assert!(record.has_tag("keep"));
        record.info.category = "movies".into();
        assert_eq!(record.category(), Some("movies"));
    }

    #[tokio::test]
    async fn test_call_with_timeout_elapses() {
        let result: Result<(), _> = call_with_timeout("test_op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TorrentClientError::Timeout)));
    }

    #[tokio::test]
    async fn test_call_with_timeout_passes_result() {
        let result = call_with_timeout("test_op", Duration::from_secs(1), async {
            Ok::<_, TorrentClientError>(3)
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }
}

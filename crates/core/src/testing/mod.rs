//! Testing utilities: a scriptable torrent client and record fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use reconcile_core::testing::{fixtures, MockTorrentClient};
//!
//! let client = MockTorrentClient::new();
//! client.add_torrent(fixtures::torrent("abc", "/data/movies", &["x.mkv"])).await;
//!
//! // ... run a reconciliation against it ...
//!
//! assert_eq!(client.call_count("add_tags").await, 1);
//! ```

mod mock_torrent_client;

pub use mock_torrent_client::{MockTorrentClient, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::torrent_client::{
        ContentFile, TorrentInfo, TorrentRecord, Tracker, TrackerStatus,
    };

    /// Create a completed, uncategorized torrent with one working tracker.
    pub fn torrent(hash: &str, save_path: &str, files: &[&str]) -> TorrentRecord {
        TorrentRecord {
            info: TorrentInfo {
                hash: hash.to_string(),
                name: format!("torrent-{}", hash),
                category: String::new(),
                save_path: save_path.to_string(),
                tags: Vec::new(),
                size_bytes: files.len() as u64 * 1024,
                ratio: 1.0,
                seeding_time_secs: 3600,
                completed_at: Some(Utc::now() - Duration::days(1)),
            },
            files: files.iter().map(|f| ContentFile::new(*f, 1024)).collect(),
            trackers: vec![working_tracker("https://tracker.example.org/announce")],
        }
    }

    pub fn working_tracker(url: &str) -> Tracker {
        Tracker::new(url, TrackerStatus::Working, "")
    }

    pub fn failing_tracker(url: &str, message: &str) -> Tracker {
        Tracker::new(url, TrackerStatus::NotWorking, message)
    }

    pub fn with_category(mut record: TorrentRecord, category: &str) -> TorrentRecord {
        record.info.category = category.to_string();
        record
    }

    pub fn with_tags(mut record: TorrentRecord, tags: &[&str]) -> TorrentRecord {
        record.info.tags = tags.iter().map(|t| t.to_string()).collect();
        record
    }

    pub fn with_trackers(mut record: TorrentRecord, trackers: Vec<Tracker>) -> TorrentRecord {
        record.trackers = trackers;
        record
    }

    pub fn completed_days_ago(mut record: TorrentRecord, days: i64) -> TorrentRecord {
        record.info.completed_at = Some(Utc::now() - Duration::days(days));
        record
    }

    pub fn incomplete(mut record: TorrentRecord) -> TorrentRecord {
        record.info.completed_at = None;
        record
    }
}

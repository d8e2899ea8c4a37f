//! Mapping of tracker URLs to configured tracker keys.

use std::collections::BTreeMap;

use reqwest::Url;

use crate::config::TrackerTagConfig;
use crate::torrent_client::TorrentRecord;

/// Matches tracker URLs against configured keys, case-insensitively.
///
/// A key matches when it is contained in the URL's host. URLs without a host
/// (DHT/PeX entries, garbage) fall back to a substring match on the whole
/// URL. Keys are tried in sorted order.
#[derive(Debug, Clone, Default)]
pub struct TrackerMatcher {
    entries: Vec<(String, TrackerTagConfig)>,
}

impl TrackerMatcher {
    pub fn new(config: &BTreeMap<String, TrackerTagConfig>) -> Self {
        Self {
            entries: config
                .iter()
                .map(|(key, value)| (key.to_lowercase(), value.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn match_url(&self, url: &str) -> Option<&TrackerTagConfig> {
        if url.is_empty() {
            return None;
        }

        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase));
        let haystack = host.unwrap_or_else(|| url.to_lowercase());

        self.entries
            .iter()
            .find(|(key, _)| haystack.contains(key.as_str()))
            .map(|(_, config)| config)
    }

    /// Configuration of the first of the torrent's trackers that matches.
    pub fn match_torrent(&self, torrent: &TorrentRecord) -> Option<&TrackerTagConfig> {
        torrent
            .trackers
            .iter()
            .find_map(|tracker| self.match_url(&tracker.url))
    }
}

//! qBittorrent Web API v2 binding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::CacheScope;
use crate::config::ClientConfig;

use super::{
    ContentFile, ShareLimits, TorrentClient, TorrentClientError, TorrentInfo, Tracker,
    TrackerStatus,
};

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    client: Client,
    config: ClientConfig,
    /// Set once logged in; cleared when the server answers 403.
    session: Arc<RwLock<Option<String>>>,
}

impl QBittorrentClient {
    pub fn new(config: ClientConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| TorrentClientError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    async fn login(&self) -> Result<(), TorrentClientError> {
        let url = format!("{}/api/v2/auth/login", self.base_url());

        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            // The cookie jar holds the SID
            let mut session = self.session.write().await;
            *session = Some("authenticated".to_string());
            Ok(())
        } else if body.contains("Fails.") || status == StatusCode::FORBIDDEN {
            Err(TorrentClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(TorrentClientError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), TorrentClientError> {
        let session = self.session.read().await;
        if session.is_some() {
            return Ok(());
        }
        drop(session);
        self.login().await
    }

    /// Send a request built by `build`, logging in again once if the session
    /// expired.
    async fn send<F>(&self, build: F) -> Result<String, TorrentClientError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let response = build(&self.client)
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, re-authenticating");
            {
                let mut session = self.session.write().await;
                *session = None;
            }
            self.login().await?;
            build(&self.client)
                .send()
                .await
                .map_err(map_transport_error)?
        } else {
            response
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TorrentClientError::TorrentNotFound(
                response.url().query().unwrap_or_default().to_string(),
            ));
        }
        if !status.is_success() {
            return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| TorrentClientError::MalformedResponse(e.to_string()))
    }

    async fn get(&self, endpoint: &str) -> Result<String, TorrentClientError> {
        let url = format!("{}{}", self.base_url(), endpoint);
        self.send(|client| client.get(&url)).await
    }

    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TorrentClientError> {
        let url = format!("{}{}", self.base_url(), endpoint);
        self.send(|client| client.post(&url).form(params)).await
    }
}

fn map_transport_error(e: reqwest::Error) -> TorrentClientError {
    if e.is_timeout() {
        TorrentClientError::Timeout
    } else if e.is_connect() {
        TorrentClientError::ConnectionFailed(e.to_string())
    } else {
        TorrentClientError::ApiError(e.to_string())
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, TorrentClientError> {
    serde_json::from_str(body)
        .map_err(|e| TorrentClientError::MalformedResponse(format!("Failed to parse response: {}", e)))
}

/// qBittorrent encodes multi-hash arguments with `|`.
fn join_hashes(hashes: &[String]) -> String {
    hashes
        .iter()
        .map(|h| h.to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

/// `/torrents/info` entry.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    name: String,
    #[serde(default)]
    category: String,
    save_path: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    seeding_time: i64,
    #[serde(default)]
    completion_on: i64,
}

impl QBTorrentInfo {
    fn into_torrent_info(self) -> TorrentInfo {
        TorrentInfo {
            hash: self.hash.to_lowercase(),
            name: self.name,
            category: self.category,
            save_path: self.save_path,
            tags: parse_tags(&self.tags),
            size_bytes: self.size.max(0) as u64,
            ratio: self.ratio,
            seeding_time_secs: self.seeding_time.max(0) as u64,
            completed_at: timestamp_to_datetime(self.completion_on),
        }
    }
}

/// `/torrents/files` entry.
#[derive(Debug, Deserialize)]
struct QBContentFile {
    name: String,
    #[serde(default)]
    size: i64,
}

/// `/torrents/trackers` entry.
#[derive(Debug, Deserialize)]
struct QBTracker {
    url: String,
    status: i64,
    #[serde(default)]
    msg: String,
}

/// Tags come back as one comma separated string.
fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Convert Unix timestamp to DateTime<Utc>.
fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    fn identity(&self) -> CacheScope {
        CacheScope::new(format!(
            "qbittorrent:{}@{}",
            self.config.username,
            self.base_url()
        ))
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentInfo>, TorrentClientError> {
        let response = self.get("/api/v2/torrents/info").await?;
        let torrents: Vec<QBTorrentInfo> = parse_json(&response)?;
        Ok(torrents.into_iter().map(|t| t.into_torrent_info()).collect())
    }

    async fn torrent_files(&self, hash: &str) -> Result<Vec<ContentFile>, TorrentClientError> {
        let endpoint = format!(
            "/api/v2/torrents/files?hash={}",
            urlencoding::encode(&hash.to_lowercase())
        );
        let response = self.get(&endpoint).await?;
        let files: Vec<QBContentFile> = parse_json(&response)?;
        Ok(files
            .into_iter()
            .map(|f| ContentFile::new(f.name, f.size.max(0) as u64))
            .collect())
    }

    async fn torrent_trackers(&self, hash: &str) -> Result<Vec<Tracker>, TorrentClientError> {
        let endpoint = format!(
            "/api/v2/torrents/trackers?hash={}",
            urlencoding::encode(&hash.to_lowercase())
        );
        let response = self.get(&endpoint).await?;
        let trackers: Vec<QBTracker> = parse_json(&response)?;
        Ok(trackers
            .into_iter()
            .map(|t| Tracker::new(t.url, TrackerStatus::from_code(t.status), t.msg))
            .collect())
    }

    async fn add_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let tags = tags.join(",");
        self.post_form(
            "/api/v2/torrents/addTags",
            &[("hashes", &hashes), ("tags", &tags)],
        )
        .await?;
        Ok(())
    }

    async fn set_share_limits(
        &self,
        hashes: &[String],
        limits: ShareLimits,
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let ratio = limits.ratio.0.to_string();
        let seeding_time = limits.seeding_time_minutes.to_string();
        let inactive = ShareLimits::USE_GLOBAL.to_string();
        self.post_form(
            "/api/v2/torrents/setShareLimits",
            &[
                ("hashes", &hashes),
                ("ratioLimit", &ratio),
                ("seedingTimeLimit", &seeding_time),
                ("inactiveSeedingTimeLimit", &inactive),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_torrents(
        &self,
        hashes: &[String],
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let delete_str = if delete_files { "true" } else { "false" };
        self.post_form(
            "/api/v2/torrents/delete",
            &[("hashes", &hashes), ("deleteFiles", delete_str)],
        )
        .await?;
        Ok(())
    }
}

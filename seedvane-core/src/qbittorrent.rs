//! qBittorrent API client: one bounded round trip per scrape.
//!
//! Every failure is classified and carries the offending server's hostname
//! so the poller can log it and move on; nothing here aborts the process.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{AuthMethod, ServerProfile};

/// Upper bound for one scrape round trip, including the login call.
pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-server scrape failures, all non-fatal and isolated to one server.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("{hostname}: connection failed: {reason}")]
    ConnectionFailed { hostname: String, reason: String },

    #[error("{hostname}: request timed out")]
    Timeout { hostname: String },

    #[error("{hostname}: unexpected status code {status}")]
    HttpStatus { hostname: String, status: u16 },

    #[error("{hostname}: undecodable response body: {reason}")]
    Decode { hostname: String, reason: String },

    #[error("{hostname}: authentication rejected")]
    AuthRejected { hostname: String },
}

impl ScrapeError {
    /// Hostname of the server this error is isolated to.
    pub fn hostname(&self) -> &str {
        match self {
            ScrapeError::ConnectionFailed { hostname, .. }
            | ScrapeError::Timeout { hostname }
            | ScrapeError::HttpStatus { hostname, .. }
            | ScrapeError::Decode { hostname, .. }
            | ScrapeError::AuthRejected { hostname } => hostname,
        }
    }
}

/// Snapshot of one torrent's observable state at scrape time.
///
/// Constructed fresh each cycle from the upstream response and discarded
/// after being applied to the metric registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TorrentRecord {
    pub name: String,
    /// Upstream lifecycle state, e.g. "uploading", "stalledUP", "pausedUP".
    pub state: String,
    /// Raw announce URL; normalized to a host label at apply time.
    pub tracker: String,
    pub ratio: f64,
    pub uploaded: i64,
    /// Not reported by every upstream version.
    #[serde(default)]
    pub size: Option<i64>,
}

/// One server's torrent listing, abstracted so the poller can be driven by
/// mock sources in tests.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    /// Hostname used as the `host` label and in error reports.
    fn hostname(&self) -> &str;

    /// Fetches the current torrent list in one bounded round trip.
    ///
    /// # Errors
    /// - `ScrapeError::ConnectionFailed` - Network unreachable or refused
    /// - `ScrapeError::Timeout` - Round trip exceeded the scrape deadline
    /// - `ScrapeError::HttpStatus` - Non-success status from upstream
    /// - `ScrapeError::Decode` - Malformed response body
    /// - `ScrapeError::AuthRejected` - Credentials not accepted
    async fn fetch_torrents(&self) -> Result<Vec<TorrentRecord>, ScrapeError>;
}

/// HTTP client for one qBittorrent instance.
pub struct QbitClient {
    profile: ServerProfile,
    client: reqwest::Client,
}

impl QbitClient {
    /// Creates a client for the given profile with the default scrape
    /// timeout.
    ///
    /// The cookie store holds the session cookie issued by form login.
    pub fn new(profile: ServerProfile) -> Self {
        Self::with_timeout(profile, SCRAPE_TIMEOUT)
    }

    /// Creates a client with a custom round-trip deadline.
    pub fn with_timeout(profile: ServerProfile, timeout: Duration) -> Self {
        Self {
            profile,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .cookie_store(true)
                .build()
                .expect("HTTP client creation should not fail"),
        }
    }

    fn torrents_url(&self) -> String {
        format!(
            "{}/api/{}/torrents/info",
            self.profile.base_url(),
            self.profile.api_version
        )
    }

    fn login_url(&self) -> String {
        format!("{}/api/{}/auth/login", self.profile.base_url(), self.profile.api_version)
    }

    fn send_error(&self, e: reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            ScrapeError::Timeout {
                hostname: self.profile.hostname.clone(),
            }
        } else {
            ScrapeError::ConnectionFailed {
                hostname: self.profile.hostname.clone(),
                reason: e.to_string(),
            }
        }
    }

    /// Performs the qBittorrent form login, leaving the session cookie in
    /// the client's cookie store.
    ///
    /// Upstream answers 200 with body "Fails." on bad credentials, so the
    /// body is checked as well as the status code.
    async fn login(&self) -> Result<(), ScrapeError> {
        let response = self
            .client
            .post(self.login_url())
            .form(&[
                ("username", self.profile.username.as_str()),
                ("password", self.profile.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            return Err(ScrapeError::AuthRejected {
                hostname: self.profile.hostname.clone(),
            });
        }

        let body = response.text().await.map_err(|e| self.send_error(e))?;
        if body.trim() == "Fails." {
            return Err(ScrapeError::AuthRejected {
                hostname: self.profile.hostname.clone(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl TorrentSource for QbitClient {
    fn hostname(&self) -> &str {
        &self.profile.hostname
    }

    async fn fetch_torrents(&self) -> Result<Vec<TorrentRecord>, ScrapeError> {
        if self.profile.auth_method == AuthMethod::Form {
            self.login().await?;
        }

        let mut request = self.client.get(self.torrents_url());
        if self.profile.auth_method == AuthMethod::Basic {
            request = request.basic_auth(&self.profile.username, Some(&self.profile.password));
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("request to {} failed: {}", self.profile.hostname, e);
            self.send_error(e)
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ScrapeError::AuthRejected {
                hostname: self.profile.hostname.clone(),
            });
        }
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus {
                hostname: self.profile.hostname.clone(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<TorrentRecord>>()
            .await
            .map_err(|e| ScrapeError::Decode {
                hostname: self.profile.hostname.clone(),
                reason: e.to_string(),
            })
    }
}

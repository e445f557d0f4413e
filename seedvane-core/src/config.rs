//! Exporter configuration loaded once from the environment at startup.
//!
//! Server profiles are immutable after load; every scrape reads them
//! concurrently without synchronization.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// Recheck interval applied when the environment gives none or garbage.
pub const DEFAULT_RECHECK_INTERVAL_SECS: u64 = 30;

/// Default exposition listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Fatal configuration errors; the process does not start on any of these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{variable} environment variable not set")]
    MissingVariable { variable: &'static str },

    #[error("parsing QBITTORRENT_SERVERS: {reason}")]
    InvalidServerList { reason: String },

    #[error("server {hostname}: auth method \"{method}\" requires username and password")]
    MissingCredentials { hostname: String, method: AuthMethod },

    #[error("invalid listen address {value:?}: {reason}")]
    InvalidListenAddr { value: String, reason: String },
}

/// How the scrape client authenticates against one qBittorrent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    /// No authentication; credentials in the profile are ignored.
    #[default]
    None,
    /// HTTP Basic auth header on every request.
    Basic,
    /// qBittorrent form login; the session cookie is kept for the listing call.
    Form,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::None => write!(f, "none"),
            AuthMethod::Basic => write!(f, "basic"),
            AuthMethod::Form => write!(f, "form"),
        }
    }
}

/// Identity and connection parameters for one qBittorrent instance.
///
/// The derived base URL is computed once during load and never changes,
/// so it is always consistent with scheme, hostname and port.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerProfile {
    /// Server hostname; doubles as the `host` metric label.
    pub hostname: String,
    /// Transport scheme for the API endpoint.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Optional explicit port, appended to the base URL when present.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Upstream API version tag.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, rename = "auth_type", deserialize_with = "auth_method_or_default")]
    pub auth_method: AuthMethod,
    #[serde(skip)]
    base_url: String,
}

/// Decodes the `auth_type` field, treating an explicit empty string the
/// same as an absent one: no authentication.
fn auth_method_or_default<'de, D>(deserializer: D) -> Result<AuthMethod, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.as_str() {
        "" | "none" => Ok(AuthMethod::None),
        "basic" => Ok(AuthMethod::Basic),
        "form" => Ok(AuthMethod::Form),
        other => Err(serde::de::Error::unknown_variant(
            other,
            &["none", "basic", "form"],
        )),
    }
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_api_version() -> String {
    "v2".to_string()
}

impl ServerProfile {
    /// Builds a profile from the single-server environment variables.
    pub fn single(hostname: String, protocol: String, username: String, password: String) -> Self {
        let auth_method = if username.is_empty() && password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::Basic
        };
        let mut profile = Self {
            hostname,
            protocol,
            port: None,
            username,
            password,
            api_version: default_api_version(),
            auth_method,
            base_url: String::new(),
        };
        profile.derive_base_url();
        profile
    }

    /// The immutable `scheme://hostname[:port]` prefix for API requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn derive_base_url(&mut self) {
        self.base_url = match &self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.hostname, port),
            None => format!("{}://{}", self.protocol, self.hostname),
        };
    }

    /// Applies defaults and derives the base URL after deserialization.
    ///
    /// Profiles with auth method "none" drop any configured credentials;
    /// any other method requires both username and password.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingCredentials` - Auth method needs credentials the profile lacks
    fn finalize(&mut self) -> Result<(), ConfigError> {
        match self.auth_method {
            AuthMethod::None => {
                self.username.clear();
                self.password.clear();
            }
            method => {
                if self.username.is_empty() || self.password.is_empty() {
                    return Err(ConfigError::MissingCredentials {
                        hostname: self.hostname.clone(),
                        method,
                    });
                }
            }
        }
        self.derive_base_url();
        Ok(())
    }
}

/// Complete exporter configuration: server list, cadence and listen address.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub servers: Vec<ServerProfile>,
    pub recheck_interval: Duration,
    pub listen_addr: SocketAddr,
}

impl ExporterConfig {
    /// Loads configuration from the environment.
    ///
    /// `QBITTORRENT_SERVERS` (a JSON array of profiles) is the canonical
    /// form; when unset, the single-server variables `QBITTORRENT_HOSTNAME`,
    /// `QBITTORRENT_API_PROTOCOL`, `QBITTORRENT_USERNAME` and
    /// `QBITTORRENT_PASSWORD` are used instead. The recheck interval comes
    /// from `QBITTORRENT_RECHECK_INTERVAL` in seconds and falls back to the
    /// default on non-positive or unparsable values.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingVariable` - Neither server form is present
    /// - `ConfigError::InvalidServerList` - Malformed server JSON
    /// - `ConfigError::MissingCredentials` - Profile auth method lacks credentials
    /// - `ConfigError::InvalidListenAddr` - Unparsable `SEEDVANE_LISTEN` value
    pub fn from_env() -> Result<Self, ConfigError> {
        let servers = match std::env::var("QBITTORRENT_SERVERS") {
            Ok(json) => parse_server_list(&json)?,
            Err(_) => {
                let hostname = std::env::var("QBITTORRENT_HOSTNAME").map_err(|_| {
                    ConfigError::MissingVariable {
                        variable: "QBITTORRENT_SERVERS or QBITTORRENT_HOSTNAME",
                    }
                })?;
                let protocol = std::env::var("QBITTORRENT_API_PROTOCOL")
                    .unwrap_or_else(|_| default_protocol());
                let username = std::env::var("QBITTORRENT_USERNAME").unwrap_or_default();
                let password = std::env::var("QBITTORRENT_PASSWORD").unwrap_or_default();
                vec![ServerProfile::single(hostname, protocol, username, password)]
            }
        };

        let recheck_interval = recheck_interval_from(
            std::env::var("QBITTORRENT_RECHECK_INTERVAL").ok().as_deref(),
        );

        let listen = std::env::var("SEEDVANE_LISTEN")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidListenAddr {
                value: listen,
                reason: e.to_string(),
            })?;

        Ok(Self {
            servers,
            recheck_interval,
            listen_addr,
        })
    }
}

/// Parses the JSON server array and finalizes every profile.
///
/// # Errors
///
/// - `ConfigError::InvalidServerList` - Malformed JSON
/// - `ConfigError::MissingCredentials` - Profile auth method lacks credentials
pub fn parse_server_list(json: &str) -> Result<Vec<ServerProfile>, ConfigError> {
    let mut servers: Vec<ServerProfile> =
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidServerList {
            reason: e.to_string(),
        })?;
    for server in &mut servers {
        server.finalize()?;
    }
    Ok(servers)
}

fn recheck_interval_from(value: Option<&str>) -> Duration {
    let seconds = value
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|&secs| secs > 0)
        .unwrap_or(DEFAULT_RECHECK_INTERVAL_SECS as i64);
    Duration::from_secs(seconds as u64)
}

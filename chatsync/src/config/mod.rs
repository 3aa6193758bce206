//! Configuration system for the `chatsync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::target::{AuthMode, ConnectTarget, Credentials, StaticSession};
use chatsync_proto::message::UserId;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to reach the server is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// The server URL is not usable.
    #[error("invalid server URL: {0}")]
    InvalidServerUrl(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    transport: TransportFileConfig,
    sync: SyncFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    url: Option<String>,
    ws_path: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    cookie: Option<String>,
}

/// `[transport]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TransportFileConfig {
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    rest_timeout_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    reconnect_base_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    reconnect_jitter_ms: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    horizon_tolerance_ms: Option<u64>,
    mark_read_debounce_ms: Option<u64>,
    page_size: Option<usize>,
    max_ack_tracking: Option<usize>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnect backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any delay, jitter included.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

/// Socket transport parameters (used by `TransportManager`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Timeout for opening the socket.
    pub connect_timeout: Duration,
    /// Timeout for a correlated response.
    pub request_timeout: Duration,
    /// Interval between outbound pings.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Synchronization parameters (used by the store, router and client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Slack applied when comparing `created_at` against a read/delivery horizon.
    pub horizon_tolerance: Duration,
    /// Quiet period before a mark-read is sent for a chat.
    pub mark_read_debounce: Duration,
    /// Messages per history page.
    pub page_size: usize,
    /// Maximum number of message IDs tracked for in-flight delivery acks.
    pub max_ack_tracking: usize,
    /// Capacity of the store event broadcast channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            horizon_tolerance: Duration::from_secs(2),
            mark_read_debounce: Duration::from_millis(300),
            page_size: 50,
            max_ack_tracking: 10_000,
            event_buffer: 256,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Backend base URL (`http(s)://` or `ws(s)://`).
    pub server_url: Option<String>,
    /// WebSocket path.
    pub ws_path: String,
    /// Signed-in user.
    pub user_id: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Session cookie; when set the handshake uses cookie auth.
    pub cookie: Option<String>,

    // -- Transport --
    /// Socket transport settings.
    pub transport: TransportConfig,
    /// Timeout for REST fallback calls.
    pub rest_timeout: Duration,

    // -- Sync --
    /// Sync settings.
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            ws_path: "/ws".to_string(),
            user_id: None,
            token: None,
            cookie: None,
            transport: TransportConfig::default(),
            rest_timeout: Duration::from_secs(15),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/chatsync/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or either file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let t = &file.transport;
        let s = &file.sync;

        Self {
            server_url: cli.server_url.clone().or_else(|| file.server.url.clone()),
            ws_path: file
                .server
                .ws_path
                .clone()
                .unwrap_or(defaults.ws_path),
            user_id: cli.user_id.clone().or_else(|| file.server.user_id.clone()),
            token: cli.token.clone().or_else(|| file.server.token.clone()),
            cookie: cli.cookie.clone().or_else(|| file.server.cookie.clone()),
            transport: TransportConfig {
                connect_timeout: t
                    .connect_timeout_secs
                    .map_or(defaults.transport.connect_timeout, Duration::from_secs),
                request_timeout: t
                    .request_timeout_secs
                    .map_or(defaults.transport.request_timeout, Duration::from_secs),
                heartbeat_interval: t
                    .heartbeat_interval_secs
                    .map_or(defaults.transport.heartbeat_interval, Duration::from_secs),
                heartbeat_timeout: t
                    .heartbeat_timeout_secs
                    .map_or(defaults.transport.heartbeat_timeout, Duration::from_secs),
                reconnect: ReconnectConfig {
                    base_delay: t
                        .reconnect_base_ms
                        .map_or(defaults.transport.reconnect.base_delay, Duration::from_millis),
                    max_delay: t
                        .reconnect_max_ms
                        .map_or(defaults.transport.reconnect.max_delay, Duration::from_millis),
                    max_jitter: t
                        .reconnect_jitter_ms
                        .map_or(defaults.transport.reconnect.max_jitter, Duration::from_millis),
                },
            },
            rest_timeout: t
                .rest_timeout_secs
                .map_or(defaults.rest_timeout, Duration::from_secs),
            sync: SyncConfig {
                horizon_tolerance: s
                    .horizon_tolerance_ms
                    .map_or(defaults.sync.horizon_tolerance, Duration::from_millis),
                mark_read_debounce: s
                    .mark_read_debounce_ms
                    .map_or(defaults.sync.mark_read_debounce, Duration::from_millis),
                page_size: s.page_size.unwrap_or(defaults.sync.page_size),
                max_ack_tracking: s.max_ack_tracking.unwrap_or(defaults.sync.max_ack_tracking),
                event_buffer: s.event_buffer.unwrap_or(defaults.sync.event_buffer),
            },
        }
    }

    /// Build the connection target from the server settings.
    ///
    /// Cookie auth is used when a cookie is configured, token auth otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the server URL or user id is
    /// absent, and [`ConfigError::InvalidServerUrl`] when the URL does not parse.
    pub fn to_target(&self) -> Result<ConnectTarget, ConfigError> {
        let url = self.server_url.as_deref().ok_or(ConfigError::Missing("server url"))?;
        let user_id = self
            .user_id
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing("user id"))?;
        let auth = if self.cookie.is_some() {
            AuthMode::Cookie
        } else {
            AuthMode::Token
        };
        let session = StaticSession::new(Credentials {
            user_id: UserId::new(user_id),
            token: self.token.clone(),
            cookie: self.cookie.clone(),
        });
        ConnectTarget::new(url, self.ws_path.clone(), auth, Arc::new(session))
            .map_err(|e| ConfigError::InvalidServerUrl(e.to_string()))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time chat sync client")]
pub struct CliArgs {
    /// Backend base URL (e.g. `http://localhost:8080`).
    #[arg(long, env = "CHATSYNC_SERVER_URL")]
    pub server_url: Option<String>,

    /// Signed-in user id.
    #[arg(long, env = "CHATSYNC_USER_ID")]
    pub user_id: Option<String>,

    /// Bearer token.
    #[arg(long, env = "CHATSYNC_TOKEN")]
    pub token: Option<String>,

    /// Session cookie (switches the handshake to cookie auth).
    #[arg(long, env = "CHATSYNC_COOKIE")]
    pub cookie: Option<String>,

    /// Path to config file (default: `~/.config/chatsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/chatsync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("chatsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

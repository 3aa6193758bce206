//! Configuration for the reference backend.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatsync-backend/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading backend configuration.
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
}

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendConfigFile {
    server: ServerFileConfig,
    users: Vec<UserAccount>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_pending_actions: Option<usize>,
}

/// One `[[users]]` entry: a user id and the token that authenticates it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserAccount {
    /// User id.
    pub id: String,
    /// Bearer/session token.
    pub token: String,
}

/// CLI arguments for the backend.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "ChatSync reference backend")]
pub struct BackendCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "CHATSYNC_BIND")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/chatsync-backend/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum queued sync actions per offline user.
    #[arg(long)]
    pub max_pending_actions: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATSYNC_BACKEND_LOG")]
    pub log_level: String,
}

/// Fully resolved backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Maximum queued sync actions per user.
    pub max_pending_actions: usize,
    /// Accounts to register at startup.
    pub users: Vec<UserAccount>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_pending_actions: 1000,
            users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path is tried and a missing file is treated as
    /// empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &BackendCliArgs, file: BackendConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_pending_actions: cli
                .max_pending_actions
                .or(file.server.max_pending_actions)
                .unwrap_or(defaults.max_pending_actions),
            users: file.users,
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<BackendConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BackendConfigFile::default());
        };
        config_dir.join("chatsync-backend").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackendConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

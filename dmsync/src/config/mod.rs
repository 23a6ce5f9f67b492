//! Configuration for the `dmsync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/dmsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use dmsync_proto::message::MAX_CONTENT_LEN;

use crate::push::websocket::PushConfig;
use crate::sync::SyncConfig;

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

    /// A value parsed but is not usable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The offending setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    sync: SyncFileConfig,
    outbound: OutboundFileConfig,
    ui: UiFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    push_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    join_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    page_size: Option<u32>,
    near_top_threshold_px: Option<f64>,
    notification_buffer: Option<usize>,
    min_search_len: Option<usize>,
}

/// `[outbound]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct OutboundFileConfig {
    max_content_len: Option<usize>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Session --
    /// The local user id.
    pub user_id: Option<String>,
    /// Push channel WebSocket URL; `None` uses the in-process backend.
    pub push_url: Option<String>,
    /// Push channel timeouts and buffering.
    pub push: PushConfig,

    // -- Sync --
    /// Pagination, backfill and notification tunables.
    pub sync: SyncConfig,

    // -- Outbound --
    /// Maximum message length in bytes.
    pub max_content_len: usize,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            push_url: None,
            push: PushConfig::default(),
            sync: SyncConfig::default(),
            max_content_len: MAX_CONTENT_LEN,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or a resolved value is unusable.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            user_id: cli.user.clone().or_else(|| file.session.user_id.clone()),
            push_url: cli
                .push_url
                .clone()
                .or_else(|| file.session.push_url.clone()),
            push: PushConfig {
                connect_timeout: file
                    .session
                    .connect_timeout_secs
                    .map_or(defaults.push.connect_timeout, Duration::from_secs),
                join_timeout: file
                    .session
                    .join_timeout_secs
                    .map_or(defaults.push.join_timeout, Duration::from_secs),
                event_buffer: file
                    .session
                    .event_buffer
                    .unwrap_or(defaults.push.event_buffer),
            },
            sync: SyncConfig {
                page_size: cli
                    .page_size
                    .or(file.sync.page_size)
                    .unwrap_or(defaults.sync.page_size),
                near_top_threshold_px: file
                    .sync
                    .near_top_threshold_px
                    .unwrap_or(defaults.sync.near_top_threshold_px),
                notification_buffer: file
                    .sync
                    .notification_buffer
                    .unwrap_or(defaults.sync.notification_buffer),
                min_search_len: file
                    .sync
                    .min_search_len
                    .unwrap_or(defaults.sync.min_search_len),
            },
            max_content_len: file
                .outbound
                .max_content_len
                .unwrap_or(defaults.max_content_len),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Reject values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(raw) = &self.push_url {
            let url = url::Url::parse(raw).map_err(|e| ConfigError::Invalid {
                field: "push_url",
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::Invalid {
                    field: "push_url",
                    reason: format!("expected ws:// or wss://, got {}://", url.scheme()),
                });
            }
        }
        if self.sync.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be at least 1".into(),
            });
        }
        if !self.sync.near_top_threshold_px.is_finite() || self.sync.near_top_threshold_px < 0.0 {
            return Err(ConfigError::Invalid {
                field: "near_top_threshold_px",
                reason: "must be a non-negative number".into(),
            });
        }
        if self.max_content_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_content_len",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Direct-message sync engine demo")]
pub struct CliArgs {
    /// User id to sign in as.
    #[arg(long, env = "DMSYNC_USER")]
    pub user: Option<String>,

    /// WebSocket URL of the push channel server.
    #[arg(long, env = "DMSYNC_PUSH_URL")]
    pub push_url: Option<String>,

    /// Path to config file (default: `~/.config/dmsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Messages per history page.
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DMSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/dmsync.log`).
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
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("dmsync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

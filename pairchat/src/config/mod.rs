//! Configuration system for the `PairChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

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

    /// The server URL is not a valid `http(s)` URL.
    #[error("invalid server url {url}: {reason}")]
    InvalidServerUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    stability_threshold_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Backoff policy for the socket supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
    /// A connection that stays up this long resets the backoff.
    pub stability_threshold: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
            stability_threshold: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether `attempt` (1-based) is past the configured limit.
    #[must_use]
    pub const fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server's HTTP API (e.g. `http://localhost:5001`).
    pub server_url: Url,
    /// Identity to sign in as.
    pub user_id: Option<String>,
    /// Bearer credential issued by the identity service.
    pub token: Option<String>,
    /// Socket reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Capacity of the inbound event and UI update channels.
    pub channel_capacity: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Log file path. Defaults to `$TMPDIR/pairchat.log`.
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            user_id: None,
            token: None,
            reconnect: ReconnectConfig::default(),
            channel_capacity: 256,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

#[allow(clippy::expect_used)]
fn default_server_url() -> Url {
    Url::parse("http://localhost:5001").expect("static URL is valid")
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or the server URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server_url = match cli
            .server_url
            .as_deref()
            .or(file.network.server_url.as_deref())
        {
            Some(raw) => parse_server_url(raw)?,
            None => defaults.server_url,
        };

        Ok(Self {
            server_url,
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.network.user_id.clone()),
            token: cli.token.clone().or_else(|| file.network.token.clone()),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
                stability_threshold: file
                    .reconnect
                    .stability_threshold_secs
                    .map_or(defaults.reconnect.stability_threshold, Duration::from_secs),
            },
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
        })
    }

    /// The token to authenticate with: the configured one, or the user id.
    #[must_use]
    pub fn credential(&self) -> Option<String> {
        self.token.clone().or_else(|| self.user_id.clone())
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PairChat direct messaging client")]
pub struct CliArgs {
    /// Base URL of the server (http or https).
    #[arg(long, env = "PAIRCHAT_SERVER")]
    pub server_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "PAIRCHAT_USER")]
    pub user_id: Option<String>,

    /// Bearer token (defaults to the user id).
    #[arg(long, env = "PAIRCHAT_TOKEN")]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/pairchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/pairchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidServerUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidServerUrl {
            url: raw.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(url)
}

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
        config_dir.join("pairchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

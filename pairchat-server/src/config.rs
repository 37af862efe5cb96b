//! Configuration system for the `PairChat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat-server/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use pairchat_proto::message::UserId;
use pairchat_proto::user::User;

/// Upper bound for `ping_interval_secs`. The idle timeout is twice this.
const MAX_PING_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Errors that can occur when loading server configuration.
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

    /// A resolved value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    users: Vec<UserFileEntry>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    public_url: Option<String>,
    max_body_size: Option<usize>,
    ping_interval_secs: Option<u64>,
}

/// One `[[users]]` entry seeding the directory.
#[derive(Debug, serde::Deserialize)]
struct UserFileEntry {
    id: String,
    full_name: String,
    #[serde(default)]
    bio: String,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PairChat presence and delivery server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "PAIRCHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/pairchat-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL under which stored images are published.
    #[arg(long, env = "PAIRCHAT_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Maximum request body size in bytes.
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Seconds between WebSocket pings.
    #[arg(long)]
    pub ping_interval_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:5001`).
    pub bind_addr: String,
    /// Base URL for published media.
    pub public_url: String,
    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
    /// Interval between server pings on each WebSocket.
    pub ping_interval: Duration,
    /// Log level filter string.
    pub log_level: String,
    /// Directory entries to seed at startup.
    pub users: Vec<User>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            public_url: "http://localhost:5001".to_string(),
            max_body_size: 4 * 1024 * 1024,
            ping_interval: Duration::from_secs(25),
            log_level: "info".to_string(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or a value is out of range.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ping_secs = cli
            .ping_interval_secs
            .or(file.server.ping_interval_secs)
            .unwrap_or(defaults.ping_interval.as_secs());
        if ping_secs == 0 {
            return Err(ConfigError::Invalid(
                "ping_interval_secs must be at least 1".to_string(),
            ));
        }
        if ping_secs > MAX_PING_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "ping_interval_secs must be at most {MAX_PING_INTERVAL_SECS}"
            )));
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            public_url: cli
                .public_url
                .clone()
                .or(file.server.public_url)
                .unwrap_or(defaults.public_url),
            max_body_size: cli
                .max_body_size
                .or(file.server.max_body_size)
                .unwrap_or(defaults.max_body_size),
            ping_interval: Duration::from_secs(ping_secs),
            log_level: cli.log_level.clone(),
            users: file
                .users
                .into_iter()
                .map(|entry| User {
                    bio: entry.bio,
                    ..User::new(UserId::new(entry.id), entry.full_name)
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("pairchat-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

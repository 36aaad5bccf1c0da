//! Server configuration: schema, defaults, and TOML loading.
//!
//! # File layout
//!
//! Every section and every field is optional; anything left out takes the
//! default shown here.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 1989
//! log_level = "info"
//!
//! [link]
//! exchange_timeout_ms = 10000
//! pacing_ms = 5
//!
//! [tetris]
//! music = "a"          # a, b, c or off
//! wins_per_match = 4
//! ```
//!
//! Command-line flags and `GBPLAY_*` environment variables are applied on top
//! of the file by `main.rs`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gbplay_core::{LinkSettings, TetrisSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port GBPlay link adapters connect to.
pub const DEFAULT_PORT: u16 = 1989;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `bind_address` and `port` do not form a socket address.
    #[error("invalid bind address '{address}': {source}")]
    InvalidBindAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenerConfig,
    pub link: LinkConfig,
    pub tetris: TetrisSettings,
}

/// Where to listen and how loudly to log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// IP address to bind to.  `"0.0.0.0"` accepts consoles on any interface.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Per-connection link timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long a console may take to answer one byte.
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
    /// Initial spacing between sends; games adjust it per phase.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_exchange_timeout_ms() -> u64 {
    10_000
}
fn default_pacing_ms() -> u64 {
    5
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: default_exchange_timeout_ms(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl LinkConfig {
    /// The channel settings these values describe.
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            exchange_timeout: Duration::from_millis(self.exchange_timeout_ms),
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}

impl ServerConfig {
    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBindAddress`] if `bind_address` is not an IP
    /// address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = format!("{}:{}", self.server.bind_address, self.server.port);
        address
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddress { address, source })
    }

    /// Rejects values the server cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBindAddress`] or [`ConfigError::Invalid`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.link.exchange_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "link.exchange_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.tetris.wins_per_match == 0 {
            return Err(ConfigError::Invalid(
                "tetris.wins_per_match must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses a configuration from TOML text.
///
/// # Errors
///
/// [`ConfigError::Parse`] if the TOML is malformed or has wrongly typed
/// values.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads the configuration from `path`, or the defaults when no path is
/// given.
///
/// # Errors
///
/// [`ConfigError::Io`] if an explicitly named file cannot be read (including
/// when it does not exist), and [`ConfigError::Parse`] if it is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

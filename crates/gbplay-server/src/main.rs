//! GBPlay relay server: entry point.
//!
//! Game Boys (through a link-cable-to-network adapter) connect to this
//! server over TCP.  The server seats them two at a time in a session and
//! plays "link cable" between them, driving the game's own link protocol.
//!
//! # Usage
//!
//! ```text
//! gbplay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML config file
//!   --bind <IP>           Address to listen on [default from config: 0.0.0.0]
//!   --port <PORT>         TCP port [default from config: 1989]
//!   --music <a|b|c|off>   Tetris music type [default from config: a]
//!   --log-level <FILTER>  Log filter when RUST_LOG is unset [default: info]
//!   --print-config        Print the effective configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable        | Flag           |
//! |-----------------|----------------|
//! | `GBPLAY_CONFIG` | `--config`     |
//! | `GBPLAY_BIND`   | `--bind`       |
//! | `GBPLAY_PORT`   | `--port`       |
//! | `GBPLAY_MUSIC`  | `--music`      |
//! | `GBPLAY_LOG`    | `--log-level`  |
//!
//! Precedence, highest first: command line, environment, config file,
//! built-in defaults.  `RUST_LOG`, when set, replaces the log filter
//! entirely.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use gbplay_core::games::tetris::MusicType;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gbplay_server::domain::{load_config, ServerConfig};
use gbplay_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// GBPlay link-cable relay server.
#[derive(Debug, Parser)]
#[command(
    name = "gbplay-server",
    about = "Relays Game Boy link-cable traffic between networked consoles",
    version
)]
struct Cli {
    /// TOML configuration file.  Built-in defaults apply when omitted.
    #[arg(long, env = "GBPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long, env = "GBPLAY_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "GBPLAY_PORT")]
    port: Option<u16>,

    /// Music confirmed on the Tetris music screen (a, b, c or off).
    #[arg(long, env = "GBPLAY_MUSIC")]
    music: Option<MusicType>,

    /// Log filter used when `RUST_LOG` is not set (e.g. `debug`,
    /// `gbplay_core=trace`).
    #[arg(long, env = "GBPLAY_LOG")]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Loads the config file (if any) and applies the command-line
    /// overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or the
    /// result fails validation.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = load_config(self.config.as_deref()).with_context(|| match &self.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load default config".to_string(),
        })?;

        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(music) = self.music {
            config.tetris.music = music;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let print_config = cli.print_config;
    let config = cli.into_server_config()?;

    if print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins when present; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        "GBPlay server starting: music={}, wins_per_match={}",
        config.tetris.music, config.tetris.wins_per_match
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("GBPlay server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("gbplay-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_without_arguments_uses_defaults() {
        // Arrange: no flags, no config file
        let cli = Cli {
            config: None,
            bind: None,
            port: None,
            music: None,
            log_level: None,
            print_config: false,
        };

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr().unwrap().port(), 1989);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = cli(&["--port", "2020"]);
        assert_eq!(cli.port, Some(2020));
    }

    #[test]
    fn test_cli_music_parses_by_name() {
        let cli = cli(&["--music", "off"]);
        assert_eq!(cli.music, Some(MusicType::Off));
    }

    #[test]
    fn test_cli_rejects_unknown_music() {
        let result = Cli::try_parse_from(["gbplay-server", "--music", "disco"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_print_config_flag() {
        let cli = cli(&["--print-config"]);
        assert!(cli.print_config);
    }

    #[test]
    fn test_overrides_are_applied_to_config() {
        // Arrange
        let cli = Cli {
            config: None,
            bind: Some("127.0.0.1".to_string()),
            port: Some(4000),
            music: Some(MusicType::C),
            log_level: Some("debug".to_string()),
            print_config: false,
        };

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:4000");
        assert_eq!(config.tetris.music, MusicType::C);
        assert_eq!(config.server.log_level, "debug");
    }

    #[test]
    fn test_invalid_bind_override_returns_error() {
        // Arrange: an address that is not an IP
        let cli = Cli {
            config: None,
            bind: Some("not.an.ip".to_string()),
            port: None,
            music: None,
            log_level: None,
            print_config: false,
        };

        // Act
        let result = cli.into_server_config();

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file_returns_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/gbplay.toml")),
            bind: None,
            port: None,
            music: None,
            log_level: None,
            print_config: false,
        };
        assert!(cli.into_server_config().is_err());
    }
}

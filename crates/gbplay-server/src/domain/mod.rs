//! Domain layer for gbplay-server.
//!
//! Pure configuration types: no sockets, no tasks.  File reading lives here
//! too because it is a single synchronous call at startup.

pub mod config;

pub use config::{load_config, ConfigError, LinkConfig, ListenerConfig, ServerConfig};

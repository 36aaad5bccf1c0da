//! gbplay-server library crate.
//!
//! Pairs Game Boys that connect over TCP into two-player link-cable sessions.
//!
//! # Architecture
//!
//! ```text
//! Console (raw link bytes over TCP, port 1989)
//!         ↕
//! [gbplay-server]
//!   ├── domain/           ServerConfig (TOML + defaults)
//!   ├── application/      SessionRegistry: matchmaking and session IDs
//!   └── infrastructure/
//!         └── listener/   TCP accept loop
//!         ↕
//! [gbplay-core]           LinkChannel, Session, Tetris
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no async code.
//! - `application` depends on `domain` and `gbplay-core`.
//! - `infrastructure` depends on all other layers plus `tokio::net`.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: session registry.
pub mod application;

/// Infrastructure layer: TCP accept loop.
pub mod infrastructure;

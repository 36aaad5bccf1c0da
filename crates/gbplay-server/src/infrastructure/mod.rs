//! Infrastructure layer for gbplay-server.
//!
//! The TCP accept loop: turns sockets into link channels and hands them to
//! the registry.

pub mod listener;

pub use listener::run_server;

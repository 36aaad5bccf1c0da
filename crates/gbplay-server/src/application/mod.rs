//! Application layer for gbplay-server.
//!
//! Decides which session a newly connected console joins and keeps track of
//! the sessions that are still running.

pub mod registry;

pub use registry::{generate_session_id, SessionRegistry, SESSION_ID_LEN};

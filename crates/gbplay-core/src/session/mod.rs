//! Generic session state machine.
//!
//! A [`Session`] pairs a game protocol value with the peers that are playing
//! it and drives the protocol's handlers until the session ends.  The
//! [`SessionHandle`] is the part the outside world (the registry) talks to:
//! admitting peers, ending the session, and hearing about it when it ends.

pub mod error;
pub mod handle;
pub mod machine;

pub use error::SessionError;
pub use handle::{SessionEvent, SessionHandle, MAX_PEERS};
pub use machine::{GameProtocol, HandlerFuture, HandlerTable, Session, StateHandler};

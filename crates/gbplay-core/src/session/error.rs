//! Errors surfaced by the session driver and its handlers.

use thiserror::Error;

use crate::link::LinkError;

/// Every way a session step can fail.
///
/// All of them end the session.  The driving loop only treats one as a fault
/// when the session was still live at the time; failures that surface after
/// teardown are the expected fallout of force-closed connections.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An exchange with one of the peers failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The protocol has no handler registered for the state it is in.
    #[error("{protocol} has no handler for state {state}")]
    NoHandlerForState {
        protocol: &'static str,
        state: String,
    },

    /// A handler needed a peer that is not (or no longer) connected.
    #[error("session '{session_id}' has no peer at index {index}")]
    MissingPeer { session_id: String, index: usize },

    /// The session is full or has ended.
    #[error("session '{session_id}' is not accepting peers")]
    NotJoinable { session_id: String },

    /// The session ended while the operation was waiting.
    #[error("session '{session_id}' has ended")]
    Ended { session_id: String },
}

impl SessionError {
    /// `true` when the failure is the fallout of a peer leaving (its
    /// connection closed under an exchange) or of the session already
    /// ending, rather than a fault in a live session.
    pub fn is_teardown(&self) -> bool {
        match self {
            SessionError::Link(e) => e.is_disconnect(),
            SessionError::Ended { .. } => true,
            _ => false,
        }
    }
}

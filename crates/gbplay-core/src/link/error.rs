//! Errors produced by [`LinkChannel`](super::LinkChannel) exchanges.

use std::time::Duration;

use thiserror::Error;

/// Why a single byte exchange with a peer failed.
///
/// None of these are retried at the exchange level: the link protocol has no
/// acknowledgement scheme, so any failure ends the session that owns the
/// channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The peer did not answer within the exchange ceiling.  The channel has
    /// already been disconnected when this is returned.
    #[error("peer '{peer}' did not respond within {timeout:?}")]
    Timeout { peer: String, timeout: Duration },

    /// The connection closed before the exchange completed.
    #[error("peer '{peer}' disconnected before responding")]
    PeerClosed { peer: String },

    /// The transport rejected the outgoing byte.
    #[error("write to peer '{peer}' failed: {source}")]
    TransportWrite {
        peer: String,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    /// Returns `true` for failures caused by the connection going away, as
    /// opposed to the peer going silent.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            LinkError::PeerClosed { .. } | LinkError::TransportWrite { .. }
        )
    }

    /// Identity of the peer the failed exchange was addressed to.
    pub fn peer(&self) -> &str {
        match self {
            LinkError::Timeout { peer, .. }
            | LinkError::PeerClosed { peer }
            | LinkError::TransportWrite { peer, .. } => peer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_a_disconnect() {
        let err = LinkError::Timeout {
            peer: "10.0.0.1:5000".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(!err.is_disconnect());
        assert_eq!(err.peer(), "10.0.0.1:5000");
    }

    #[test]
    fn test_write_failure_counts_as_disconnect() {
        let err = LinkError::TransportWrite {
            peer: "p".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_error_messages_name_the_peer() {
        let err = LinkError::PeerClosed {
            peer: "192.168.0.7:4242".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "peer '192.168.0.7:4242' disconnected before responding"
        );
    }
}

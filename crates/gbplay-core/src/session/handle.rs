//! [`SessionHandle`]: the shared, cloneable face of a session.
//!
//! The handle owns everything about a session that outlives a single handler
//! call and that other tasks need to touch: the peer list, the ended flag, and
//! the notifications fired when either changes.  The driving loop, the
//! registry, and each peer's disconnect listener all hold clones.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::error::SessionError;
use crate::link::LinkChannel;

/// Most peers a session will ever hold.
pub const MAX_PEERS: usize = 2;

/// Notifications a session sends to whoever created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session has ended and its identity can be reclaimed.  Sent
    /// exactly once per session.
    Ended { session_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SessionStatus {
    peers: usize,
    ended: bool,
}

struct Inner {
    id: String,
    peers: Mutex<Vec<Arc<LinkChannel>>>,
    ended: AtomicBool,
    status: watch::Sender<SessionStatus>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Inner {
    fn peers(&self) -> MutexGuard<'_, Vec<Arc<LinkChannel>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheaply cloneable reference to one session's shared state.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Creates the shared state for a new, empty session.  `events`, when
    /// given, receives [`SessionEvent::Ended`] once the session ends.
    pub fn new(id: impl Into<String>, events: Option<mpsc::UnboundedSender<SessionEvent>>) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                peers: Mutex::new(Vec::with_capacity(MAX_PEERS)),
                ended: AtomicBool::new(false),
                status,
                events,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers().len()
    }

    /// `true` while the session has not ended and has a free peer slot.
    pub fn is_joinable(&self) -> bool {
        !self.is_ended() && self.peer_count() < MAX_PEERS
    }

    /// Snapshot of the connected peers, in join order.
    pub fn peers(&self) -> Vec<Arc<LinkChannel>> {
        self.inner.peers().clone()
    }

    /// The peer at `index` in join order (0 is the first to join).
    ///
    /// # Errors
    ///
    /// [`SessionError::Ended`] once the session has ended (its peers are
    /// gone), otherwise [`SessionError::MissingPeer`] if nobody holds that
    /// seat yet.
    pub fn peer(&self, index: usize) -> Result<Arc<LinkChannel>, SessionError> {
        if let Some(peer) = self.inner.peers().get(index) {
            return Ok(Arc::clone(peer));
        }
        let session_id = self.inner.id.clone();
        if self.is_ended() {
            Err(SessionError::Ended { session_id })
        } else {
            Err(SessionError::MissingPeer { session_id, index })
        }
    }

    /// Admits `peer` into the session.
    ///
    /// The session ends as soon as this peer's connection closes, whatever
    /// the cause: the link protocol has no way to resume with a new peer.
    ///
    /// Must be called inside a Tokio runtime (it spawns the disconnect
    /// listener).
    ///
    /// # Errors
    ///
    /// [`SessionError::NotJoinable`] if the session is full or has ended.
    /// The rejected peer is disconnected.
    pub fn add_peer(&self, peer: LinkChannel) -> Result<(), SessionError> {
        let peer = Arc::new(peer);
        {
            let mut peers = self.inner.peers();
            if self.is_ended() || peers.len() >= MAX_PEERS {
                drop(peers);
                debug!(
                    "rejecting peer '{}': session '{}' is not joinable",
                    peer.id(),
                    self.id()
                );
                peer.disconnect();
                return Err(SessionError::NotJoinable {
                    session_id: self.inner.id.clone(),
                });
            }
            peers.push(Arc::clone(&peer));
            let count = peers.len();
            self.inner.status.send_modify(|s| s.peers = count);
        }

        info!("peer '{}' joined session '{}'", peer.id(), self.id());

        let closed = peer.closed();
        let peer_id = peer.id().to_string();
        let handle = self.clone();
        tokio::spawn(async move {
            closed.await;
            if !handle.is_ended() {
                info!("peer '{peer_id}' left session '{}'", handle.id());
            }
            handle.end();
        });

        Ok(())
    }

    /// Ends the session: disconnects and forgets every peer and sends
    /// [`SessionEvent::Ended`].  Only the first call has any effect.
    pub fn end(&self) {
        if self.inner.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("ending session '{}'", self.id());

        let peers = std::mem::take(&mut *self.inner.peers());
        for peer in &peers {
            peer.disconnect();
        }

        self.inner.status.send_replace(SessionStatus {
            peers: 0,
            ended: true,
        });

        if let Some(events) = &self.inner.events {
            // The registry may already be gone during shutdown.
            let _ = events.send(SessionEvent::Ended {
                session_id: self.inner.id.clone(),
            });
        }
    }

    /// Resolves once the session has ended.
    pub fn ended(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut status = self.inner.status.subscribe();
        async move {
            loop {
                if status.borrow_and_update().ended {
                    return;
                }
                if status.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Suspends until at least `count` peers have joined.
    ///
    /// # Errors
    ///
    /// [`SessionError::Ended`] if the session ends first.
    pub async fn wait_for_peers(&self, count: usize) -> Result<(), SessionError> {
        let mut status = self.inner.status.subscribe();
        loop {
            let current = *status.borrow_and_update();
            if current.ended {
                break;
            }
            if current.peers >= count {
                return Ok(());
            }
            if status.changed().await.is_err() {
                break;
            }
        }
        Err(SessionError::Ended {
            session_id: self.inner.id.clone(),
        })
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("peers", &self.peer_count())
            .field("ended", &self.is_ended())
            .finish()
    }
}

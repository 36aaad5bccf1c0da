//! Session registry: matchmaking for newly connected consoles.
//!
//! A console that connects joins the first session with a free seat.  If
//! there is none, a new Tetris session is created under a fresh four-letter
//! ID and its driving loop is spawned.  Sessions report back through the
//! [`SessionEvent`] channel returned by [`SessionRegistry::new`] when they
//! end, and the owner of the registry removes them.
//!
//! ```text
//! accept ─► admit(peer) ─┬─ joinable session exists ─► add_peer
//!                        └─ none ─► new ID ─► Session::new ─► spawn run()
//!
//! session ends ─► SessionEvent::Ended ─► handle_event ─► remove(id)
//! ```

use std::collections::HashMap;

use gbplay_core::{
    LinkChannel, Session, SessionError, SessionEvent, SessionHandle, Tetris, TetrisSettings,
};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Letters in a session ID (26⁴ possible IDs).
pub const SESSION_ID_LEN: usize = 4;

/// Generates a random session ID of [`SESSION_ID_LEN`] uppercase letters.
pub fn generate_session_id<R: Rng>(rng: &mut R) -> String {
    (0..SESSION_ID_LEN)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect()
}

/// Live sessions keyed by ID.
pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
    settings: TetrisSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionRegistry {
    /// Creates an empty registry.  New sessions are Tetris sessions using
    /// `settings`; their end notifications arrive on the returned receiver.
    pub fn new(settings: TetrisSettings) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            sessions: HashMap::new(),
            settings,
            events,
        };
        (registry, rx)
    }

    /// Seats `peer` in a session and returns that session's ID.
    ///
    /// Must be called inside a Tokio runtime: creating a session spawns its
    /// driving loop.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotJoinable`] if the chosen session ended between the
    /// lookup and the join.  The peer has been disconnected in that case.
    pub fn admit(&mut self, peer: LinkChannel) -> Result<String, SessionError> {
        if let Some(handle) = self.sessions.values().find(|h| h.is_joinable()) {
            handle.add_peer(peer)?;
            return Ok(handle.id().to_string());
        }

        let id = self.fresh_id();
        let session = Session::new(
            id.clone(),
            Tetris::new(self.settings),
            Some(self.events.clone()),
        );
        let handle = session.handle().clone();
        self.sessions.insert(id.clone(), handle.clone());

        tokio::spawn(async move {
            // Failures are logged by the session itself.
            let _ = session.run().await;
        });

        handle.add_peer(peer)?;
        Ok(id)
    }

    /// Applies a notification from one of the sessions.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ended { session_id } => {
                if self.remove(&session_id) {
                    info!("session '{session_id}' ended");
                }
            }
        }
    }

    /// Forgets a session.  Returns `false` if it was not registered.
    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&SessionHandle> {
        self.sessions.get(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ends every session, disconnecting all consoles.
    pub fn shutdown(&mut self) {
        for (id, handle) in self.sessions.drain() {
            debug!("ending session '{id}' for shutdown");
            handle.end();
        }
    }

    fn fresh_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = generate_session_id(&mut rng);
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

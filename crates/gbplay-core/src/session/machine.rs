//! The state machine driver: [`GameProtocol`], [`HandlerTable`] and
//! [`Session`].
//!
//! # How a game plugs in (for beginners)
//!
//! A game is a plain value (its scores, settings, round counters) that
//! implements [`GameProtocol`].  Besides `reset()` it provides a
//! [`HandlerTable`]: a map from each of its states to an async function that
//! performs that state's work.  The table is built once per game *type* and
//! shared by every session of that type:
//!
//! ```text
//! Tetris::handlers()  ─►  WaitingForPlayers        ─► waiting_for_players
//!   (static, built        PlayersConnected         ─► players_connected
//!    on first use)        ...                      ─► ...
//! ```
//!
//! [`Session::run`] then loops: look up the handler for the current state,
//! call it with `&mut Session`, yield to the scheduler, repeat.  A handler
//! advances the game by calling [`Session::set_state`]; leaving the state
//! alone means "run me again".

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info};

use super::error::SessionError;
use super::handle::{SessionEvent, SessionHandle};
use crate::link::LinkChannel;

/// How long [`Session::run`] keeps awaiting an interrupted step after the
/// session ends, so the step can report the failure that ended it.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// The future returned by a state handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;

/// A state handler: an async function over the session it advances.
pub type StateHandler<P> = for<'a> fn(&'a mut Session<P>) -> HandlerFuture<'a>;

/// What a game supplies to be driven by a [`Session`].
pub trait GameProtocol: Send + Sync + Sized + 'static {
    /// The game's state enum.
    type State: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Human-readable game name used in logs and errors.
    const NAME: &'static str;

    /// State a freshly created session starts in.
    fn initial_state(&self) -> Self::State;

    /// The state-to-handler map shared by every session of this game.
    fn handlers() -> &'static HandlerTable<Self>;

    /// Re-initializes match counters.  Called once when the session is
    /// created and again whenever the game starts a new match.
    fn reset(&mut self);
}

// ── HandlerTable ──────────────────────────────────────────────────────────────

/// Map from a protocol's states to their handlers.
pub struct HandlerTable<P: GameProtocol> {
    handlers: HashMap<P::State, StateHandler<P>>,
}

impl<P: GameProtocol> HandlerTable<P> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, state: P::State, handler: StateHandler<P>) -> Self {
        self.register(state, handler);
        self
    }

    /// Registers `handler` for `state`, replacing any earlier registration.
    pub fn register(&mut self, state: P::State, handler: StateHandler<P>) {
        self.handlers.insert(state, handler);
    }

    pub fn get(&self, state: P::State) -> Option<StateHandler<P>> {
        self.handlers.get(&state).copied()
    }

    pub fn contains(&self, state: P::State) -> bool {
        self.handlers.contains_key(&state)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<P: GameProtocol> Default for HandlerTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: GameProtocol> fmt::Debug for HandlerTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One running game between up to two peers.
pub struct Session<P: GameProtocol> {
    handle: SessionHandle,
    state: P::State,
    protocol: P,
}

impl<P: GameProtocol> Session<P> {
    /// Creates a session in the protocol's initial state.  `protocol.reset()`
    /// is called once here.
    pub fn new(
        id: impl Into<String>,
        mut protocol: P,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Self {
        protocol.reset();
        let state = protocol.initial_state();
        let handle = SessionHandle::new(id, events);
        info!("created new {} session '{}'", P::NAME, handle.id());
        Self {
            handle,
            state,
            protocol,
        }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// The shared handle (peer admission, ending, notifications).
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn state(&self) -> P::State {
        self.state
    }

    /// Moves the session to `state`; takes effect on the next step.
    pub fn set_state(&mut self, state: P::State) {
        debug!("session '{}': {:?} -> {:?}", self.id(), self.state, state);
        self.state = state;
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// The peer at `index` in join order.
    pub fn peer(&self, index: usize) -> Result<Arc<LinkChannel>, SessionError> {
        self.handle.peer(index)
    }

    /// Both peers, first-joined first.
    pub fn linked_pair(&self) -> Result<(Arc<LinkChannel>, Arc<LinkChannel>), SessionError> {
        Ok((self.peer(0)?, self.peer(1)?))
    }

    /// Suspends until `count` peers have joined.
    pub async fn wait_for_peers(&self, count: usize) -> Result<(), SessionError> {
        self.handle.wait_for_peers(count).await
    }

    /// Runs `action` once per peer, concurrently, and waits for every one
    /// of them to finish before returning.
    ///
    /// Results come back in join order.  If any action failed, the first
    /// failure in join order is returned instead, except that a fault (such
    /// as a timeout) wins over teardown fallout: one peer timing out closes
    /// the session, which fails the other peer's action with
    /// [`LinkError::PeerClosed`](crate::link::LinkError::PeerClosed).
    ///
    /// All actions finish before this returns, so each peer's exchanges
    /// stay strictly sequential across successive calls.
    pub async fn for_all_peers<F, Fut, T, E>(&self, action: F) -> Result<Vec<T>, SessionError>
    where
        F: FnMut(Arc<LinkChannel>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        SessionError: From<E>,
    {
        if self.handle.is_ended() {
            return Err(SessionError::Ended {
                session_id: self.id().to_string(),
            });
        }
        let results = join_all(self.handle.peers().into_iter().map(action)).await;

        let mut values = Vec::with_capacity(results.len());
        let mut fallout = None;
        for result in results {
            match result.map_err(SessionError::from) {
                Ok(value) => values.push(value),
                Err(e) if e.is_teardown() => {
                    fallout.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match fallout {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    /// Runs the handler for the current state once.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoHandlerForState`] if the protocol registered no
    /// handler for the current state, otherwise whatever the handler returns.
    pub async fn step(&mut self) -> Result<(), SessionError> {
        let state = self.state;
        let handler = P::handlers()
            .get(state)
            .ok_or_else(|| SessionError::NoHandlerForState {
                protocol: P::NAME,
                state: format!("{state:?}"),
            })?;
        handler(self).await
    }

    /// Drives the session until it ends.
    ///
    /// Returns `Ok(())` when the session ended normally, including when a
    /// handler failed *because* the session was being torn down (a peer left
    /// and the survivor was force-closed).  Returns `Err` for a fault, such
    /// as a peer going silent, even when that fault is what ended the
    /// session; it has already been logged and the session ended.
    ///
    /// Takes `self` by value so a session can only be driven once.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let handle = self.handle.clone();
        while !handle.is_ended() {
            let result = {
                let step = self.step();
                tokio::pin!(step);
                let finished = tokio::select! {
                    result = &mut step => Some(result),
                    _ = handle.ended() => None,
                };
                match finished {
                    Some(result) => result,
                    // A timed-out peer closes itself and ends the session
                    // before its error has made it out of the handler.
                    None => match time::timeout(TEARDOWN_GRACE, step).await {
                        Ok(result) => result,
                        Err(_) => Err(SessionError::Ended {
                            session_id: handle.id().to_string(),
                        }),
                    },
                }
            };

            if let Err(e) = result {
                if e.is_teardown() {
                    debug!(
                        "session '{}' stopped in state {:?} after teardown: {e}",
                        self.id(),
                        self.state
                    );
                    handle.end();
                    return Ok(());
                }
                error!(
                    "error handling state {:?} in session '{}': {e}",
                    self.state,
                    self.id()
                );
                handle.end();
                return Err(e);
            }

            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

impl<P: GameProtocol + fmt::Debug> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .finish()
    }
}

//! # gbplay-core
//!
//! Link-cable relay primitives for GBPlay: the byte exchange channel that
//! stands in for one end of a Game Boy link cable, the generic session state
//! machine that sequences a two-player game, and the concrete game protocols
//! that drive it.
//!
//! This crate knows nothing about TCP listeners or session matchmaking.  The
//! `gbplay-server` crate owns those concerns and hands accepted streams in.
//!
//! # Architecture overview (for beginners)
//!
//! Two Game Boys normally talk over a serial cable: one side clocks a byte
//! out and, at the same instant, clocks the other side's byte in.  GBPlay
//! replaces the cable with a network connection per console and a server in
//! the middle that plays "cable" for both of them.
//!
//! - **`link`** – One [`LinkChannel`] per connected console.  Its only
//!   primitive is [`LinkChannel::exchange_byte`]: send one byte, wait for the
//!   one byte that comes back.  Everything else (polling, bulk sends,
//!   bridging two consoles) is built from that.
//!
//! - **`session`** – A [`Session`] owns up to two channels and a current
//!   state, and repeatedly calls the handler registered for that state.
//!   Handlers are plain async functions collected in a [`HandlerTable`] that
//!   each game builds once and shares between all of its sessions.
//!
//! - **`games`** – Concrete protocols.  [`games::tetris`] is the reference
//!   implementation: menu handshakes, the randomized garbage board and piece
//!   queue, in-game bridging, and round/match bookkeeping.

pub mod games;
pub mod link;
pub mod session;

// Re-export the most-used types at the crate root so callers can write
// `gbplay_core::LinkChannel` instead of `gbplay_core::link::channel::LinkChannel`.
pub use games::tetris::{Tetris, TetrisSettings, TetrisState};
pub use link::{LinkChannel, LinkError, LinkSettings};
pub use session::{
    GameProtocol, HandlerFuture, HandlerTable, Session, SessionError, SessionEvent, SessionHandle,
    StateHandler, MAX_PEERS,
};

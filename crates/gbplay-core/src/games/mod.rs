//! Concrete game protocols.
//!
//! Each game is a [`GameProtocol`](crate::session::GameProtocol)
//! implementation with its own state enum, control bytes and handler table.

pub mod tetris;

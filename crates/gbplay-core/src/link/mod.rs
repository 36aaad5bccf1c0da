//! Byte exchange channel: one peer's end of the emulated link cable.
//!
//! # Sub-modules
//!
//! - **`channel`** – [`LinkChannel`], the request/response wrapper around a
//!   raw byte stream, plus the pacing and timeout settings that shape it.
//!
//! - **`error`** – [`LinkError`], returned when an exchange cannot complete.

pub mod channel;
pub mod error;

pub use channel::{LinkChannel, LinkSettings, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_PACING};
pub use error::LinkError;

//! # Live Speech Service
//!
//! Client side of the hosted real-time speech API.
//!
//! - **protocol**: the JSON messages, and parsing of inbound frames into events
//! - **client**: the WebSocket connection task and the [`SessionProvider`] it implements
//!
//! The session manager only sees the [`SessionProvider`] trait. Everything that
//! comes back (open, events, failure, close) is delivered asynchronously as a
//! [`crate::session::events::SessionSignal`] tagged with the epoch passed to `open`.

pub mod client;
pub mod protocol;

use crate::error::SessionError;
use protocol::{ClientMessage, LiveSetup};

/// A bidirectional session with the remote speech service.
pub trait SessionProvider {
    /// Begin connecting. Returns once the attempt is under way; the outcome
    /// arrives later as a signal tagged with `epoch`.
    fn open(&mut self, epoch: u64, setup: &LiveSetup) -> Result<(), SessionError>;

    /// Queue one message on the current connection.
    fn send(&mut self, message: ClientMessage) -> Result<(), SessionError>;

    /// Close the current connection. A no-op when nothing is open.
    fn close(&mut self) -> Result<(), SessionError>;
}

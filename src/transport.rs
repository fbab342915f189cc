//! Socket abstraction for the realtime layer.
//!
//! The [`Transport`] trait is a bidirectional text message channel between the
//! client and a realtime server. The Pusher channel protocol spoken by
//! [`PusherConnection`](crate::realtime::pusher::PusherConnection) is JSON
//! text frames, so every implementation must handle framing internally.
//!
//! # Connection Setup
//!
//! Connection setup is NOT part of this trait. Construct a connected transport
//! externally (for example with
//! [`WebSocketTransport::connect`](crate::transports::WebSocketTransport::connect)
//! and [`RealtimeConfig::socket_url`](crate::realtime::pusher::RealtimeConfig::socket_url)),
//! then pass it to `PusherConnection::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use arena_client::error::ArenaError;
//! use arena_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ArenaError> {
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ArenaError>> {
//!         // Return None when the connection is closed cleanly
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ArenaError> {
//!         unimplemented!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ArenaError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete frame and
/// each call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. Cancelling it must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), ArenaError>;

    /// Receive the next text frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame
    /// - `Some(Err(e))`: a transport error
    /// - `None`: the server closed the connection cleanly
    ///
    /// A close carrying a Pusher protocol code (4000-4299) is reported as
    /// [`ArenaError::ServerClosed`] rather than `None`.
    async fn recv(&mut self) -> Option<Result<String, ArenaError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), ArenaError>;
}

/// What the Pusher protocol asks of a client whose socket was closed with a
/// given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// 4000-4099: the connection was refused. Reconnecting with the same
    /// settings will fail again.
    Refused,
    /// 4100-4199: reconnect after backing off.
    Backoff,
    /// 4200-4299: reconnect right away.
    Reconnect,
    /// Any other code, including a normal close.
    Closed,
}

impl CloseAction {
    /// Classify a WebSocket close code.
    pub fn from_code(code: u16) -> Self {
        match code {
            4000..=4099 => Self::Refused,
            4100..=4199 => Self::Backoff,
            4200..=4299 => Self::Reconnect,
            _ => Self::Closed,
        }
    }

    /// `true` for the ranges that invite a reconnect.
    pub fn should_reconnect(self) -> bool {
        matches!(self, Self::Backoff | Self::Reconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_map_to_protocol_ranges() {
        assert_eq!(CloseAction::from_code(1000), CloseAction::Closed);
        assert_eq!(CloseAction::from_code(4001), CloseAction::Refused);
        assert_eq!(CloseAction::from_code(4099), CloseAction::Refused);
        assert_eq!(CloseAction::from_code(4100), CloseAction::Backoff);
        assert_eq!(CloseAction::from_code(4201), CloseAction::Reconnect);
        assert_eq!(CloseAction::from_code(4300), CloseAction::Closed);
    }

    #[test]
    fn only_backoff_and_reconnect_invite_a_retry() {
        assert!(!CloseAction::Refused.should_reconnect());
        assert!(CloseAction::Backoff.should_reconnect());
        assert!(CloseAction::Reconnect.should_reconnect());
        assert!(!CloseAction::Closed.should_reconnect());
    }
}

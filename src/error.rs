//! Error types for the Arena client.
//!
//! Two families live here:
//!
//! - [`ArenaError`] covers construction and realtime failures returned through
//!   [`Result`].
//! - [`ErrorResponse`] is the canonical shape every REST failure is converted
//!   into before it reaches caller code (see [`crate::normalize`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::transport::CloseAction;

/// Errors that can occur when building clients or driving realtime channels.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// The configured base URL is not a well-formed absolute URL.
    #[error("invalid base URL '{value}': {reason}")]
    InvalidBaseUrl {
        /// The rejected value, verbatim.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The client key cannot be sent as an HTTP header value.
    #[error("invalid client key: {0}")]
    InvalidClientKey(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Failed to send a frame through the realtime transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the realtime transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The realtime transport was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The realtime connection is gone.
    #[error("not connected to realtime server")]
    NotConnected,

    /// The realtime server closed the socket with a Pusher protocol code.
    #[error("realtime server closed the connection ({code}): {reason}")]
    ServerClosed {
        /// WebSocket close code.
        code: u16,
        /// Reason text sent with the close frame.
        reason: String,
        /// What the protocol expects the client to do next.
        action: CloseAction,
    },

    /// Opening a channel failed.
    #[error("failed to subscribe to {channel}: {message}")]
    Subscription {
        /// Channel that could not be opened.
        channel: String,
        /// Human-readable reason.
        message: String,
    },

    /// The backend refused to sign a private channel subscription.
    #[error("channel authorization failed: {0}")]
    ChannelAuthorization(ErrorResponse),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Arena client operations.
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Field-level validation messages keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// The single error shape surfaced by every REST call.
///
/// Serializes to `{ "message": .., "error_code": .., "errors": .. }` with the
/// optional members omitted when absent, matching what the backend sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ErrorResponse {
    /// Human-readable description. Never empty once normalized.
    pub message: String,
    /// Machine-readable code (`NETWORK_ERROR`, `HTTP_404`, `VALIDATION_ERROR`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Per-field validation messages, when the backend supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl ErrorResponse {
    /// Create an error with a message and code and no field errors.
    pub fn new(message: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: Some(error_code.into()),
            errors: None,
        }
    }

    /// Attach field-level validation messages.
    #[must_use]
    pub fn with_errors(mut self, errors: FieldErrors) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Typed view of [`error_code`](Self::error_code).
    pub fn code(&self) -> Option<ErrorCode> {
        self.error_code.as_deref().map(ErrorCode::parse)
    }

    /// Messages recorded against a single field, if any.
    pub fn field_errors(&self, field: &str) -> Option<&[String]> {
        self.errors
            .as_ref()
            .and_then(|errors| errors.get(field))
            .map(Vec::as_slice)
    }

    /// Returns `true` when the failure came from an HTTP 401 or the backend
    /// labelled it `UNAUTHORIZED`.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::Http(401)) | Some(ErrorCode::Unauthorized)
        )
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_absent_members() {
        let err = ErrorResponse {
            message: "boom".into(),
            error_code: None,
            errors: None,
        };
        assert_eq!(serde_json::to_string(&err).unwrap(), r#"{"message":"boom"}"#);
    }

    #[test]
    fn field_errors_lookup() {
        let mut errors = FieldErrors::new();
        errors.insert("name".into(), vec!["is required".into()]);
        let err = ErrorResponse::new("invalid", "VALIDATION_ERROR").with_errors(errors);

        assert_eq!(err.field_errors("name"), Some(&["is required".to_string()][..]));
        assert!(err.field_errors("email").is_none());
        assert_eq!(err.code(), Some(ErrorCode::ValidationError));
    }

    #[test]
    fn unauthorized_detection() {
        assert!(ErrorResponse::new("nope", "HTTP_401").is_unauthorized());
        assert!(ErrorResponse::new("nope", "UNAUTHORIZED").is_unauthorized());
        assert!(!ErrorResponse::new("nope", "HTTP_403").is_unauthorized());
    }

    #[test]
    fn display_shows_message() {
        let err = ErrorResponse::new("Lobby is full", "LOBBY_FULL");
        assert_eq!(err.to_string(), "Lobby is full");

        let arena = ArenaError::ChannelAuthorization(err);
        assert_eq!(arena.to_string(), "channel authorization failed: Lobby is full");
    }
}

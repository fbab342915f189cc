//! Error codes carried in [`ErrorResponse::error_code`](crate::ErrorResponse).
//!
//! The wire format is a plain `SCREAMING_SNAKE_CASE` string. Codes synthesized
//! by the client (`NETWORK_ERROR`, `UNKNOWN_ERROR`, `HTTP_<status>`) share the
//! field with codes the backend supplies, so unknown backend codes are kept
//! verbatim in [`ErrorCode::Other`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix of the synthesized per-status codes.
const HTTP_PREFIX: &str = "HTTP_";

/// Typed view over an `error_code` string.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Synthesized by the client
    /// No response reached the client (connectivity, timeout, DNS).
    NetworkError,
    /// A failure that was not an HTTP/transport error at all.
    UnknownError,
    /// The server answered with this status and no code of its own.
    Http(u16),

    // Supplied by the backend
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    ServerError,
    /// Any other backend code, preserved as sent.
    Other(String),
}

impl ErrorCode {
    /// Parse a wire code. Never fails; unrecognized codes become [`ErrorCode::Other`].
    pub fn parse(code: &str) -> Self {
        match code {
            "NETWORK_ERROR" => Self::NetworkError,
            "UNKNOWN_ERROR" => Self::UnknownError,
            "VALIDATION_ERROR" => Self::ValidationError,
            "UNAUTHORIZED" => Self::Unauthorized,
            "FORBIDDEN" => Self::Forbidden,
            "NOT_FOUND" => Self::NotFound,
            "SERVER_ERROR" => Self::ServerError,
            other => other
                .strip_prefix(HTTP_PREFIX)
                .and_then(|status| status.parse::<u16>().ok())
                .map_or_else(|| Self::Other(other.to_string()), Self::Http),
        }
    }

    /// The code as it appears on the wire.
    pub fn as_wire(&self) -> String {
        match self {
            Self::NetworkError => "NETWORK_ERROR".into(),
            Self::UnknownError => "UNKNOWN_ERROR".into(),
            Self::Http(status) => format!("{HTTP_PREFIX}{status}"),
            Self::ValidationError => "VALIDATION_ERROR".into(),
            Self::Unauthorized => "UNAUTHORIZED".into(),
            Self::Forbidden => "FORBIDDEN".into(),
            Self::NotFound => "NOT_FOUND".into(),
            Self::ServerError => "SERVER_ERROR".into(),
            Self::Other(code) => code.clone(),
        }
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkError => {
                "The server could not be reached. Check your connection and try again."
            }
            Self::UnknownError => "An unexpected error occurred before the request completed.",
            Self::Http(401) => "Your session is missing or has expired. Please sign in again.",
            Self::Http(403) => "You do not have permission to perform this action.",
            Self::Http(404) => "The requested resource could not be found.",
            Self::Http(422) => "The request was rejected because some fields are invalid.",
            Self::Http(429) => "Too many requests in a short time. Please slow down.",
            Self::Http(status) if *status >= 500 => {
                "The server failed to process the request. Please try again later."
            }
            Self::Http(_) => "The server rejected the request.",
            Self::ValidationError => {
                "Some fields are invalid. Check the field errors for details."
            }
            Self::Unauthorized => "Authentication is required or the session has expired.",
            Self::Forbidden => "You do not have permission to perform this action.",
            Self::NotFound => "The requested resource could not be found.",
            Self::ServerError => {
                "An internal server error occurred. Please try again or contact support."
            }
            Self::Other(_) => "The server reported an error.",
        }
    }

    /// Returns `true` for codes synthesized by the client rather than sent by
    /// the backend.
    pub fn is_client_generated(&self) -> bool {
        matches!(self, Self::NetworkError | Self::UnknownError | Self::Http(_))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::parse(&code))
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
    fn parses_synthesized_codes() {
        assert_eq!(ErrorCode::parse("NETWORK_ERROR"), ErrorCode::NetworkError);
        assert_eq!(ErrorCode::parse("UNKNOWN_ERROR"), ErrorCode::UnknownError);
        assert_eq!(ErrorCode::parse("HTTP_503"), ErrorCode::Http(503));
    }

    #[test]
    fn malformed_http_code_is_kept_verbatim() {
        assert_eq!(
            ErrorCode::parse("HTTP_TEAPOT"),
            ErrorCode::Other("HTTP_TEAPOT".into())
        );
    }

    #[test]
    fn unknown_backend_code_survives_serde() {
        let code: ErrorCode = serde_json::from_str(r#""LOBBY_FULL""#).unwrap();
        assert_eq!(code, ErrorCode::Other("LOBBY_FULL".into()));
        assert_eq!(serde_json::to_string(&code).unwrap(), r#""LOBBY_FULL""#);
    }

    #[test]
    fn backend_codes_are_not_client_generated() {
        assert!(ErrorCode::Http(500).is_client_generated());
        assert!(ErrorCode::NetworkError.is_client_generated());
        assert!(!ErrorCode::ValidationError.is_client_generated());
        assert!(!ErrorCode::Other("X".into()).is_client_generated());
    }

    #[test]
    fn every_code_has_a_description() {
        let codes = [
            ErrorCode::NetworkError,
            ErrorCode::UnknownError,
            ErrorCode::Http(401),
            ErrorCode::Http(418),
            ErrorCode::Http(502),
            ErrorCode::ValidationError,
            ErrorCode::Unauthorized,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::ServerError,
            ErrorCode::Other("X".into()),
        ];
        for code in codes {
            assert!(!code.description().is_empty(), "{code:?} has no description");
            assert_eq!(ErrorCode::parse(&code.as_wire()), code);
        }
    }
}

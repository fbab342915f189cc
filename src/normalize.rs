//! Conversion of every failure path into an [`ErrorResponse`].
//!
//! [`normalize`] is total: it never panics and always yields a non-empty
//! `message` and a defined `error_code`.

use serde_json::Value;

use crate::error::{ErrorResponse, FieldErrors};
use crate::error_codes::ErrorCode;

const NETWORK_FALLBACK: &str = "Network request failed";
const UNKNOWN_FALLBACK: &str = "An unknown error occurred";

/// A failure as observed by the HTTP layer, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawError {
    /// No response was received (connection refused, timeout, DNS failure).
    Network {
        /// Transport-provided description, possibly empty.
        message: String,
    },
    /// The server answered with a non-2xx status.
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body, possibly empty or not JSON.
        body: Vec<u8>,
    },
    /// Something failed before a request could be sent or after a response
    /// arrived (encoding a body, building the request, decoding the result).
    Setup {
        /// Description of the failure, if one is available.
        message: Option<String>,
    },
}

impl RawError {
    /// Shorthand for [`RawError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Shorthand for [`RawError::Setup`] with a message.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: Some(message.into()),
        }
    }

    /// The HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Map any [`RawError`] into the canonical [`ErrorResponse`].
///
/// Branches, in priority order:
///
/// 1. no response: `NETWORK_ERROR`
/// 2. response whose JSON body carries a non-empty string `message`: the
///    body's `message`, its own `error_code` or `HTTP_<status>`, and its
///    `errors` map when well-formed
/// 3. any other response: `Request failed with status <status>` / `HTTP_<status>`
/// 4. not a transport error: `UNKNOWN_ERROR`
pub fn normalize(raw: &RawError) -> ErrorResponse {
    match raw {
        RawError::Network { message } => ErrorResponse::new(
            non_empty_or(message, NETWORK_FALLBACK),
            ErrorCode::NetworkError.as_wire(),
        ),
        RawError::Http { status, body } => {
            normalize_http(*status, body).unwrap_or_else(|| {
                ErrorResponse::new(
                    format!("Request failed with status {status}"),
                    ErrorCode::Http(*status).as_wire(),
                )
            })
        }
        RawError::Setup { message } => ErrorResponse::new(
            non_empty_or(message.as_deref().unwrap_or_default(), UNKNOWN_FALLBACK),
            ErrorCode::UnknownError.as_wire(),
        ),
    }
}

/// Branch 2. Returns `None` when the body does not have the expected shape.
fn normalize_http(status: u16, body: &[u8]) -> Option<ErrorResponse> {
    let Value::Object(map) = serde_json::from_slice::<Value>(body).ok()? else {
        return None;
    };

    let message = map
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())?;

    let error_code = map
        .get("error_code")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map_or_else(|| ErrorCode::Http(status).as_wire(), str::to_string);

    let errors = map.get("errors").and_then(|errors| {
        serde_json::from_value::<FieldErrors>(errors.clone())
            .map_err(|e| tracing::debug!(status, error = %e, "ignoring malformed field errors"))
            .ok()
    });

    Some(ErrorResponse {
        message: message.to_string(),
        error_code: Some(error_code),
        errors,
    })
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
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

    fn http(status: u16, body: &str) -> RawError {
        RawError::Http {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn network_error_keeps_transport_message() {
        let err = normalize(&RawError::network("connection refused"));
        assert_eq!(err.message, "connection refused");
        assert_eq!(err.error_code.as_deref(), Some("NETWORK_ERROR"));
        assert!(err.errors.is_none());
    }

    #[test]
    fn network_error_without_message_uses_fallback() {
        let err = normalize(&RawError::network(""));
        assert_eq!(err.message, "Network request failed");
    }

    #[test]
    fn standard_body_passes_through() {
        let err = normalize(&http(
            422,
            r#"{"message":"X","error_code":"Y","errors":{"a":["b"]}}"#,
        ));
        assert_eq!(err.message, "X");
        assert_eq!(err.error_code.as_deref(), Some("Y"));
        assert_eq!(err.field_errors("a"), Some(&["b".to_string()][..]));
    }

    #[test]
    fn standard_body_without_code_synthesizes_one() {
        let err = normalize(&http(404, r#"{"message":"Game not found"}"#));
        assert_eq!(err.message, "Game not found");
        assert_eq!(err.error_code.as_deref(), Some("HTTP_404"));
        assert!(err.errors.is_none());
    }

    #[test]
    fn non_standard_body_gets_generic_message() {
        let err = normalize(&http(500, r#"{"error":"oops"}"#));
        assert_eq!(err.message, "Request failed with status 500");
        assert_eq!(err.error_code.as_deref(), Some("HTTP_500"));
    }

    #[test]
    fn empty_and_non_json_bodies_get_generic_message() {
        for body in ["", "<html>Bad Gateway</html>", "[1,2]", r#""message""#] {
            let err = normalize(&http(502, body));
            assert_eq!(err.message, "Request failed with status 502", "body {body:?}");
            assert_eq!(err.error_code.as_deref(), Some("HTTP_502"));
        }
    }

    #[test]
    fn non_string_message_is_not_standard() {
        let err = normalize(&http(400, r#"{"message":42}"#));
        assert_eq!(err.message, "Request failed with status 400");
    }

    #[test]
    fn empty_message_is_not_standard() {
        let err = normalize(&http(400, r#"{"message":"","error_code":"VALIDATION_ERROR"}"#));
        assert_eq!(err.message, "Request failed with status 400");
        assert_eq!(err.error_code.as_deref(), Some("HTTP_400"));
    }

    #[test]
    fn malformed_field_errors_are_dropped() {
        let err = normalize(&http(422, r#"{"message":"bad","errors":{"a":"b"}}"#));
        assert_eq!(err.message, "bad");
        assert!(err.errors.is_none());
    }

    #[test]
    fn setup_failure_is_unknown_error() {
        let err = normalize(&RawError::setup("body is not serializable"));
        assert_eq!(err.message, "body is not serializable");
        assert_eq!(err.error_code.as_deref(), Some("UNKNOWN_ERROR"));

        let err = normalize(&RawError::Setup { message: None });
        assert_eq!(err.message, "An unknown error occurred");
    }

    #[test]
    fn every_branch_yields_message_and_code() {
        let inputs = [
            RawError::network(""),
            http(401, r#"{"message":"Unauthenticated."}"#),
            http(503, "upstream timeout"),
            RawError::Setup { message: None },
        ];
        for raw in &inputs {
            let err = normalize(raw);
            assert!(!err.message.is_empty(), "{raw:?}");
            assert!(err.error_code.is_some(), "{raw:?}");
        }
    }

    #[test]
    fn status_accessor() {
        assert_eq!(http(418, "").status(), Some(418));
        assert_eq!(RawError::network("x").status(), None);
    }
}

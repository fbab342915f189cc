//! Request/response transport abstraction for the REST surface.
//!
//! [`HttpTransport`] is the black-box HTTP collaborator: it performs exactly
//! one call and reports either a response (any status) or a [`RawError`] when
//! no response could be obtained. Status inspection, header injection and
//! error normalization all happen in [`ApiClient`](crate::ApiClient), so a
//! custom transport never has to reimplement them.
//!
//! The default implementation is
//! [`ReqwestTransport`](crate::transports::ReqwestTransport).

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};

use crate::normalize::RawError;

/// A fully decorated outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL (base URL already applied).
    pub url: String,
    pub headers: HeaderMap,
    /// Encoded JSON body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Value of a header as a string, when present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response as received from the server, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Build a response with no headers.
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Build a response carrying a JSON body.
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Performs a single HTTP call.
///
/// # Errors
///
/// Return [`RawError::Network`] when no response was received and
/// [`RawError::Setup`] when the request could not be built. A response with a
/// failing status is **not** an error at this layer.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RawError>;
}

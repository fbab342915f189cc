//! [`HttpTransport`] implementation backed by `reqwest`.

use async_trait::async_trait;

use crate::error::{ArenaError, Result};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::normalize::RawError;

/// Performs calls with a shared [`reqwest::Client`].
///
/// Status codes are returned as-is; only failures that produce no response
/// become errors.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with `reqwest`'s default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::HttpClient`] if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arena-client-rust/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArenaError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (custom timeouts, proxies, TLS roots).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, RawError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| RawError::network(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Builder errors never reached the network; everything else did.
fn classify(error: reqwest::Error) -> RawError {
    if error.is_builder() {
        RawError::setup(error.to_string())
    } else {
        RawError::network(error.to_string())
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
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(method: Method, url: String, body: Option<&str>) -> HttpRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-key", "ck_test".parse().unwrap());
        HttpRequest {
            method,
            url,
            headers,
            body: body.map(|b| b.as_bytes().to_vec()),
        }
    }

    #[tokio::test]
    async fn forwards_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lobbies"))
            .and(header("x-client-key", "ck_test"))
            .and(body_string(r#"{"name":"friday"}"#))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":"L1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .execute(request(
                Method::POST,
                format!("{}/lobbies", server.uri()),
                Some(r#"{"name":"friday"}"#),
            ))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 201);
        assert_eq!(response.body, br#"{"id":"L1"}"#);
    }

    #[tokio::test]
    async fn failing_status_is_not_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .execute(request(Method::GET, format!("{}/games/1", server.uri()), None))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 503);
        assert_eq!(response.body, b"maintenance");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .execute(request(Method::GET, "http://127.0.0.1:1/".into(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, RawError::Network { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_url_is_setup_error() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .execute(request(Method::GET, "not a url".into(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, RawError::Setup { .. }), "{err:?}");
    }
}

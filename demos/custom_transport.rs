//! # Custom Transport Example
//!
//! Shows how to implement the [`HttpTransport`] trait with an in-process
//! fake backend. This is useful for:
//!
//! - **Testing**: exercise code that talks to the API without a server
//! - **Custom backends**: adapt any HTTP stack the host already ships
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use arena_client::{
    ApiClient, ClientConfig, HttpRequest, HttpResponse, HttpTransport, MemoryTokenStorage,
    RawError, TokenStorage,
};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define an in-process backend
// ─────────────────────────────────────────────────────────────────────

/// A fake API that knows one lobby and one valid session token.
struct FakeBackend {
    valid_token: String,
}

impl FakeBackend {
    fn route(&self, request: &HttpRequest) -> HttpResponse {
        let expected = format!("Bearer {}", self.valid_token);
        if request.header("authorization") != Some(expected.as_str()) {
            return HttpResponse::json(StatusCode::UNAUTHORIZED, &json!({"message": "Unauthenticated."}));
        }

        match (&request.method, request.url.rsplit('/').next()) {
            (&Method::GET, Some("01HW3K")) => HttpResponse::json(
                StatusCode::OK,
                &json!({"id": "01HW3K", "game_title": "hearts", "players": 3}),
            ),
            (&Method::POST, Some("lobbies")) => HttpResponse::json(
                StatusCode::UNPROCESSABLE_ENTITY,
                &json!({
                    "message": "The given data was invalid.",
                    "error_code": "VALIDATION_ERROR",
                    "errors": {"max_players": ["The max players field must be at least 2."]},
                }),
            ),
            _ => HttpResponse::json(StatusCode::INTERNAL_SERVER_ERROR, &json!({"error": "oops"})),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the HttpTransport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl HttpTransport for FakeBackend {
    /// Answer every request in-process. A real transport reports
    /// `RawError::Network` when no response could be obtained.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RawError> {
        tracing::debug!("{} {}", request.method, request.url);
        Ok(self.route(&request))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Use the client against the fake backend
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for readable output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let storage = Arc::new(MemoryTokenStorage::with_token("good-token"));
    let backend = Arc::new(FakeBackend {
        valid_token: "good-token".into(),
    });
    let client = ApiClient::new(
        ClientConfig::new("ck_demo", storage.clone()).with_transport(backend),
    )?;

    // ── A successful call ───────────────────────────────────────────
    let lobby: Value = client.get("/lobbies/01HW3K").await?;
    tracing::info!("lobby: {lobby}");

    // ── A validation failure, passed through unchanged ──────────────
    if let Err(e) = client
        .post::<_, Value>("/lobbies", &json!({"max_players": 1}))
        .await
    {
        tracing::info!("create failed: {} {:?}", e.message, e.field_errors("max_players"));
    }

    // ── A non-standard error body ───────────────────────────────────
    if let Err(e) = client.get::<Value>("/unknown").await {
        tracing::info!("unknown route: {} ({:?})", e.message, e.error_code);
    }

    // ── An expired session: the 401 clears the stored token ─────────
    storage.set_token("expired-token".into()).await?;
    let results = futures_util::future::join_all(
        (0..3).map(|_| client.get::<Value>("/lobbies/01HW3K")),
    )
    .await;
    for result in results {
        if let Err(e) = result {
            tracing::info!("{} ({:?})", e.message, e.error_code);
        }
    }
    tracing::info!("token after 401s: {:?}", storage.get_token().await?);

    Ok(())
}

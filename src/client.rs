//! Authenticated REST client for the Arena API.
//!
//! [`ApiClient`] is a cheap, cloneable handle around a shared [`HttpTransport`]
//! and a host-supplied [`TokenStorage`]. Every call runs the same pipeline:
//!
//! 1. **Request stage**: start from the default headers
//!    (`Content-Type: application/json`), set `X-Client-Key`, and attach
//!    `Authorization: Bearer <token>` when the store holds a non-empty token.
//! 2. **Transport**: one [`HttpTransport::execute`] call.
//! 3. **Response stage**: 2xx responses pass through. Anything else runs the
//!    401 protocol (see [`UnauthorizedGuard`]) and is converted by
//!    [`normalize`] into an [`ErrorResponse`], the only error callers see.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use arena_client::{ApiClient, ClientConfig, MemoryTokenStorage};
//!
//! let storage = Arc::new(MemoryTokenStorage::with_token("session-token"));
//! let client = ApiClient::new(ClientConfig::new("ck_live_123", storage))?;
//!
//! let game: serde_json::Value = client.get("/games/01HV4Z").await?;
//! println!("{game}");
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ArenaError, ErrorResponse, Result};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::normalize::{normalize, RawError};
use crate::token::TokenStorage;
use crate::transports::ReqwestTransport;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.example.io/v1";

/// Header carrying the application's client key on every request.
pub const CLIENT_KEY_HEADER: &str = "x-client-key";

/// Default window during which repeated 401s do not clear the token again.
const DEFAULT_UNAUTHORIZED_DEBOUNCE: Duration = Duration::from_millis(1000);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for an [`ApiClient`].
///
/// `client_key` and `token_storage` are required; everything else has a
/// default.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use arena_client::{ClientConfig, MemoryTokenStorage};
///
/// let config = ClientConfig::new("ck_test", Arc::new(MemoryTokenStorage::new()))
///     .with_base_url("https://staging.example.io/v1")
///     .with_unauthorized_debounce(Duration::from_millis(500));
/// assert_eq!(config.base_url, "https://staging.example.io/v1");
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Key identifying the calling application, sent as `X-Client-Key`.
    pub client_key: String,
    /// Where the session token lives.
    pub token_storage: Arc<dyn TokenStorage>,
    /// Absolute base URL every relative path is joined onto.
    ///
    /// Defaults to [`DEFAULT_BASE_URL`].
    pub base_url: String,
    /// How long the client waits after clearing the token on a 401 before
    /// another 401 may clear it again.
    ///
    /// Defaults to **1 second**.
    pub unauthorized_debounce: Duration,
    /// Transport used to perform calls. `None` selects [`ReqwestTransport`].
    pub transport: Option<Arc<dyn HttpTransport>>,
}

impl ClientConfig {
    /// Create a configuration with the required fields and default values.
    pub fn new(client_key: impl Into<String>, token_storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            client_key: client_key.into(),
            token_storage,
            base_url: DEFAULT_BASE_URL.to_string(),
            unauthorized_debounce: DEFAULT_UNAUTHORIZED_DEBOUNCE,
            transport: None,
        }
    }

    /// Set the base URL. Validated when the client is built.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the 401 debounce window.
    #[must_use]
    pub fn with_unauthorized_debounce(mut self, window: Duration) -> Self {
        self.unauthorized_debounce = window;
        self
    }

    /// Use a custom [`HttpTransport`] instead of `reqwest`.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("unauthorized_debounce", &self.unauthorized_debounce)
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

// ── 401 guard ───────────────────────────────────────────────────────

/// Two-state debounce (`idle` / `clearing`) around token clearing on 401.
///
/// The first 401 seen while idle flips the guard to clearing and clears the
/// token. Once the clear call settles, successfully or not, a reset back to
/// idle is scheduled after the configured window. Any 401 that lands while
/// the guard is clearing skips the clear call.
///
/// The flip is a compare-and-swap, so 401s racing on different worker
/// threads still coalesce into a single clear per window.
#[derive(Debug)]
pub struct UnauthorizedGuard {
    clearing: Arc<AtomicBool>,
    window: Duration,
}

impl UnauthorizedGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            clearing: Arc::new(AtomicBool::new(false)),
            window,
        }
    }

    /// Returns `true` while a clear is in progress or its window is open.
    pub fn is_clearing(&self) -> bool {
        self.clearing.load(Ordering::Acquire)
    }

    /// The debounce window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run `clear` unless the guard is already clearing.
    ///
    /// Returns `true` if this call performed the clear.
    pub async fn run<F, Fut>(&self, clear: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if self
            .clearing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("token clear already in progress; skipping");
            return false;
        }

        let _reset = ResetOnDrop(self);
        clear().await;
        true
    }

    fn schedule_reset(&self) {
        let clearing = Arc::clone(&self.clearing);
        let window = self.window;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(window).await;
                    clearing.store(false, Ordering::Release);
                    debug!("401 guard reset to idle");
                });
            }
            Err(_) => {
                warn!("no tokio runtime to schedule the 401 guard reset; resetting now");
                clearing.store(false, Ordering::Release);
            }
        }
    }
}

/// Schedules the guard's reset when dropped, whether `clear` finished or
/// the request future was cancelled mid-clear.
struct ResetOnDrop<'a>(&'a UnauthorizedGuard);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.schedule_reset();
    }
}

// ── Client handle ───────────────────────────────────────────────────

struct ClientInner {
    base_url: String,
    client_key: String,
    client_key_header: HeaderValue,
    default_headers: HeaderMap,
    token_storage: Arc<dyn TokenStorage>,
    transport: Arc<dyn HttpTransport>,
    guard: UnauthorizedGuard,
}

/// Handle to the Arena REST API.
///
/// Clones share the transport, the token store and the 401 guard.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Build a client from `config`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidBaseUrl`] if `base_url` is not an absolute
    ///   `http`/`https` URL. The error names the rejected value.
    /// - [`ArenaError::InvalidClientKey`] if `client_key` is not a valid
    ///   header value.
    /// - [`ArenaError::HttpClient`] if the default transport cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        validate_base_url(&config.base_url)?;

        let client_key_header = HeaderValue::from_str(&config.client_key)
            .map_err(|e| ArenaError::InvalidClientKey(e.to_string()))?;

        let transport: Arc<dyn HttpTransport> = match config.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(base_url = %config.base_url, "API client created");

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url: config.base_url,
                client_key: config.client_key,
                client_key_header,
                default_headers,
                token_storage: config.token_storage,
                transport,
                guard: UnauthorizedGuard::new(config.unauthorized_debounce),
            }),
        })
    }

    // ── Verbs ───────────────────────────────────────────────────────

    /// `GET path`, decoding the JSON response.
    ///
    /// # Errors
    ///
    /// Any failure, normalized into an [`ErrorResponse`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, ErrorResponse> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Any failure, normalized into an [`ErrorResponse`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, ErrorResponse>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    /// `PUT path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Any failure, normalized into an [`ErrorResponse`].
    pub async fn put<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, ErrorResponse>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// `PATCH path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Any failure, normalized into an [`ErrorResponse`].
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, ErrorResponse>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// `DELETE path`.
    ///
    /// # Errors
    ///
    /// Any failure, normalized into an [`ErrorResponse`].
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> std::result::Result<T, ErrorResponse> {
        self.request::<(), T>(Method::DELETE, path, None).await
    }

    /// Perform a call and decode its JSON response into `T`.
    ///
    /// An empty success body decodes as JSON `null`, so `T = ()` works for
    /// `204 No Content`.
    ///
    /// # Errors
    ///
    /// Any failure, normalized into an [`ErrorResponse`]. Encoding the body or
    /// decoding the response are reported as `UNKNOWN_ERROR`.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> std::result::Result<T, ErrorResponse>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| normalize(&RawError::setup(format!("failed to encode request body: {e}"))))?;

        let response = self.send(method, path, body).await?;
        decode_body(&response.body)
    }

    /// Perform a call with an already-encoded body and return the raw
    /// response.
    ///
    /// # Errors
    ///
    /// Non-2xx statuses and transport failures, normalized into an
    /// [`ErrorResponse`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> std::result::Result<HttpResponse, ErrorResponse> {
        let request = self.prepare(method, path, body).await;
        debug!(method = %request.method, url = %request.url, "sending request");

        match self.inner.transport.execute(request).await {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(self
                .reject(RawError::Http {
                    status: response.status.as_u16(),
                    body: response.body,
                })
                .await),
            Err(raw) => Err(self.reject(raw).await),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The effective base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The configured client key.
    pub fn client_key(&self) -> &str {
        &self.inner.client_key
    }

    /// The token store this client reads from.
    pub fn token_storage(&self) -> &Arc<dyn TokenStorage> {
        &self.inner.token_storage
    }

    /// Returns `true` while the 401 guard is in its clearing window.
    pub fn is_clearing_token(&self) -> bool {
        self.inner.guard.is_clearing()
    }

    /// Resolve `path` against the base URL.
    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.inner.base_url, path)
    }

    // ── Pipeline stages ─────────────────────────────────────────────

    /// Request stage: default headers, client key, and bearer token.
    async fn prepare(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> HttpRequest {
        let mut headers = self.inner.default_headers.clone();
        headers.insert(
            HeaderName::from_static(CLIENT_KEY_HEADER),
            self.inner.client_key_header.clone(),
        );

        match self.inner.token_storage.get_token().await {
            Ok(Some(token)) if !token.is_empty() => {
                match HeaderValue::from_str(&format!("Bearer {token}")) {
                    Ok(mut value) => {
                        value.set_sensitive(true);
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(e) => {
                        warn!(error = %e, "stored token is not a valid header value; sending request unauthenticated");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "failed to read token; sending request unauthenticated");
            }
        }

        HttpRequest {
            method,
            url: self.url_for(path),
            headers,
            body,
        }
    }

    /// Response stage for failures: 401 protocol, then normalization.
    async fn reject(&self, raw: RawError) -> ErrorResponse {
        if raw.status() == Some(401) {
            let storage = &self.inner.token_storage;
            self.inner
                .guard
                .run(|| async {
                    debug!("received 401; clearing stored token");
                    if let Err(e) = storage.clear_token().await {
                        warn!(error = %e, "failed to clear token after 401");
                    }
                })
                .await;
        }
        normalize(&raw)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("clearing_token", &self.is_clearing_token())
            .finish_non_exhaustive()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn validate_base_url(value: &str) -> Result<()> {
    let invalid = |reason: String| ArenaError::InvalidBaseUrl {
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("URL cannot be used as a base".into()));
    }
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(invalid(format!("unsupported scheme '{scheme}'"))),
    }
}

/// Join a request path onto the base URL with exactly one `/` between them.
/// Absolute URLs are returned unchanged.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if is_absolute_url(path) {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn is_absolute_url(path: &str) -> bool {
    if path.starts_with("//") {
        return true;
    }
    match path.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<T, ErrorResponse> {
    let decoded = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(body)
    };
    decoded.map_err(|e| normalize(&RawError::setup(format!("failed to decode response body: {e}"))))
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::token::MemoryTokenStorage;
    use std::sync::atomic::AtomicUsize;

    fn config() -> ClientConfig {
        ClientConfig::new("ck_test", Arc::new(MemoryTokenStorage::new()))
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.client_key, "ck_test");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.unauthorized_debounce, Duration::from_secs(1));
        assert!(config.transport.is_none());
    }

    #[test]
    fn rejects_relative_base_url() {
        let err = ApiClient::new(config().with_base_url("not-a-valid-url")).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidBaseUrl { .. }));
        assert!(err.to_string().contains("not-a-valid-url"));
    }

    #[test]
    fn rejects_non_http_base_url() {
        for value in ["ftp://files.example.io", "mailto:ops@example.io"] {
            let err = ApiClient::new(config().with_base_url(value)).unwrap_err();
            assert!(
                matches!(err, ArenaError::InvalidBaseUrl { value: ref v, .. } if v == value),
                "{value}: {err}"
            );
        }
    }

    #[test]
    fn rejects_client_key_with_control_characters() {
        let mut config = config();
        config.client_key = "ck\nbad".into();
        let err = ApiClient::new(config).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidClientKey(_)));
    }

    #[test]
    fn valid_base_url_becomes_effective() {
        let client = ApiClient::new(config().with_base_url("http://localhost:8000/api")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url_for("/lobbies"), "http://localhost:8000/api/lobbies");
    }

    #[test]
    fn join_url_collapses_slashes() {
        assert_eq!(join_url("https://a.io/v1", "games"), "https://a.io/v1/games");
        assert_eq!(join_url("https://a.io/v1/", "/games"), "https://a.io/v1/games");
        assert_eq!(join_url("https://a.io/v1//", "//games/1"), "https://a.io/v1/games/1");
        assert_eq!(join_url("https://a.io/v1", ""), "https://a.io/v1");
    }

    #[test]
    fn join_url_keeps_absolute_paths() {
        assert_eq!(
            join_url("https://a.io/v1", "https://cdn.a.io/x.json"),
            "https://cdn.a.io/x.json"
        );
        assert_eq!(join_url("https://a.io/v1", "//cdn.a.io/x"), "//cdn.a.io/x");
        assert_eq!(join_url("https://a.io/v1", "a b://x"), "https://a.io/v1/a b://x");
    }

    #[test]
    fn decode_empty_body_as_null() {
        let _: () = decode_body(b"").unwrap();
        let value: Option<u32> = decode_body(b" \n").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn decode_failure_is_unknown_error() {
        let err = decode_body::<u32>(b"{\"a\":1}").unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some("UNKNOWN_ERROR"));
        assert!(err.message.starts_with("failed to decode response body"));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_runs_once_per_window() {
        let guard = UnauthorizedGuard::new(Duration::from_millis(1000));
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        assert!(guard.run(move || async move { calls.fetch_add(1, Ordering::SeqCst); }).await);
        assert!(guard.is_clearing());
        assert!(!guard.run(move || async move { calls.fetch_add(1, Ordering::SeqCst); }).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(guard.is_clearing());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!guard.is_clearing());
        assert!(guard.run(move || async move { calls.fetch_add(1, Ordering::SeqCst); }).await);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_window_starts_after_clear_settles() {
        let guard = UnauthorizedGuard::new(Duration::from_millis(100));

        guard
            .run(|| async { tokio::time::sleep(Duration::from_millis(500)).await })
            .await;

        // 500ms were spent inside the clear; the window only starts now.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.is_clearing());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!guard.is_clearing());
    }
}

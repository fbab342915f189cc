//! # Arena Client
//!
//! Client core for the Arena game platform API.
//!
//! The crate has two halves that share one error shape:
//!
//! - **HTTP**: [`ApiClient`] attaches the client key and bearer token to every
//!   request, turns every failure into an [`ErrorResponse`], and clears the
//!   stored token once per burst of `401 Unauthorized` responses.
//! - **Realtime**: [`ChannelHook`](realtime::ChannelHook) keeps one private
//!   game or lobby channel subscribed for as long as its owner wants it, and
//!   invalidates the matching [`QueryKey`]s when server events arrive.
//!
//! ## Features
//!
//! - **Pluggable HTTP**: implement [`HttpTransport`] or use the built-in
//!   reqwest-backed [`ReqwestTransport`]
//! - **Pluggable storage**: implement [`TokenStorage`] for wherever the host
//!   keeps its session token
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides `WebSocketTransport` for the Pusher channel protocol
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arena_client::{ApiClient, ClientConfig, MemoryTokenStorage};
//!
//! # async fn example() -> Result<(), arena_client::ArenaError> {
//! let storage = Arc::new(MemoryTokenStorage::with_token("session-token"));
//! let client = ApiClient::new(ClientConfig::new("my-client-key", storage))?;
//!
//! match client.get::<serde_json::Value>("/games/01HV3K").await {
//!     Ok(game) => println!("{game}"),
//!     Err(error) => eprintln!("{} ({:?})", error.message, error.error_code),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod error_codes;
pub mod http;
pub mod normalize;
pub mod realtime;
pub mod token;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use cache::{MemoryQueryCache, QueryCache, QueryKey};
pub use client::{ApiClient, ClientConfig, UnauthorizedGuard};
pub use error::{ArenaError, ErrorResponse, FieldErrors};
pub use error_codes::ErrorCode;
pub use http::{HttpRequest, HttpResponse, HttpTransport};
pub use normalize::{normalize, RawError};
pub use realtime::{Broadcaster, ChannelEvent};
pub use token::{MemoryTokenStorage, TokenStorage, TokenStorageError};
pub use transport::{CloseAction, Transport};
pub use transports::ReqwestTransport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;

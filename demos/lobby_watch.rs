//! # Lobby Watch Example
//!
//! Demonstrates both halves of the client working together:
//!
//! 1. Build an authenticated REST client
//! 2. Fetch a lobby through the query cache
//! 3. Connect to the realtime server and keep the lobby's private channel open
//! 4. Refetch the lobby whenever a server event invalidates it
//! 5. Leave the channel and shut down on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! ARENA_CLIENT_KEY=ck_live_123 ARENA_TOKEN=... ARENA_LOBBY_ID=01HW3K \
//!     cargo run --example lobby_watch
//!
//! # Point at a local stack:
//! ARENA_API_URL=http://localhost:8000/api ARENA_WS_HOST=localhost ARENA_WS_PORT=8080 \
//!     ARENA_WS_TLS=false cargo run --example lobby_watch
//! ```

use std::sync::Arc;
use std::time::Duration;

use arena_client::cache::MemoryQueryCache;
use arena_client::realtime::pusher::{ApiChannelAuthorizer, PusherConnection, RealtimeConfig};
use arena_client::realtime::{ChannelHook, HookOptions};
use arena_client::{ApiClient, ClientConfig, MemoryTokenStorage, QueryKey};
use serde_json::Value;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=arena_client=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let lobby_id = env_or("ARENA_LOBBY_ID", "01HW3K");
    let storage = Arc::new(MemoryTokenStorage::new());
    if let Ok(token) = std::env::var("ARENA_TOKEN") {
        arena_client::TokenStorage::set_token(&*storage, token).await?;
    }

    let client = ApiClient::new(
        ClientConfig::new(env_or("ARENA_CLIENT_KEY", "ck_demo"), storage)
            .with_base_url(env_or("ARENA_API_URL", arena_client::client::DEFAULT_BASE_URL)),
    )?;

    let mut realtime = RealtimeConfig::new(
        env_or("ARENA_APP_KEY", "arena-app-key"),
        env_or("ARENA_WS_HOST", "ws.example.io"),
    )
    .with_tls(env_or("ARENA_WS_TLS", "true") != "false");
    if let Ok(port) = env_or("ARENA_WS_PORT", "").parse::<u16>() {
        realtime = realtime.with_port(port);
    }
    tracing::info!("Connecting to {}", realtime.socket_url());

    // ── Initial fetch ───────────────────────────────────────────────
    let cache = Arc::new(MemoryQueryCache::new());
    let key = QueryKey::lobby(&lobby_id);
    let path = format!("/lobbies/{lobby_id}");
    match cache.fetch::<Value, _, _>(key.clone(), || client.get(&path)).await {
        Ok(lobby) => tracing::info!("lobby: {lobby}"),
        Err(e) => tracing::warn!("could not load lobby: {} ({:?})", e.message, e.error_code),
    }

    // ── Realtime ────────────────────────────────────────────────────
    let authorizer = Arc::new(ApiChannelAuthorizer::new(
        client.clone(),
        &realtime.auth_endpoint,
    ));
    let connection = Arc::new(PusherConnection::connect(realtime, authorizer).await?);

    let mut hook = ChannelHook::lobby(connection.clone(), cache.clone());
    let state = hook.sync(Some(&lobby_id), HookOptions::default()).await;
    if let Some(error) = &state.error {
        tracing::error!("could not open lobby channel: {error}");
    }

    // ── Watch loop ──────────────────────────────────────────────────
    // Poll for invalidations and refetch, until Ctrl+C.
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if cache.is_stale(&key) {
                    match cache.fetch::<Value, _, _>(key.clone(), || client.get(&path)).await {
                        Ok(lobby) => tracing::info!("lobby changed: {lobby}"),
                        Err(e) => tracing::warn!("refetch failed: {}", e.message),
                    }
                }
                if !hook.state().is_connected {
                    tracing::warn!("lobby channel lost");
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving lobby channel");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    hook.teardown().await;
    connection.shutdown().await;
    tracing::info!("Done");
    Ok(())
}

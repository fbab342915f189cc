#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the realtime layer.
//!
//! The hook tests drive `ChannelHook` against the scripted `MockBroadcaster`
//! and `RecordingCache`. The protocol tests play the server side of a
//! `PusherConnection` through the in-memory socket pair from `tests/common`.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arena_client::realtime::pusher::{
    ApiChannelAuthorizer, ChannelAuthorizer, PusherConnection, RealtimeConfig,
};
use arena_client::realtime::{ChannelHook, ChannelKind, HookOptions, SubscriptionPhase};
use arena_client::{
    ApiClient, ArenaError, Broadcaster, ClientConfig, MemoryQueryCache, QueryKey,
};
use serde_json::{json, Value};

use common::{
    socket_pair, CountingTokenStorage, MockBroadcaster, MockHttpTransport, RecordingCache,
    SocketServer, StaticAuthorizer,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

/// Poll `condition` until it holds, yielding to the runtime in between.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn start_connection() -> (Arc<PusherConnection>, SocketServer, Arc<StaticAuthorizer>) {
    let (socket, server) = socket_pair();
    let authorizer = Arc::new(StaticAuthorizer::default());
    let config = RealtimeConfig::new("app-key", "localhost").with_tls(false);
    let connection = PusherConnection::start(socket, config, authorizer.clone());
    (Arc::new(connection), server, authorizer)
}

// ════════════════════════════════════════════════════════════════════
// Hook lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn mount_opens_the_channel_once_and_unmount_closes_it_once() {
    let broadcaster = MockBroadcaster::new();
    let mut hook = ChannelHook::mount(
        ChannelKind::Game,
        Some("X"),
        HookOptions::default(),
        broadcaster.clone(),
        RecordingCache::new(),
    )
    .await;

    assert!(hook.state().is_connected);
    assert_eq!(hook.channel_name(), Some("private-game.X"));

    // Re-rendering with the same inputs does nothing.
    hook.sync(Some("X"), HookOptions::default()).await;
    hook.sync(Some("X"), HookOptions::default()).await;

    let state = hook.teardown().await;
    assert!(!state.is_connected);
    assert_eq!(
        broadcaster.log(),
        vec!["subscribe private-game.X", "leave private-game.X"]
    );
    assert!(broadcaster.open_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn id_change_leaves_the_old_channel_before_opening_the_new_one() {
    let broadcaster = MockBroadcaster::new();
    broadcaster.set_leave_delay(Duration::from_millis(50));
    let mut hook = ChannelHook::lobby(broadcaster.clone(), RecordingCache::new());

    hook.sync(Some("X"), HookOptions::default()).await;
    let state = hook.sync(Some("Y"), HookOptions::default()).await;

    assert!(state.is_connected);
    assert_eq!(
        broadcaster.log(),
        vec![
            "subscribe private-lobby.X",
            "leave private-lobby.X",
            "subscribe private-lobby.Y",
        ]
    );
    assert_eq!(broadcaster.open_channels(), vec!["private-lobby.Y"]);
}

#[tokio::test]
async fn disabled_hook_holds_no_channel() {
    let broadcaster = MockBroadcaster::new();
    let mut hook = ChannelHook::game(broadcaster.clone(), RecordingCache::new());

    let state = hook.sync(Some("G1"), HookOptions::disabled()).await;
    assert!(!state.is_connected);
    assert!(broadcaster.log().is_empty());

    hook.sync(Some("G1"), HookOptions::default()).await;
    hook.sync(Some("G1"), HookOptions::disabled()).await;
    hook.sync(None, HookOptions::default()).await;

    assert_eq!(
        broadcaster.log(),
        vec!["subscribe private-game.G1", "leave private-game.G1"]
    );
    assert_eq!(hook.phase(), SubscriptionPhase::Unsubscribed);
}

#[tokio::test]
async fn subscribe_failure_surfaces_as_error_state() {
    let broadcaster = MockBroadcaster::new();
    broadcaster.fail_next(ArenaError::Subscription {
        channel: "private-game.G1".into(),
        message: "forbidden".into(),
    });
    let mut hook = ChannelHook::game(broadcaster.clone(), RecordingCache::new());

    let state = hook.sync(Some("G1"), HookOptions::default()).await;
    assert!(!state.is_connected);
    let error = state.error.expect("error should be reported");
    assert!(error.contains("forbidden"), "{error}");
    assert_eq!(hook.phase(), SubscriptionPhase::Error);

    // The error stays visible while disabled...
    let state = hook.sync(Some("G1"), HookOptions::disabled()).await;
    assert!(state.error.is_some());

    // ...and is cleared by the next attempt.
    let state = hook.sync(Some("G1"), HookOptions::default()).await;
    assert!(state.is_connected);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn lost_stream_drops_the_connected_flag() {
    let broadcaster = MockBroadcaster::new();
    let mut hook = ChannelHook::lobby(broadcaster.clone(), RecordingCache::new());
    hook.sync(Some("L1"), HookOptions::default()).await;
    assert!(hook.state().is_connected);

    broadcaster.disconnect("private-lobby.L1");
    eventually(|| !hook.state().is_connected).await;
    assert_eq!(hook.state().error, None);

    // The owner can recover by resubscribing.
    let state = hook.resubscribe().await;
    assert!(state.is_connected);
}

// ════════════════════════════════════════════════════════════════════
// Invalidation mapping
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn lobby_events_invalidate_their_keys() {
    let broadcaster = MockBroadcaster::new();
    let cache = RecordingCache::new();
    let mut hook = ChannelHook::lobby(broadcaster.clone(), cache.clone());
    hook.sync(Some("L1"), HookOptions::default()).await;

    broadcaster.emit("private-lobby.L1", "PlayerJoined").await;
    assert_eq!(
        cache.wait_for(2).await,
        vec![QueryKey::lobby("L1"), QueryKey::lobbies()]
    );

    // Unknown to the lobby table: nothing happens.
    broadcaster.emit("private-lobby.L1", "GameCompleted").await;
    broadcaster.emit("private-lobby.L1", "PlayerStatusChanged").await;
    assert_eq!(
        cache.wait_for(3).await,
        vec![QueryKey::lobby("L1"), QueryKey::lobbies(), QueryKey::lobby("L1")]
    );

    hook.teardown().await;
}

#[tokio::test]
async fn game_events_mark_the_cached_game_stale() {
    let broadcaster = MockBroadcaster::new();
    let cache = Arc::new(MemoryQueryCache::new());
    cache.insert(QueryKey::game("G1"), json!({"status": "in_progress"}));
    cache.insert(QueryKey::game("G2"), json!({"status": "in_progress"}));

    let mut hook = ChannelHook::game(broadcaster.clone(), cache.clone());
    hook.sync(Some("G1"), HookOptions::default()).await;

    broadcaster.emit("private-game.G1", "GameCompleted").await;
    eventually(|| cache.is_stale(&QueryKey::game("G1"))).await;
    assert!(!cache.is_stale(&QueryKey::game("G2")));

    hook.teardown().await;
}

// ════════════════════════════════════════════════════════════════════
// Pusher protocol
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn handshake_records_the_socket_id() {
    let (connection, server, _authorizer) = start_connection();
    assert!(!connection.is_connected());

    server.establish("123.456");
    eventually(|| connection.is_connected()).await;
    assert_eq!(connection.socket_id().as_deref(), Some("123.456"));

    connection.shutdown().await;
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (connection, mut server, _authorizer) = start_connection();
    server.establish("1.1");
    server.push_json(&json!({"event": "pusher:ping", "data": {}}));

    let frame = server.next_frame().await;
    assert_eq!(frame["event"], "pusher:pong");

    connection.shutdown().await;
}

#[tokio::test]
async fn private_subscribe_is_signed_and_events_are_delivered() {
    let (connection, mut server, authorizer) = start_connection();

    let subscriber = Arc::clone(&connection);
    let pending = tokio::spawn(async move { subscriber.subscribe("private-lobby.L1").await });

    server.establish("123.456");
    let frame = server.accept_subscription("private-lobby.L1").await;
    assert_eq!(frame["data"]["auth"], "app-key:123.456:private-lobby.L1");
    assert_eq!(
        authorizer.calls.lock().unwrap().clone(),
        vec![("123.456".to_string(), "private-lobby.L1".to_string())]
    );

    let mut events = pending.await.unwrap().expect("subscribe should succeed");
    server.push_event("private-lobby.L1", "PlayerJoined", &json!({"player_id": "P1"}));

    let event = events.recv().await.expect("event should arrive");
    assert_eq!(event.channel, "private-lobby.L1");
    assert_eq!(event.event, "PlayerJoined");
    assert_eq!(event.data, json!({"player_id": "P1"}));

    connection.shutdown().await;
}

#[tokio::test]
async fn public_subscribe_skips_authorization() {
    let (connection, mut server, authorizer) = start_connection();
    server.establish("1.1");

    let subscriber = Arc::clone(&connection);
    let pending = tokio::spawn(async move { subscriber.subscribe("lobbies").await });
    let frame = server.accept_subscription("lobbies").await;

    assert!(frame["data"].get("auth").is_none());
    assert!(pending.await.unwrap().is_ok());
    assert!(authorizer.calls.lock().unwrap().is_empty());

    connection.shutdown().await;
}

#[tokio::test]
async fn rejected_subscription_fails_the_subscribe() {
    let (connection, mut server, _authorizer) = start_connection();
    server.establish("1.1");

    let subscriber = Arc::clone(&connection);
    let pending = tokio::spawn(async move { subscriber.subscribe("private-game.G1").await });

    let frame = server.next_frame().await;
    assert_eq!(frame["event"], "pusher:subscribe");
    server.push_json(&json!({
        "event": "pusher:subscription_error",
        "channel": "private-game.G1",
        "data": {"type": "AuthError", "error": "Invalid signature", "status": 401},
    }));

    let error = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        error,
        ArenaError::Subscription { ref channel, ref message }
            if channel == "private-game.G1" && message == "Invalid signature"
    ));

    connection.shutdown().await;
}

#[tokio::test]
async fn refused_authorization_sends_nothing() {
    let (connection, mut server, authorizer) = start_connection();
    authorizer.refuse.store(true, Ordering::SeqCst);
    server.establish("1.1");

    let error = connection.subscribe("private-game.G1").await.unwrap_err();
    assert!(matches!(error, ArenaError::ChannelAuthorization(ref e) if e.error_code.as_deref() == Some("HTTP_403")));
    assert!(server.try_next_frame().is_none());

    connection.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_times_out_without_a_handshake() {
    let (socket, _server) = socket_pair();
    let config = RealtimeConfig::new("app-key", "localhost")
        .with_subscribe_timeout(Duration::from_millis(200));
    let connection =
        PusherConnection::start(socket, config, Arc::new(StaticAuthorizer::default()));

    let error = connection.subscribe("lobbies").await.unwrap_err();
    assert!(matches!(error, ArenaError::Timeout));
}

#[tokio::test]
async fn leave_unsubscribes_and_ends_the_stream() {
    let (connection, mut server, _authorizer) = start_connection();
    server.establish("1.1");

    let subscriber = Arc::clone(&connection);
    let pending = tokio::spawn(async move { subscriber.subscribe("private-game.G1").await });
    server.accept_subscription("private-game.G1").await;
    let mut events = pending.await.unwrap().unwrap();

    connection.leave("private-game.G1").await.unwrap();
    let frame = server.next_frame().await;
    assert_eq!(frame, json!({"event": "pusher:unsubscribe", "data": {"channel": "private-game.G1"}}));
    assert!(events.recv().await.is_none());

    // Leaving again is silent.
    connection.leave("private-game.G1").await.unwrap();
    tokio::task::yield_now().await;
    assert!(server.try_next_frame().is_none());

    connection.shutdown().await;
}

#[tokio::test]
async fn events_for_other_channels_are_not_delivered() {
    let (connection, mut server, _authorizer) = start_connection();
    server.establish("1.1");

    let subscriber = Arc::clone(&connection);
    let pending = tokio::spawn(async move { subscriber.subscribe("private-game.G1").await });
    server.accept_subscription("private-game.G1").await;
    let mut events = pending.await.unwrap().unwrap();

    server.push_event("private-game.G2", "GameCompleted", &json!({}));
    server.push("not json at all");
    server.push_event("private-game.G1", "GameForfeited", &json!({"by": "P2"}));

    let event = events.recv().await.unwrap();
    assert_eq!(event.channel, "private-game.G1");
    assert_eq!(event.event, "GameForfeited");

    connection.shutdown().await;
}

#[tokio::test]
async fn server_hang_up_ends_streams_and_disconnects() {
    let (connection, mut server, _authorizer) = start_connection();
    server.establish("1.1");

    let subscriber = Arc::clone(&connection);
    let pending = tokio::spawn(async move { subscriber.subscribe("lobbies").await });
    server.accept_subscription("lobbies").await;
    let mut events = pending.await.unwrap().unwrap();

    server.hang_up();
    assert!(events.recv().await.is_none());
    eventually(|| !connection.is_connected()).await;

    let error = connection.subscribe("lobbies").await.unwrap_err();
    assert!(matches!(error, ArenaError::NotConnected));
}

#[tokio::test]
async fn shutdown_closes_the_socket() {
    let (connection, server, _authorizer) = start_connection();
    server.establish("1.1");
    eventually(|| connection.is_connected()).await;

    connection.shutdown().await;
    assert!(server.closed.load(Ordering::SeqCst));
    assert!(!connection.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// End to end: hook over a Pusher connection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn hook_over_pusher_connection() {
    let (connection, mut server, _authorizer) = start_connection();
    let cache = RecordingCache::new();
    let mut hook = ChannelHook::lobby(connection.clone(), cache.clone());

    let server_side = tokio::spawn(async move {
        server.establish("9.9");
        server.accept_subscription("private-lobby.L7").await;
        server
    });
    let state = hook.sync(Some("L7"), HookOptions::default()).await;
    assert!(state.is_connected, "{state:?}");
    let mut server = server_side.await.unwrap();

    server.push_event("private-lobby.L7", "LobbyCancelled", &json!({"reason": "host left"}));
    assert_eq!(
        cache.wait_for(2).await,
        vec![QueryKey::lobby("L7"), QueryKey::lobbies()]
    );

    hook.teardown().await;
    let frame = server.next_frame().await;
    assert_eq!(frame["event"], "pusher:unsubscribe");
    assert_eq!(frame["data"]["channel"], "private-lobby.L7");

    connection.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Channel authorization over the REST client
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn api_authorizer_posts_to_the_auth_endpoint() {
    let transport = MockHttpTransport::always(200, json!({"auth": "app-key:signature"}));
    let config = ClientConfig::new("ck_test", CountingTokenStorage::with_token("tok"))
        .with_base_url("https://api.test.io")
        .with_transport(transport.clone());
    let client = ApiClient::new(config).unwrap();
    let authorizer = ApiChannelAuthorizer::new(client, "/broadcasting/auth");

    let auth = authorizer.authorize("123.456", "private-game.G1").await.unwrap();
    assert_eq!(auth, "app-key:signature");

    let request = transport.last_request();
    assert_eq!(request.method, reqwest::Method::POST);
    assert_eq!(request.url, "https://api.test.io/broadcasting/auth");
    assert_eq!(request.header("authorization"), Some("Bearer tok"));
    assert_eq!(request.header("x-client-key"), Some("ck_test"));
    let body: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"socket_id": "123.456", "channel_name": "private-game.G1"}));
}

#[tokio::test]
async fn api_authorizer_reports_refusals() {
    let transport = MockHttpTransport::always(403, json!({"message": "This action is unauthorized."}));
    let storage = CountingTokenStorage::with_token("tok");
    let config = ClientConfig::new("ck_test", storage.clone()).with_transport(transport);
    let authorizer = ApiChannelAuthorizer::new(ApiClient::new(config).unwrap(), "/broadcasting/auth");

    let error = authorizer.authorize("1.1", "private-game.G1").await.unwrap_err();
    let ArenaError::ChannelAuthorization(response) = error else {
        panic!("expected ChannelAuthorization, got {error:?}");
    };
    assert_eq!(response.message, "This action is unauthorized.");
    assert_eq!(response.error_code.as_deref(), Some("HTTP_403"));
    assert_eq!(storage.clear_count(), 0);
}

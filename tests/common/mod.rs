#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Arena Client integration tests.
//!
//! Provides scripted collaborators for both halves of the crate: an
//! [`HttpTransport`] and a [`TokenStorage`] for the REST client, and a
//! loopback socket, a channel authorizer, a broadcaster and a cache for the
//! realtime layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use arena_client::realtime::pusher::ChannelAuthorizer;
use arena_client::{
    ArenaError, Broadcaster, ChannelEvent, HttpRequest, HttpResponse, HttpTransport, QueryCache,
    QueryKey, RawError, TokenStorage, TokenStorageError, Transport,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── MockHttpTransport ───────────────────────────────────────────────

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, RawError> + Send + Sync;

/// An [`HttpTransport`] that answers every request with a closure and
/// records what it was asked.
pub struct MockHttpTransport {
    responder: Box<Responder>,
    delay: Option<Duration>,
    /// Every request received, in order.
    pub requests: StdMutex<Vec<HttpRequest>>,
}

impl MockHttpTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, RawError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: None,
            requests: StdMutex::new(Vec::new()),
        })
    }

    /// Like [`new`](Self::new), but every response takes `delay` to arrive.
    pub fn delayed<F>(delay: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, RawError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: Some(delay),
            requests: StdMutex::new(Vec::new()),
        })
    }

    /// Answer every request with `status` and a JSON body.
    pub fn always(status: u16, body: Value) -> Arc<Self> {
        Self::new(move |_| Ok(json_response(status, &body)))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request recorded")
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RawError> {
        let response = (self.responder)(&request);
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

pub fn json_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse::json(StatusCode::from_u16(status).unwrap(), body)
}

// ── CountingTokenStorage ────────────────────────────────────────────

/// A [`TokenStorage`] that counts calls and can be told to fail.
#[derive(Default)]
pub struct CountingTokenStorage {
    token: StdMutex<Option<String>>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub clears: AtomicUsize,
    pub fail_get: AtomicBool,
    pub fail_clear: AtomicBool,
    /// Time each `clear_token` takes to settle.
    pub clear_delay: StdMutex<Option<Duration>>,
}

impl CountingTokenStorage {
    pub fn with_token(token: &str) -> Arc<Self> {
        let storage = Self::default();
        *storage.token.lock().unwrap() = Some(token.to_string());
        Arc::new(storage)
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStorage for CountingTokenStorage {
    async fn get_token(&self) -> Result<Option<String>, TokenStorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(TokenStorageError::new("keychain locked"));
        }
        Ok(self.current())
    }

    async fn set_token(&self, token: String) -> Result<(), TokenStorageError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().unwrap() = Some(token);
        Ok(())
    }

    async fn clear_token(&self) -> Result<(), TokenStorageError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        let delay = *self.clear_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(TokenStorageError::new("keychain locked"));
        }
        *self.token.lock().unwrap() = None;
        Ok(())
    }
}

// ── Loopback socket ─────────────────────────────────────────────────

/// Client half of an in-memory socket; hand it to `PusherConnection::start`.
pub struct LoopbackSocket {
    incoming: mpsc::UnboundedReceiver<Option<Result<String, ArenaError>>>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Server half of an in-memory socket, driven by the test.
pub struct SocketServer {
    to_client: mpsc::UnboundedSender<Option<Result<String, ArenaError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<AtomicBool>,
}

pub fn socket_pair() -> (LoopbackSocket, SocketServer) {
    let (to_client, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_client) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        LoopbackSocket {
            incoming,
            outgoing,
            closed: Arc::clone(&closed),
        },
        SocketServer {
            to_client,
            from_client,
            closed,
        },
    )
}

#[async_trait]
impl Transport for LoopbackSocket {
    async fn send(&mut self, message: String) -> Result<(), ArenaError> {
        self.outgoing
            .send(message)
            .map_err(|e| ArenaError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ArenaError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // Server half dropped: behave like a socket that stays open.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ArenaError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl SocketServer {
    /// Send one raw text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.to_client.send(Some(Ok(frame.into()))).unwrap();
    }

    pub fn push_json(&self, frame: &Value) {
        self.push(frame.to_string());
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        self.to_client.send(None).unwrap();
    }

    /// The next frame the client sent, decoded.
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client socket dropped");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    pub fn try_next_frame(&mut self) -> Option<Value> {
        self.from_client
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client sent invalid JSON"))
    }

    pub fn establish(&self, socket_id: &str) {
        self.push_json(&connection_established(socket_id));
    }

    /// Wait for a `pusher:subscribe` for `channel` and acknowledge it.
    pub async fn accept_subscription(&mut self, channel: &str) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["event"], "pusher:subscribe", "unexpected frame {frame}");
        assert_eq!(frame["data"]["channel"], channel);
        self.push_json(&json!({
            "event": "pusher_internal:subscription_succeeded",
            "channel": channel,
            "data": "{}",
        }));
        frame
    }

    pub fn push_event(&self, channel: &str, event: &str, data: &Value) {
        self.push_json(&json!({
            "event": event,
            "channel": channel,
            "data": data.to_string(),
        }));
    }
}

/// `pusher:connection_established` with its string-encoded payload.
pub fn connection_established(socket_id: &str) -> Value {
    json!({
        "event": "pusher:connection_established",
        "data": json!({ "socket_id": socket_id, "activity_timeout": 120 }).to_string(),
    })
}

// ── StaticAuthorizer ────────────────────────────────────────────────

/// A [`ChannelAuthorizer`] that signs with a fixed key, or refuses.
#[derive(Default)]
pub struct StaticAuthorizer {
    pub calls: StdMutex<Vec<(String, String)>>,
    pub refuse: AtomicBool,
}

#[async_trait]
impl ChannelAuthorizer for StaticAuthorizer {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String, ArenaError> {
        self.calls
            .lock()
            .unwrap()
            .push((socket_id.to_string(), channel.to_string()));
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ArenaError::ChannelAuthorization(arena_client::ErrorResponse::new(
                "This action is unauthorized.",
                "HTTP_403",
            )));
        }
        Ok(format!("app-key:{socket_id}:{channel}"))
    }
}

// ── MockBroadcaster ─────────────────────────────────────────────────

/// A [`Broadcaster`] that logs subscribe/leave calls in order and lets the
/// test push events into open channels.
#[derive(Default)]
pub struct MockBroadcaster {
    log: StdMutex<Vec<String>>,
    senders: StdMutex<HashMap<String, mpsc::Sender<ChannelEvent>>>,
    fail_next: StdMutex<Option<ArenaError>>,
    leave_delay: StdMutex<Option<Duration>>,
}

impl MockBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Make the next subscribe fail with `error`.
    pub fn fail_next(&self, error: ArenaError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    pub fn set_leave_delay(&self, delay: Duration) {
        *self.leave_delay.lock().unwrap() = Some(delay);
    }

    pub fn open_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.senders.lock().unwrap().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Deliver an event on `channel`. Panics if the channel is not open.
    pub async fn emit(&self, channel: &str, event: &str) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .unwrap_or_else(|| panic!("channel {channel} is not open"));
        sender
            .send(ChannelEvent {
                channel: channel.to_string(),
                event: event.to_string(),
                data: json!({}),
            })
            .await
            .unwrap();
    }

    /// End the event stream of `channel` as if the connection dropped.
    pub fn disconnect(&self, channel: &str) {
        self.senders.lock().unwrap().remove(channel);
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelEvent>, ArenaError> {
        self.log.lock().unwrap().push(format!("subscribe {channel}"));
        let failure = self.fail_next.lock().unwrap().take();
        if let Some(error) = failure {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().insert(channel.to_string(), tx);
        Ok(rx)
    }

    async fn leave(&self, channel: &str) -> Result<(), ArenaError> {
        let delay = *self.leave_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push(format!("leave {channel}"));
        self.senders.lock().unwrap().remove(channel);
        Ok(())
    }
}

// ── RecordingCache ──────────────────────────────────────────────────

/// A [`QueryCache`] that records every invalidated key.
#[derive(Default)]
pub struct RecordingCache {
    pub invalidated: StdMutex<Vec<QueryKey>>,
}

impl RecordingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.invalidated.lock().unwrap().clone()
    }

    /// Wait until at least `count` keys have been invalidated.
    pub async fn wait_for(&self, count: usize) -> Vec<QueryKey> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let keys = self.keys();
                if keys.len() >= count {
                    return keys;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for invalidations")
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, key: &QueryKey) {
        self.invalidated.lock().unwrap().push(key.clone());
    }
}

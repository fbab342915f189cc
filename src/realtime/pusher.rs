//! Pusher channel protocol over any [`Transport`].
//!
//! [`PusherConnection`] is a thin handle talking to a background connection
//! loop over an unbounded command channel. The loop owns the transport,
//! answers server pings, tracks the socket id, and routes channel events to
//! one bounded listener per channel.
//!
//! Private (`private-*`) and presence (`presence-*`) channels need a
//! signature from the backend before the server accepts the subscription.
//! [`ApiChannelAuthorizer`] obtains it through an [`ApiClient`], so the
//! request carries the same client key and bearer token as every REST call.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(client: arena_client::ApiClient) -> Result<(), arena_client::ArenaError> {
//! use std::sync::Arc;
//! use arena_client::realtime::pusher::{ApiChannelAuthorizer, PusherConnection, RealtimeConfig};
//! use arena_client::realtime::Broadcaster;
//!
//! let config = RealtimeConfig::new("arena-app-key", "ws.example.io");
//! let authorizer = Arc::new(ApiChannelAuthorizer::new(client, &config.auth_endpoint));
//! let connection = PusherConnection::connect(config, authorizer).await?;
//!
//! let mut events = connection.subscribe("private-lobby.01HW3K").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{} on {}", event.event, event.channel);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ApiClient;
use crate::error::{ArenaError, Result};
use crate::realtime::{Broadcaster, ChannelEvent};
use crate::transport::Transport;

/// Path the backend signs private channel subscriptions on.
pub const DEFAULT_AUTH_ENDPOINT: &str = "/broadcasting/auth";

/// Pusher protocol revision announced in the socket URL.
const PROTOCOL_VERSION: u8 = 7;

const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_BUFFER: usize = 64;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`PusherConnection`].
///
/// # Example
///
/// ```
/// use arena_client::realtime::pusher::RealtimeConfig;
///
/// let config = RealtimeConfig::new("app-key", "localhost")
///     .with_port(8080)
///     .with_tls(false);
/// assert!(config.socket_url().starts_with("ws://localhost:8080/app/app-key?protocol=7"));
/// ```
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Public application key, part of the socket URL.
    pub app_key: String,
    /// Realtime server host name.
    pub host: String,
    /// Port; `None` uses the scheme default.
    pub port: Option<u16>,
    /// `wss://` when `true` (the default), `ws://` otherwise.
    pub tls: bool,
    /// Path on the REST API that signs private channel subscriptions.
    ///
    /// Defaults to [`DEFAULT_AUTH_ENDPOINT`].
    pub auth_endpoint: String,
    /// Upper bound on a whole subscribe: waiting for the socket id,
    /// authorization, and the server's acknowledgement.
    ///
    /// Defaults to **10 seconds**.
    pub subscribe_timeout: Duration,
    /// Capacity of each channel's event listener. Events arriving while a
    /// listener is full are dropped with a warning.
    ///
    /// Defaults to **64**. Values below 1 are clamped to 1.
    pub event_buffer: usize,
    /// Time the connection loop gets to close the transport on shutdown
    /// before it is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl RealtimeConfig {
    pub fn new(app_key: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            host: host.into(),
            port: None,
            tls: true,
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Defaults to **64**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// `ws[s]://host[:port]/app/<key>?protocol=7&client=arena-client-rust&version=<v>`
    pub fn socket_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        format!(
            "{scheme}://{}{port}/app/{}?protocol={PROTOCOL_VERSION}&client=arena-client-rust&version={}",
            self.host,
            self.app_key,
            env!("CARGO_PKG_VERSION")
        )
    }
}

// ── Wire frames ─────────────────────────────────────────────────────

/// One protocol message in either direction.
///
/// The server JSON-encodes `data` into a string for most events; use
/// [`payload`](Frame::payload) to get the decoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Serialization`] if the text is not a frame.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `data`, decoded when it is a JSON string; otherwise returned as-is.
    pub fn payload(&self) -> Value {
        match &self.data {
            Value::String(encoded) => {
                serde_json::from_str(encoded).unwrap_or_else(|_| self.data.clone())
            }
            other => other.clone(),
        }
    }

    fn subscribe(channel: &str, auth: Option<String>) -> Self {
        let mut data = json!({ "channel": channel });
        if let (Some(auth), Value::Object(map)) = (auth, &mut data) {
            map.insert("auth".into(), Value::String(auth));
        }
        Self {
            event: "pusher:subscribe".into(),
            channel: None,
            data,
        }
    }

    fn unsubscribe(channel: &str) -> Self {
        Self {
            event: "pusher:unsubscribe".into(),
            channel: None,
            data: json!({ "channel": channel }),
        }
    }

    fn pong() -> Self {
        Self {
            event: "pusher:pong".into(),
            channel: None,
            data: json!({}),
        }
    }
}

/// Whether subscribing to `channel` needs a backend signature.
pub fn requires_auth(channel: &str) -> bool {
    channel.starts_with("private-") || channel.starts_with("presence-")
}

// ── Authorization ───────────────────────────────────────────────────

/// Signs private channel subscriptions for a socket.
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync + 'static {
    /// Return the `auth` string the server expects in `pusher:subscribe`.
    ///
    /// # Errors
    ///
    /// The backend refused or could not be reached.
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String>;
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    auth: String,
}

/// [`ChannelAuthorizer`] that POSTs to the backend's auth endpoint.
#[derive(Debug, Clone)]
pub struct ApiChannelAuthorizer {
    client: ApiClient,
    endpoint: String,
}

impl ApiChannelAuthorizer {
    pub fn new(client: ApiClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChannelAuthorizer for ApiChannelAuthorizer {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String> {
        let request = AuthRequest {
            socket_id,
            channel_name: channel,
        };
        self.client
            .post::<_, AuthResponse>(&self.endpoint, &request)
            .await
            .map(|response| response.auth)
            .map_err(ArenaError::ChannelAuthorization)
    }
}

// ── Connection handle ───────────────────────────────────────────────

enum Command {
    Subscribe {
        channel: String,
        auth: Option<String>,
        events: mpsc::Sender<ChannelEvent>,
        ack: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        channel: String,
    },
}

/// [`Broadcaster`] backed by a Pusher-protocol connection.
pub struct PusherConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    socket_id: watch::Receiver<Option<String>>,
    authorizer: Arc<dyn ChannelAuthorizer>,
    config: RealtimeConfig,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl PusherConnection {
    /// Spawn the connection loop over an already-connected transport.
    #[must_use = "dropping the connection aborts its loop"]
    pub fn start(
        transport: impl Transport,
        config: RealtimeConfig,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let session = Session {
            transport,
            socket_id: socket_tx,
            channels: HashMap::new(),
        };
        let task = tokio::spawn(session.run(cmd_rx, shutdown_rx));

        Self {
            cmd_tx,
            socket_id: socket_rx,
            authorizer,
            config,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    /// Open a WebSocket to [`RealtimeConfig::socket_url`] and start.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Io`] or [`ArenaError::Timeout`] if the socket cannot be
    /// opened within `subscribe_timeout`.
    #[cfg(feature = "transport-websocket")]
    pub async fn connect(
        config: RealtimeConfig,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Result<Self> {
        let socket = crate::transports::WebSocketTransport::connect_with_timeout(
            &config.socket_url(),
            config.subscribe_timeout,
        )
        .await?;
        Ok(Self::start(socket, config, authorizer))
    }

    /// Socket id assigned by the server, once the handshake completed.
    pub fn socket_id(&self) -> Option<String> {
        self.socket_id.borrow().clone()
    }

    /// `true` between the server's handshake and the end of the connection.
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed() && self.socket_id.borrow().is_some()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Close the transport and stop the connection loop.
    ///
    /// Every open channel's event stream ends.
    pub async fn shutdown(&self) {
        debug!("realtime shutdown requested");

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.lock().await.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }
    }

    async fn wait_for_socket_id(&self) -> Result<String> {
        let mut socket_id = self.socket_id.clone();
        loop {
            let current = socket_id.borrow_and_update().clone();
            if let Some(id) = current {
                return Ok(id);
            }
            if socket_id.changed().await.is_err() {
                return Err(ArenaError::NotConnected);
            }
        }
    }

    async fn subscribe_inner(&self, channel: &str) -> Result<mpsc::Receiver<ChannelEvent>> {
        let socket_id = self.wait_for_socket_id().await?;
        let auth = if requires_auth(channel) {
            Some(self.authorizer.authorize(&socket_id, channel).await?)
        } else {
            None
        };

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                channel: channel.to_string(),
                auth,
                events: events_tx,
                ack: ack_tx,
            })
            .map_err(|_| ArenaError::NotConnected)?;

        ack_rx.await.map_err(|_| ArenaError::NotConnected)??;
        Ok(events_rx)
    }
}

#[async_trait]
impl Broadcaster for PusherConnection {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelEvent>> {
        if self.cmd_tx.is_closed() {
            return Err(ArenaError::NotConnected);
        }

        match tokio::time::timeout(self.config.subscribe_timeout, self.subscribe_inner(channel))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(channel = %channel, "subscribe timed out");
                let _ = self.cmd_tx.send(Command::Unsubscribe {
                    channel: channel.to_string(),
                });
                Err(ArenaError::Timeout)
            }
        }
    }

    async fn leave(&self, channel: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Unsubscribe {
                channel: channel.to_string(),
            })
            .map_err(|_| ArenaError::NotConnected)
    }
}

impl std::fmt::Debug for PusherConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PusherConnection")
            .field("socket_id", &self.socket_id())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for PusherConnection {
    fn drop(&mut self) {
        // Nothing to await here; aborting drops the loop and its transport.
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

// ── Connection loop ─────────────────────────────────────────────────

struct Listener {
    events: mpsc::Sender<ChannelEvent>,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// State owned by the background loop.
struct Session<T: Transport> {
    transport: T,
    socket_id: watch::Sender<Option<String>>,
    channels: HashMap<String, Listener>,
}

impl<T: Transport> Session<T> {
    /// Multiplex commands, shutdown and inbound frames until one side ends.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("connection loop started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down connection loop");
                        let _ = self.transport.close().await;
                        break;
                    };
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("realtime send error: {e}");
                        break;
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    let _ = self.transport.close().await;
                    break;
                }

                incoming = self.transport.recv() => {
                    match incoming {
                        Some(Ok(text)) => {
                            if let Err(e) = self.handle_frame(&text).await {
                                error!("realtime send error: {e}");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("realtime receive error: {e}");
                            break;
                        }
                        None => {
                            debug!("realtime connection closed by server");
                            break;
                        }
                    }
                }
            }
        }

        self.socket_id.send_replace(None);
        for (_, listener) in self.channels.drain() {
            if let Some(ack) = listener.ack {
                let _ = ack.send(Err(ArenaError::NotConnected));
            }
        }
        debug!("connection loop exited");
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Subscribe {
                channel,
                auth,
                events,
                ack,
            } => {
                debug!(channel = %channel, "subscribing");
                let frame = Frame::subscribe(&channel, auth);
                if let Some(previous) = self.channels.insert(
                    channel,
                    Listener {
                        events,
                        ack: Some(ack),
                    },
                ) {
                    if let Some(ack) = previous.ack {
                        let _ = ack.send(Err(ArenaError::TransportClosed));
                    }
                }
                self.send(&frame).await
            }
            Command::Unsubscribe { channel } => {
                if self.channels.remove(&channel).is_none() {
                    return Ok(());
                }
                debug!(channel = %channel, "unsubscribing");
                self.send(&Frame::unsubscribe(&channel)).await
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to decode realtime frame: {e} (raw: {text})");
                return Ok(());
            }
        };

        match frame.event.as_str() {
            "pusher:connection_established" => {
                let payload = frame.payload();
                match payload.get("socket_id").and_then(Value::as_str) {
                    Some(id) => {
                        info!(socket_id = %id, "realtime connection established");
                        self.socket_id.send_replace(Some(id.to_string()));
                    }
                    None => warn!("connection_established frame without socket_id"),
                }
            }
            "pusher:ping" => return self.send(&Frame::pong()).await,
            "pusher:pong" => {}
            "pusher:error" => {
                warn!(payload = %frame.payload(), "realtime server error");
            }
            "pusher_internal:subscription_succeeded" => {
                if let Some(listener) = frame
                    .channel
                    .as_ref()
                    .and_then(|channel| self.channels.get_mut(channel))
                {
                    debug!(channel = ?frame.channel, "subscription confirmed");
                    if let Some(ack) = listener.ack.take() {
                        let _ = ack.send(Ok(()));
                    }
                }
            }
            "pusher:subscription_error" => {
                let channel = frame.channel.clone().unwrap_or_default();
                warn!(channel = %channel, payload = %frame.payload(), "subscription rejected");
                if let Some(listener) = self.channels.remove(&channel) {
                    if let Some(ack) = listener.ack {
                        let _ = ack.send(Err(ArenaError::Subscription {
                            channel,
                            message: subscription_error_message(&frame.payload()),
                        }));
                    }
                }
            }
            event if event.starts_with("pusher_internal:") || event.starts_with("pusher:") => {
                debug!(event = %event, "ignoring protocol event");
            }
            _ => self.forward(frame),
        }
        Ok(())
    }

    /// Hand an application event to its channel's listener without blocking
    /// the loop.
    fn forward(&self, frame: Frame) {
        let Some(channel) = frame.channel.clone() else {
            debug!(event = %frame.event, "ignoring event without channel");
            return;
        };
        let Some(listener) = self.channels.get(&channel) else {
            debug!(channel = %channel, event = %frame.event, "event for unknown channel");
            return;
        };

        let event = ChannelEvent {
            data: frame.payload(),
            channel,
            event: frame.event,
        };
        match listener.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(channel = %dropped.channel, event = %dropped.event, "listener full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!(channel = %dropped.channel, "listener dropped");
            }
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.transport.send(text).await
    }
}

fn subscription_error_message(payload: &Value) -> String {
    payload
        .get("error")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            payload
                .get("status")
                .and_then(Value::as_u64)
                .map(|status| format!("server rejected subscription with status {status}"))
        })
        .unwrap_or_else(|| "server rejected subscription".to_string())
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
    fn config_defaults() {
        let config = RealtimeConfig::new("key", "ws.example.io");
        assert!(config.tls);
        assert_eq!(config.port, None);
        assert_eq!(config.auth_endpoint, "/broadcasting/auth");
        assert_eq!(config.subscribe_timeout, Duration::from_secs(10));
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(RealtimeConfig::new("k", "h").with_event_buffer(0).event_buffer, 1);
    }

    #[test]
    fn socket_url_shape() {
        let url = RealtimeConfig::new("key", "ws.example.io").socket_url();
        assert!(url.starts_with("wss://ws.example.io/app/key?protocol=7&client=arena-client-rust&version="));
    }

    #[test]
    fn payload_decodes_string_encoded_data() {
        let frame = Frame::parse(
            r#"{"event":"PlayerJoined","channel":"private-lobby.L1","data":"{\"player_id\":\"P1\"}"}"#,
        )
        .unwrap();
        assert_eq!(frame.payload(), json!({"player_id": "P1"}));

        let frame = Frame::parse(r#"{"event":"GameCompleted","channel":"c","data":{"winner":"P2"}}"#)
            .unwrap();
        assert_eq!(frame.payload(), json!({"winner": "P2"}));

        let frame = Frame::parse(r#"{"event":"X","data":"not json"}"#).unwrap();
        assert_eq!(frame.payload(), json!("not json"));
    }

    #[test]
    fn subscribe_frame_carries_auth_only_when_given() {
        let with_auth = serde_json::to_value(Frame::subscribe("private-game.G1", Some("k:sig".into())))
            .unwrap();
        assert_eq!(
            with_auth,
            json!({"event": "pusher:subscribe", "data": {"channel": "private-game.G1", "auth": "k:sig"}})
        );

        let public = serde_json::to_value(Frame::subscribe("lobbies", None)).unwrap();
        assert_eq!(public, json!({"event": "pusher:subscribe", "data": {"channel": "lobbies"}}));
    }

    #[test]
    fn private_and_presence_channels_need_auth() {
        assert!(requires_auth("private-game.G1"));
        assert!(requires_auth("presence-lobby.L1"));
        assert!(!requires_auth("lobbies"));
    }

    #[test]
    fn subscription_error_messages() {
        assert_eq!(subscription_error_message(&json!({"error": "forbidden"})), "forbidden");
        assert_eq!(
            subscription_error_message(&json!({"type": "AuthError", "status": 403})),
            "server rejected subscription with status 403"
        );
        assert_eq!(subscription_error_message(&Value::Null), "server rejected subscription");
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(Frame::parse("{}"), Err(ArenaError::Serialization(_))));
        assert!(matches!(Frame::parse("nope"), Err(ArenaError::Serialization(_))));
    }
}

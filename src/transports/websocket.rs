//! WebSocket [`Transport`] using `tokio-tungstenite`.
//!
//! Both `ws://` and `wss://` URLs are accepted; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream). Only text frames
//! carry realtime protocol messages; binary frames are skipped and
//! ping/pong is answered by tungstenite itself. Close frames carrying a
//! Pusher code (4000-4299) surface as [`ArenaError::ServerClosed`].
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), arena_client::ArenaError> {
//! use arena_client::realtime::pusher::RealtimeConfig;
//! use arena_client::{Transport, WebSocketTransport};
//!
//! let config = RealtimeConfig::new("arena-app-key", "ws.example.io");
//! let mut socket = WebSocketTransport::connect(&config.socket_url()).await?;
//! if let Some(Ok(frame)) = socket.recv().await {
//!     println!("server said: {frame}");
//! }
//! socket.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::ArenaError;
use crate::transport::{CloseAction, Transport};

/// The underlying WebSocket stream, exposed for [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] over a WebSocket connection.
///
/// [`recv`](Transport::recv) is cancel-safe: dropping it mid-poll loses no
/// frames.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::Io`] if the URL is invalid or the handshake
    /// fails. I/O error kinds are preserved; other failures map to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, ArenaError> {
        tracing::debug!(url = %url, "opening realtime socket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            ArenaError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "realtime socket open");
        Ok(Self::from_stream(stream))
    }

    /// Wrap a stream that was connected elsewhere (custom TLS, proxies,
    /// extra handshake headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Timeout`] when the deadline elapses, otherwise anything
    /// [`connect`](Self::connect) returns.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, ArenaError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| ArenaError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ArenaError> {
        if self.closed {
            return Err(ArenaError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ArenaError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ArenaError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(ArenaError::TransportReceive(e.to_string()))),
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(Some(frame)) => {
                    let code = u16::from(frame.code);
                    let action = CloseAction::from_code(code);
                    if action == CloseAction::Closed {
                        tracing::debug!(code, "realtime socket closed by server");
                        return None;
                    }
                    let reason = frame.reason.as_str().to_owned();
                    tracing::warn!(code, ?action, reason = %reason, "realtime server closed the socket");
                    return Some(Err(ArenaError::ServerClosed {
                        code,
                        reason,
                        action,
                    }));
                }
                Message::Close(None) => {
                    tracing::debug!("realtime socket closed by server");
                    return None;
                }
                Message::Binary(_) => {
                    tracing::warn!("skipping unexpected binary frame");
                }
                // Pings are answered by tungstenite; raw frames never surface on reads.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ArenaError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| ArenaError::TransportSend(e.to_string()))
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
    use tokio::net::TcpListener;

    /// Accept one WebSocket connection on a local port and run `handler` on it.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}/app/key")
    }

    #[tokio::test]
    async fn connect_rejects_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, ArenaError::Io(_)));
    }

    #[tokio::test]
    async fn receives_text_and_skips_binary() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"pusher:ping","data":{}}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        let frame = socket.recv().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"event":"pusher:ping","data":{}}"#);
        assert!(socket.recv().await.is_none());
    }

    #[tokio::test]
    async fn protocol_close_code_is_reported() {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        let url = serve_once(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::from(4001),
                reason: "Application does not exist".into(),
            }))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        let err = socket.recv().await.unwrap().unwrap_err();
        match err {
            ArenaError::ServerClosed {
                code,
                reason,
                action,
            } => {
                assert_eq!(code, 4001);
                assert_eq!(reason, "Application does not exist");
                assert_eq!(action, CloseAction::Refused);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        socket
            .send(r#"{"event":"pusher:pong","data":{}}"#.to_string())
            .await
            .unwrap();
        let echoed = socket.recv().await.unwrap().unwrap();
        assert_eq!(echoed, r#"{"event":"pusher:pong","data":{}}"#);
    }

    #[tokio::test]
    async fn send_after_close_fails_and_close_is_idempotent() {
        let url =
            serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        socket.close().await.unwrap();
        socket.close().await.unwrap();

        let err = socket.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, ArenaError::TransportClosed));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::Timeout));
    }
}

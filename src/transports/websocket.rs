//! WebSocket transport built on `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries QuickQuest JSON frames as WebSocket text
//! messages. `ws://` and `wss://` URLs both work; TLS is negotiated by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! The handshake future returned by [`WebSocketTransport::connect`] is meant
//! to be passed to [`Channel::connect`](crate::channel::Channel::connect),
//! which bounds it with the configured reachability timeout.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::QuickQuestError;
use crate::transport::Transport;

/// The underlying WebSocket stream type.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// `recv` is cancel-safe: dropping its future never loses a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Perform the WebSocket handshake against `url`.
    ///
    /// # Errors
    ///
    /// Returns [`QuickQuestError::Io`] if the URL is invalid or the server is
    /// unreachable. I/O error kinds are preserved; other handshake failures map
    /// to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, QuickQuestError> {
        debug!(url = %url, "opening WebSocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| {
                let kind = match &e {
                    tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                    _ => std::io::ErrorKind::Other,
                };
                QuickQuestError::Io(std::io::Error::new(kind, e))
            })?;

        info!(url = %url, "WebSocket handshake complete");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream (custom TLS, proxies, extra headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), QuickQuestError> {
        if self.closed {
            return Err(QuickQuestError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| QuickQuestError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, QuickQuestError>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(close)) => {
                    debug!(?close, "server closed the WebSocket");
                    return None;
                }
                // tungstenite answers pings itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Binary(bytes)) => {
                    warn!(len = bytes.len(), "ignoring binary WebSocket frame");
                }
                Err(e) => return Some(Err(QuickQuestError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), QuickQuestError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| QuickQuestError::TransportSend(e.to_string()))
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

    /// Spawn a one-connection WebSocket server running `handler` and return its URL.
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
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let err = WebSocketTransport::connect("quickquest").await.unwrap_err();
        assert!(matches!(err, QuickQuestError::Io(_)));
    }

    #[tokio::test]
    async fn connect_reports_refused_port() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, QuickQuestError::Io(_)));
    }

    #[tokio::test]
    async fn delivers_text_frames_and_skips_binary() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"eventEnded"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let text = transport.recv().await.unwrap().unwrap();
        assert_eq!(text, r#"{"event":"eventEnded"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn echoes_sent_frames() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send("hello host".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "hello host");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let url =
            serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, QuickQuestError::TransportClosed));
    }
}

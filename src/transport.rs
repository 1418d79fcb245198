//! Transport abstraction for the QuickQuest event protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and the session coordination server. Every frame is one JSON
//! document, so implementations handle message framing internally (WebSocket
//! frames, length-prefixed TCP, in-process channels for tests).
//!
//! # Connection Setup
//!
//! Connection setup is not part of this trait. Build the handshake future
//! externally and hand it to [`Channel::connect`](crate::channel::Channel::connect),
//! which applies the reachability timeout and falls back to offline mode.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use quickquest_client::error::QuickQuestError;
//! use quickquest_client::transport::Transport;
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     tx: mpsc::UnboundedSender<String>,
//!     rx: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, message: String) -> Result<(), QuickQuestError> {
//!         self.tx
//!             .send(message)
//!             .map_err(|e| QuickQuestError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, QuickQuestError>> {
//!         self.rx.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), QuickQuestError> {
//!         self.rx.close();
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::QuickQuestError;

/// A bidirectional text message transport for the QuickQuest protocol.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message
/// and each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the channel's I/O loop
/// polls it inside `tokio::select!`. Channel-based implementations (wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`QuickQuestError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), QuickQuestError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, QuickQuestError>>;

    /// Close the transport connection gracefully.
    ///
    /// Implementations should release resources even if the close handshake fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails.
    async fn close(&mut self) -> Result<(), QuickQuestError>;
}

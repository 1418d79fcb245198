//! Transport implementations for the QuickQuest protocol.
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() {
//! use quickquest_client::{Channel, ClientConfig, WebSocketTransport};
//!
//! let config = ClientConfig::new("ws://localhost:4000/ws");
//! let (channel, _events) =
//!     Channel::connect(WebSocketTransport::connect(&config.server_url), &config).await;
//! println!("connectivity: {:?}", channel.connectivity());
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;

//! # QuickQuest Client
//!
//! Session and state-synchronization client for QuickQuest party/trivia
//! events.
//!
//! A host opens an event and drives its lifecycle; players join with an
//! event code, play a timed mini-game round and land on a shared
//! leaderboard. The server is authoritative while it is reachable. When it
//! is not, the client runs the same flows locally against an `OFFLINE`
//! event with a client-side timer.
//!
//! ## Layout
//!
//! - [`protocol`]: wire messages, JSON `{"event", "data"}` envelopes
//! - [`transport`] and [`transports`]: the [`Transport`] seam and the
//!   default WebSocket implementation (`transport-websocket` feature)
//! - [`channel`]: reachability check, offline fallback and the I/O loop
//! - [`session`]: the sans-I/O state machine for one event
//! - [`timer`], [`leaderboard`], [`games`]: round time, rankings and
//!   mini-game completion rules
//! - [`client`]: the controller that ties a channel to a session
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quickquest_client::{AnonymousIdentity, Client, ClientConfig, LoginForm, Update};
//!
//! let mut identity = AnonymousIdentity::new();
//! let mut client = Client::connect(ClientConfig::new("ws://localhost:4000/ws"), &mut identity).await?;
//! client.login(LoginForm::new("Owls", "B", "4821"))?;
//!
//! loop {
//!     let update = client.next_update().await;
//!     println!("{update:?}: {:?}", client.snapshot().lifecycle);
//! }
//! ```

pub mod channel;
pub mod client;
pub mod error;
pub mod games;
pub mod identity;
pub mod leaderboard;
pub mod protocol;
pub mod router;
pub mod session;
pub mod timer;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use channel::{Channel, ChannelEvent, Connectivity};
pub use client::{Client, ClientConfig, Update};
pub use error::{QuickQuestError, Result};
pub use games::{GameRegistry, MiniGame, RoundState};
pub use identity::{AnonymousIdentity, IdentityProvider};
pub use leaderboard::Leaderboard;
pub use protocol::{
    ClientMessage, GameMode, LeaderboardEntry, MessageKind, Phase, ServerMessage, UserId,
};
pub use router::MessageRouter;
pub use session::{LifecycleState, LoginForm, Notice, Role, Session, SessionSnapshot};
pub use timer::{Timer, TimerSource};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;

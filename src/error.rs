//! Error types for the QuickQuest client.

use thiserror::Error;

use crate::session::LifecycleState;

/// Errors that can occur when using the QuickQuest client.
///
/// Connectivity failures are deliberately absent: an unreachable server is
/// recovered by switching the client into offline mode, never reported.
#[derive(Debug, Error)]
pub enum QuickQuestError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required login input was missing or malformed. No transition happened.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A host-only action was attempted by a player (or before login).
    #[error("only the host can do that")]
    NotHost,

    /// The action is not valid in the session's current lifecycle state.
    #[error("cannot {action} while in {state:?}")]
    InvalidTransition {
        /// Name of the rejected action.
        action: &'static str,
        /// State the session was in when the action was attempted.
        state: LifecycleState,
    },

    /// The identity provider failed to produce a user identifier.
    #[error("identity provider error: {0}")]
    Identity(String),
}

/// A specialized [`Result`] type for QuickQuest client operations.
pub type Result<T> = std::result::Result<T, QuickQuestError>;

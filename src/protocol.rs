//! Wire types for the QuickQuest event protocol.
//!
//! Every frame is a JSON text message tagged with the event name and, when
//! the event carries a payload, a `data` field:
//!
//! ```json
//! {"event": "joinEvent", "data": {"eventCode": "1234", "teamId": "u-1", "teamName": "Owls", "section": "B"}}
//! ```
//!
//! Event names and payload fields are camelCase to match the session
//! coordination server.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ── Identifiers ─────────────────────────────────────────────────────

/// Opaque user identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Enums ───────────────────────────────────────────────────────────

/// The mini-game played during a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GameMode {
    /// Find every difference between two near-identical images.
    #[default]
    SpotTheDifference,
    /// Restore a shuffled 3x3 image.
    ImageScramble,
    /// Flip cards to uncover matching pairs.
    MatchingPairs,
}

impl GameMode {
    /// All built-in modes, in menu order.
    pub const ALL: [GameMode; 3] = [
        GameMode::SpotTheDifference,
        GameMode::ImageScramble,
        GameMode::MatchingPairs,
    ];

    /// The kebab-case wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpotTheDifference => "spot-the-difference",
            Self::ImageScramble => "image-scramble",
            Self::MatchingPairs => "matching-pairs",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-declared phase of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Players are gathered and waiting for the host to start.
    #[default]
    Waiting,
    /// A round is in progress.
    Playing,
    /// The round is over and results are shown.
    Leaderboard,
}

// ── Structs ─────────────────────────────────────────────────────────

/// One row of the leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Team name.
    pub name: String,
    /// Section (class, table, group) the team belongs to.
    pub section: String,
    /// Completion time in milliseconds.
    pub time: u64,
    /// Submitting user, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl LeaderboardEntry {
    /// Create an entry without a team id.
    pub fn new(name: impl Into<String>, section: impl Into<String>, time: u64) -> Self {
        Self {
            name: name.into(),
            section: section.into(),
            time,
            team_id: None,
        }
    }
}

/// Completion report sent when a player solves a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub team_name: String,
    pub section: String,
    pub user_id: UserId,
    pub event_code: String,
    /// Elapsed round time in milliseconds.
    pub time: u64,
}

/// Payload for the `joinResponse` server message.
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_code: Option<String>,
    /// Phase of the event at the time of joining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_game_mode: Option<GameMode>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Ask the server to open a new event hosted by `host_id`.
    CreateEvent { host_id: UserId },
    /// Join an existing event as a team.
    JoinEvent {
        event_code: String,
        team_id: UserId,
        team_name: String,
        section: String,
    },
    /// Start a round of `game_mode`.
    StartGame {
        event_code: String,
        game_mode: GameMode,
    },
    /// Abandon the current round and return to the waiting phase.
    RestartGame {
        event_code: String,
        game_mode: GameMode,
    },
    /// Close the event for everyone.
    EndEvent { event_code: String },
    /// Completion time for spot-the-difference and matching-pairs.
    SubmitTime(Submission),
    /// Completion time for image-scramble.
    SubmitScrambleTime(Submission),
    /// A spot-the-difference hit.
    DifferenceFound {
        event_code: String,
        difference_index: usize,
    },
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// The event changed phase (or mode).
    GameStateUpdate {
        state: Phase,
        game_mode: GameMode,
        /// Piece order for image-scramble rounds (1-based piece numbers).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scrambled_order: Option<Vec<u8>>,
    },
    /// Authoritative elapsed round time in milliseconds.
    TimerUpdate(u64),
    /// Full leaderboard for the current round.
    LeaderboardUpdate(Vec<LeaderboardEntry>),
    /// Indices of the differences found so far in the event.
    DifferenceUpdate(Vec<usize>),
    /// Code assigned to a freshly created event.
    HostCode(String),
    /// Outcome of a `joinEvent` request (boxed to reduce enum size).
    JoinResponse(Box<JoinResponsePayload>),
    /// The host closed the event.
    EventEnded,
}

/// Discriminant of a [`ServerMessage`], used to key message handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GameStateUpdate,
    TimerUpdate,
    LeaderboardUpdate,
    DifferenceUpdate,
    HostCode,
    JoinResponse,
    EventEnded,
}

impl MessageKind {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameStateUpdate => "gameStateUpdate",
            Self::TimerUpdate => "timerUpdate",
            Self::LeaderboardUpdate => "leaderboardUpdate",
            Self::DifferenceUpdate => "differenceUpdate",
            Self::HostCode => "hostCode",
            Self::JoinResponse => "joinResponse",
            Self::EventEnded => "eventEnded",
        }
    }
}

impl ServerMessage {
    /// Decode one inbound frame.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::Serialization`](crate::QuickQuestError::Serialization)
    /// for malformed JSON or an unknown event.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::GameStateUpdate { .. } => MessageKind::GameStateUpdate,
            Self::TimerUpdate(_) => MessageKind::TimerUpdate,
            Self::LeaderboardUpdate(_) => MessageKind::LeaderboardUpdate,
            Self::DifferenceUpdate(_) => MessageKind::DifferenceUpdate,
            Self::HostCode(_) => MessageKind::HostCode,
            Self::JoinResponse(_) => MessageKind::JoinResponse,
            Self::EventEnded => MessageKind::EventEnded,
        }
    }
}

impl ClientMessage {
    /// Encode as one outbound frame.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::Serialization`](crate::QuickQuestError::Serialization)
    /// if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CreateEvent { .. } => "createEvent",
            Self::JoinEvent { .. } => "joinEvent",
            Self::StartGame { .. } => "startGame",
            Self::RestartGame { .. } => "restartGame",
            Self::EndEvent { .. } => "endEvent",
            Self::SubmitTime(_) => "submitTime",
            Self::SubmitScrambleTime(_) => "submitScrambleTime",
            Self::DifferenceFound { .. } => "differenceFound",
        }
    }
}

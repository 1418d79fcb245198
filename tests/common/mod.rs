#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for QuickQuest client integration tests.
//!
//! Provides a channel-backed [`MockTransport`] driven by a [`MockServer`]
//! handle, plus helpers that build the server's JSON frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use quickquest_client::protocol::{GameMode, LeaderboardEntry, Phase};
use quickquest_client::{QuickQuestError, Transport};
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

type Frame = Option<Result<String, QuickQuestError>>;

/// Transport whose inbound frames are injected by a [`MockServer`].
///
/// All messages sent by the client are recorded.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle of a [`MockTransport`].
pub struct MockServer {
    tx: mpsc::UnboundedSender<Frame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> (Self, MockServer) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let server = MockServer { tx, sent, closed };
        (transport, server)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), QuickQuestError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, QuickQuestError>> {
        match self.incoming.recv().await {
            Some(frame) => frame,
            // Server handle dropped; behave like an idle connection.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), QuickQuestError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockServer {
    /// Deliver one JSON frame to the client.
    pub fn push(&self, frame: Value) {
        self.tx.send(Some(Ok(frame.to_string()))).unwrap();
    }

    /// Close the connection cleanly from the server side.
    pub fn hang_up(&self) {
        self.tx.send(None).unwrap();
    }

    /// Fail the connection with a receive error.
    pub fn fail(&self, reason: &str) {
        self.tx
            .send(Some(Err(QuickQuestError::TransportReceive(reason.into()))))
            .unwrap();
    }

    /// Everything the client sent so far, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// Event names of everything the client sent so far.
    pub fn sent_events(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["event"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Give the channel's I/O loop time to flush outbound frames.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ── Server frames ───────────────────────────────────────────────────

pub fn host_code_json(code: &str) -> Value {
    json!({ "event": "hostCode", "data": code })
}

pub fn join_accepted_json(code: &str, phase: Phase, mode: GameMode) -> Value {
    json!({
        "event": "joinResponse",
        "data": {
            "success": true,
            "eventCode": code,
            "gameState": phase,
            "currentGameMode": mode,
        }
    })
}

pub fn join_rejected_json(message: &str) -> Value {
    json!({
        "event": "joinResponse",
        "data": { "success": false, "message": message }
    })
}

pub fn game_state_json(phase: Phase, mode: GameMode) -> Value {
    json!({
        "event": "gameStateUpdate",
        "data": { "state": phase, "gameMode": mode }
    })
}

pub fn timer_json(elapsed_ms: u64) -> Value {
    json!({ "event": "timerUpdate", "data": elapsed_ms })
}

pub fn differences_json(found: &[usize]) -> Value {
    json!({ "event": "differenceUpdate", "data": found })
}

pub fn leaderboard_json(entries: &[LeaderboardEntry]) -> Value {
    json!({ "event": "leaderboardUpdate", "data": entries })
}

pub fn event_ended_json() -> Value {
    json!({ "event": "eventEnded" })
}

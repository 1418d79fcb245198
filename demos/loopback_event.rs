//! # Loopback Event Example
//!
//! Plays one online spot-the-difference round against an in-process fake
//! server, using a channel-based implementation of [`Transport`].
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_event
//! ```

use async_trait::async_trait;
use quickquest_client::games::DIFFERENCE_COUNT;
use quickquest_client::{
    AnonymousIdentity, Client, ClientConfig, ClientMessage, LoginForm, MessageKind,
    QuickQuestError, Transport, Update,
};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback; handed to the client as its transport.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of the loopback.
pub struct LoopbackServer {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), QuickQuestError> {
        self.tx
            .send(message)
            .map_err(|e| QuickQuestError::TransportSend(e.to_string()))
    }

    /// `None` once the fake server goes away.
    async fn recv(&mut self) -> Option<Result<String, QuickQuestError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), QuickQuestError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A fake session server
// ─────────────────────────────────────────────────────────────────────

/// Accepts any join, starts the round at once, confirms every difference
/// and answers the submission with a leaderboard.
async fn fake_server(mut server: LoopbackServer) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut found: Vec<usize> = Vec::new();
    let mut elapsed_ms = 0_u64;

    while let Some(raw) = server.rx.recv().await {
        let msg: ClientMessage = serde_json::from_str(&raw)?;
        tracing::info!("server received {}", msg.event_name());

        match msg {
            ClientMessage::JoinEvent { event_code, .. } => {
                let reply = json!({
                    "event": "joinResponse",
                    "data": {
                        "success": true,
                        "eventCode": event_code,
                        "gameState": "waiting",
                        "currentGameMode": "spot-the-difference"
                    }
                });
                server.tx.send(reply.to_string())?;
                let start = json!({
                    "event": "gameStateUpdate",
                    "data": { "state": "playing", "gameMode": "spot-the-difference" }
                });
                server.tx.send(start.to_string())?;
            }
            ClientMessage::DifferenceFound {
                difference_index, ..
            } => {
                elapsed_ms += 1_700;
                server
                    .tx
                    .send(json!({ "event": "timerUpdate", "data": elapsed_ms }).to_string())?;
                if !found.contains(&difference_index) {
                    found.push(difference_index);
                }
                server
                    .tx
                    .send(json!({ "event": "differenceUpdate", "data": found }).to_string())?;
            }
            ClientMessage::SubmitTime(submission) => {
                let board = json!({
                    "event": "leaderboardUpdate",
                    "data": [
                        { "name": "Foxes", "section": "A", "time": 6_400 },
                        { "name": submission.team_name, "section": submission.section, "time": submission.time },
                        { "name": "Hares", "section": "C", "time": 11_050 }
                    ]
                });
                server.tx.send(board.to_string())?;
            }
            other => tracing::info!("server ignoring {other:?}"),
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Play as a team
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, server) = loopback_pair();
    let server_task = tokio::spawn(fake_server(server));

    let mut identity = AnonymousIdentity::new();
    let config = ClientConfig::new("loopback://event");
    let mut client = Client::connect_with(config, &mut identity, async { Ok(transport) }).await?;
    tracing::info!("connectivity: {:?}", client.connectivity());

    client.login(LoginForm::new("Owls", "B", "4821"))?;

    let mut next_difference = 0;
    loop {
        let update = client.next_update().await;
        let snapshot = client.snapshot();
        tracing::info!(
            "{update:?} -> {:?}, {} ms",
            snapshot.lifecycle,
            snapshot.timer.elapsed_ms
        );

        // Click the next difference whenever the round starts or the
        // server confirms the previous one.
        if let Update::Message(MessageKind::GameStateUpdate | MessageKind::DifferenceUpdate) = update {
            if snapshot.shows_game() && next_difference < DIFFERENCE_COUNT {
                client.record_difference(next_difference)?;
                next_difference += 1;
            }
        }

        if !snapshot.leaderboard.is_empty() {
            for (rank, entry) in snapshot.leaderboard.iter().enumerate() {
                tracing::info!("#{} {} ({}) {} ms", rank + 1, entry.name, entry.section, entry.time);
            }
            break;
        }
        if matches!(update, Update::ConnectionLost { .. }) {
            break;
        }
    }

    client.shutdown().await;
    server_task.abort();
    Ok(())
}

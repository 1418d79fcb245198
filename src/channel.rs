//! Transport channel with reachability detection and offline fallback.
//!
//! [`Channel::connect`] runs a connection handshake under the configured
//! reachability timeout. If the handshake completes in time the channel is
//! [`Connectivity::Online`] and a background I/O loop starts; otherwise (timeout
//! or handshake error) the channel is [`Connectivity::Offline`], has no
//! connection at all, and every [`send`](Channel::send) is a silent no-op.
//!
//! The I/O loop multiplexes outbound commands, inbound frames and a shutdown
//! signal with `tokio::select!`. Inbound frames are decoded into
//! [`ServerMessage`]s and delivered, in order, on a bounded
//! [`ChannelEvent`] receiver. Only timer broadcasts may be dropped when the
//! consumer falls behind. A connection that drops later flips the channel
//! to offline once and ends with a single [`ChannelEvent::Disconnected`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig::new("ws://localhost:4000/ws");
//! let (mut channel, mut events) =
//!     Channel::connect(WebSocketTransport::connect(&config.server_url), &config).await;
//!
//! channel.send(ClientMessage::CreateEvent { host_id });
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChannelEvent::Message(msg) => { /* hand to the session */ }
//!         ChannelEvent::Disconnected { .. } => break,
//!     }
//! }
//! channel.disconnect().await;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ClientConfig;
use crate::error::Result;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::Transport;

/// Whether a session coordination server is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Something the I/O loop observed on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A decoded inbound message.
    Message(ServerMessage),
    /// The connection ended. Always the last event on the receiver.
    Disconnected {
        /// `None` when the server closed the connection cleanly.
        reason: Option<String>,
    },
}

/// Handle to one connection attempt.
///
/// Owned by the application's top-level controller. Dropping the handle
/// aborts the I/O loop; [`disconnect`](Channel::disconnect) closes it
/// gracefully.
pub struct Channel {
    cmd_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
    online: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: std::time::Duration,
}

impl Channel {
    /// Attempt a connection and fall back to offline mode if it fails.
    ///
    /// `handshake` resolves to a connected transport. It is given
    /// `config.reachability_timeout` to complete; the timeout is dropped as
    /// soon as the handshake finishes, and the handshake is dropped if the
    /// timeout fires first. Neither outcome is an error: an unreachable
    /// server yields an offline channel.
    pub async fn connect<F, T>(
        handshake: F,
        config: &ClientConfig,
    ) -> (Self, mpsc::Receiver<ChannelEvent>)
    where
        F: Future<Output = Result<T>>,
        T: Transport,
    {
        match tokio::time::timeout(config.reachability_timeout, handshake).await {
            Ok(Ok(transport)) => {
                info!(url = %config.server_url, "connected to session server");
                Self::start(transport, config)
            }
            Ok(Err(e)) => {
                warn!(url = %config.server_url, "connection error, switching to offline mode: {e}");
                Self::offline(config)
            }
            Err(_) => {
                warn!(
                    url = %config.server_url,
                    timeout_ms = u64::try_from(config.reachability_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "server not reachable, switching to offline mode"
                );
                Self::offline(config)
            }
        }
    }

    /// Start the I/O loop over an already connected transport.
    #[must_use = "the event receiver must be used to receive messages"]
    pub fn start(
        transport: impl Transport,
        config: &ClientConfig,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let online = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(io_loop(
            transport,
            cmd_rx,
            event_tx,
            Arc::clone(&online),
            shutdown_rx,
        ));

        let channel = Self {
            cmd_tx: Some(cmd_tx),
            online,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (channel, event_rx)
    }

    /// A channel with no connection. Its receiver is already closed.
    #[must_use = "the event receiver must be used to receive messages"]
    pub fn offline(config: &ClientConfig) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (_event_tx, event_rx) = mpsc::channel::<ChannelEvent>(1);
        let channel = Self {
            cmd_tx: None,
            online: Arc::new(AtomicBool::new(false)),
            task: None,
            shutdown_tx: None,
            shutdown_timeout: config.shutdown_timeout,
        };
        (channel, event_rx)
    }

    /// Queue a message for the server.
    ///
    /// Returns `false` without doing anything when the channel is offline.
    pub fn send(&self, message: ClientMessage) -> bool {
        if !self.is_online() {
            debug!(event = message.event_name(), "offline, dropping outbound message");
            return false;
        }
        let Some(cmd_tx) = &self.cmd_tx else {
            return false;
        };
        let event = message.event_name();
        if cmd_tx.send(message).is_err() {
            debug!(event, "I/O loop gone, dropping outbound message");
            return false;
        }
        true
    }

    pub fn connectivity(&self) -> Connectivity {
        if self.is_online() {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Close the connection and stop the I/O loop.
    ///
    /// The loop gets `shutdown_timeout` to close the transport; after that it
    /// is aborted. Safe to call more than once and on offline channels.
    pub async fn disconnect(&mut self) {
        debug!("channel: disconnect requested");
        self.cmd_tx = None;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!("I/O loop terminated with join error: {join_err}"),
                Err(_) => {
                    warn!("I/O loop did not exit within timeout; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("I/O loop aborted: {join_err}");
                    }
                }
            }
        }

        self.online.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("connectivity", &self.connectivity())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── I/O loop ────────────────────────────────────────────────────────

/// Exits when the handle is dropped or disconnects, or when the transport
/// closes or fails. `online` flips to `false` exactly once, on exit.
async fn io_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<ChannelEvent>,
    online: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("I/O loop started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(msg) = cmd else {
                    debug!("command channel closed, shutting down I/O loop");
                    let _ = transport.close().await;
                    go_offline(&event_tx, &online, Some("client shut down".into())).await;
                    break;
                };
                let event = msg.event_name();
                match msg.to_json() {
                    Ok(json) => {
                        debug!(event, "sending");
                        if let Err(e) = transport.send(json).await {
                            error!(event, "transport send error: {e}");
                            go_offline(&event_tx, &online, Some(format!("transport send error: {e}"))).await;
                            break;
                        }
                    }
                    // Serialization failures are bugs in this crate; keep the connection.
                    Err(e) => error!(event, "failed to serialize client message: {e}"),
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                go_offline(&event_tx, &online, Some("client shut down".into())).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match ServerMessage::from_json(&text) {
                        Ok(msg) => {
                            debug!(event = msg.kind().as_str(), "received");
                            emit(&event_tx, msg).await;
                        }
                        Err(e) => warn!("skipping undecodable server message: {e}, raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        go_offline(&event_tx, &online, Some(format!("transport receive error: {e}"))).await;
                        break;
                    }
                    None => {
                        info!("server closed the connection");
                        go_offline(&event_tx, &online, None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("I/O loop exited");
}

/// Forward an inbound message to the consumer.
///
/// Timer broadcasts are superseded by the next one, so they are dropped when
/// the consumer lags. Every other message waits for capacity.
async fn emit(event_tx: &mpsc::Sender<ChannelEvent>, msg: ServerMessage) {
    let event = ChannelEvent::Message(msg);
    let delivered = if matches!(event, ChannelEvent::Message(ServerMessage::TimerUpdate(_))) {
        match event_tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    } else {
        event_tx.send(event).await.is_ok()
    };
    if !delivered {
        debug!("event channel closed, receiver dropped");
    }
}

/// Mark the channel offline and deliver the final `Disconnected` event.
///
/// Awaits capacity instead of dropping: this event must never be lost.
async fn go_offline(
    event_tx: &mpsc::Sender<ChannelEvent>,
    online: &AtomicBool,
    reason: Option<String>,
) {
    online.store(false, Ordering::Release);
    if event_tx
        .send(ChannelEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
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
    use crate::error::QuickQuestError;
    use crate::protocol::{MessageKind, UserId};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Replays scripted frames and records everything sent.
    struct ScriptedTransport {
        incoming: VecDeque<Option<std::result::Result<String, QuickQuestError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, QuickQuestError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), QuickQuestError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, QuickQuestError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), QuickQuestError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("ws://test.invalid")
    }

    fn create_event() -> ClientMessage {
        ClientMessage::CreateEvent {
            host_id: UserId::new("host-1"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_falls_back_to_offline() {
        let handshake = std::future::pending::<Result<ScriptedTransport>>();
        let (channel, mut events) = Channel::connect(handshake, &config()).await;

        assert_eq!(channel.connectivity(), Connectivity::Offline);
        assert!(!channel.send(create_event()));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_honours_configured_duration() {
        let config = config().with_reachability_timeout(Duration::from_millis(1500));
        let started = tokio::time::Instant::now();
        let (channel, _events) =
            Channel::connect(std::future::pending::<Result<ScriptedTransport>>(), &config).await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1500));
        assert!(waited < Duration::from_millis(1600));
        assert!(!channel.is_online());
    }

    #[tokio::test]
    async fn handshake_error_falls_back_to_offline() {
        let handshake = async { Err::<ScriptedTransport, _>(QuickQuestError::TransportClosed) };
        let (channel, _events) = Channel::connect(handshake, &config()).await;
        assert_eq!(channel.connectivity(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn successful_handshake_is_online_and_sends_json() {
        let (transport, sent, _closed) = ScriptedTransport::new(vec![]);
        let (mut channel, _events) = Channel::connect(async { Ok(transport) }, &config()).await;
        assert_eq!(channel.connectivity(), Connectivity::Online);

        assert!(channel.send(create_event()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
            assert_eq!(value["event"], "createEvent");
            assert_eq!(value["data"]["hostId"], "host-1");
        }

        channel.disconnect().await;
    }

    #[tokio::test]
    async fn inbound_frames_are_delivered_in_order() {
        let (transport, _sent, _closed) = ScriptedTransport::new(vec![
            Some(Ok(r#"{"event":"hostCode","data":"4821"}"#.into())),
            Some(Ok("not json".into())),
            Some(Ok(r#"{"event":"timerUpdate","data":250}"#.into())),
        ]);
        let (mut channel, mut events) = Channel::start(transport, &config());

        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Message(ServerMessage::HostCode("4821".into()))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Message(ServerMessage::TimerUpdate(250))
        );

        channel.disconnect().await;
    }

    #[tokio::test]
    async fn lagging_consumer_only_loses_timer_updates() {
        let mut frames = vec![Some(Ok(
            r#"{"event":"joinResponse","data":{"success":true,"gameState":"playing"}}"#.to_string(),
        ))];
        for ms in 1..=10 {
            frames.push(Some(Ok(format!(r#"{{"event":"timerUpdate","data":{}}}"#, ms * 100))));
        }
        frames.push(Some(Ok(r#"{"event":"eventEnded"}"#.to_string())));
        let (transport, _sent, _closed) = ScriptedTransport::new(frames);
        let (mut channel, mut events) =
            Channel::start(transport, &config().with_event_channel_capacity(4));

        // Let the loop run into the full queue before draining it.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut kinds = Vec::new();
        loop {
            let Some(ChannelEvent::Message(msg)) = events.recv().await else {
                panic!("channel ended before eventEnded");
            };
            kinds.push(msg.kind());
            if msg == ServerMessage::EventEnded {
                break;
            }
        }
        assert_eq!(kinds.first(), Some(&MessageKind::JoinResponse));
        assert_eq!(kinds.last(), Some(&MessageKind::EventEnded));
        assert!(kinds.len() < 12, "some timer updates should have been dropped");

        channel.disconnect().await;
    }

    #[tokio::test]
    async fn server_close_flips_offline_once() {
        let (transport, _sent, _closed) = ScriptedTransport::new(vec![None]);
        let (channel, mut events) = Channel::start(transport, &config());

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Disconnected { reason: None }));
        assert!(events.recv().await.is_none());
        assert_eq!(channel.connectivity(), Connectivity::Offline);
        assert!(!channel.send(create_event()));
    }

    #[tokio::test]
    async fn receive_error_flips_offline() {
        let (transport, _sent, _closed) = ScriptedTransport::new(vec![Some(Err(
            QuickQuestError::TransportReceive("reset by peer".into()),
        ))]);
        let (channel, mut events) = Channel::start(transport, &config());

        match events.recv().await.unwrap() {
            ChannelEvent::Disconnected { reason } => {
                assert!(reason.unwrap().contains("reset by peer"));
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(!channel.is_online());
    }

    #[tokio::test]
    async fn disconnect_closes_transport_and_is_idempotent() {
        let (transport, _sent, closed) = ScriptedTransport::new(vec![]);
        let (mut channel, mut events) = Channel::start(transport, &config());

        channel.disconnect().await;
        assert!(closed.load(Ordering::Relaxed));
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Disconnected { .. })
        ));
        assert!(!channel.send(create_event()));

        channel.disconnect().await;
        assert_eq!(channel.connectivity(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn offline_channel_disconnect_is_a_no_op() {
        let (mut channel, _events) = Channel::offline(&config());
        channel.disconnect().await;
        assert_eq!(channel.connectivity(), Connectivity::Offline);
    }
}

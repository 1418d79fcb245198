//! Top-level controller tying the session to a server connection.
//!
//! [`Client`] owns one [`Channel`], one [`Session`] and the tick loop of the
//! local round timer. User actions are forwarded to the session and whatever
//! it queues for the server is flushed straight onto the channel. Inbound
//! traffic, timer ticks and identity changes are consumed one at a time by
//! [`Client::next_update`], so the session is only ever mutated from the
//! task that owns the client.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig::new("ws://localhost:4000/ws");
//! let mut identity = AnonymousIdentity::new();
//! let mut client = Client::connect(config, &mut identity).await?;
//!
//! client.login(LoginForm::new("Owls", "B", "4821"))?;
//!
//! loop {
//!     match client.next_update().await {
//!         Update::Message(_) | Update::Tick { .. } => render(client.snapshot()),
//!         Update::ConnectionLost { .. } => show_offline_banner(),
//!         Update::AuthChanged(_) => {}
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, Connectivity};
use crate::error::{QuickQuestError, Result};
use crate::games::GameRegistry;
use crate::identity::IdentityProvider;
use crate::protocol::{GameMode, MessageKind, ServerMessage, UserId};
use crate::router::MessageRouter;
use crate::session::{
    LifecycleState, LoginForm, Notice, Session, SessionSnapshot, DEFAULT_HOST_PASSWORD,
};
use crate::transport::Transport;

/// Default time allowed for the first connection before going offline.
const DEFAULT_REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default period of the local round timer.
const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(50);

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Client`].
///
/// The only required field is `server_url`; all others have sensible
/// defaults.
///
/// # Example
///
/// ```
/// use quickquest_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("ws://localhost:4000/ws");
/// assert_eq!(config.reachability_timeout, Duration::from_secs(5));
/// assert_eq!(config.tick_period, Duration::from_millis(50));
/// assert_eq!(config.host_password, "1918");
/// ```
///
/// # Tuning
///
/// ```
/// use quickquest_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("ws://localhost:4000/ws")
///     .with_reachability_timeout(Duration::from_secs(2))
///     .with_tick_period(Duration::from_millis(100))
///     .with_event_channel_capacity(512);
/// assert_eq!(config.event_channel_capacity, 512);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the session server.
    pub server_url: String,
    /// How long the initial handshake may take before the client gives up
    /// and runs offline.
    ///
    /// Defaults to **5 seconds**.
    pub reachability_timeout: Duration,
    /// Period of the local round timer used offline.
    ///
    /// Defaults to **50 ms**. Values below 1 ms are clamped to 1 ms.
    pub tick_period: Duration,
    /// Login code that grants the host role.
    ///
    /// Defaults to `"1918"`.
    pub host_password: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the client cannot keep up with incoming server messages, timer
    /// broadcasts are dropped (with a warning logged). Every other message
    /// and the final disconnect notification wait for capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the I/O loop gets to close the transport on shutdown before it
    /// is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration for `server_url` with default values.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            reachability_timeout: DEFAULT_REACHABILITY_TIMEOUT,
            tick_period: DEFAULT_TICK_PERIOD,
            host_password: DEFAULT_HOST_PASSWORD.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_reachability_timeout(mut self, timeout: Duration) -> Self {
        self.reachability_timeout = timeout;
        self
    }

    /// Set the local tick period. Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_host_password(mut self, password: impl Into<String>) -> Self {
        self.host_password = password.into();
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    fn tick_period_ms(&self) -> u64 {
        u64::try_from(self.tick_period.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
    }
}

// ── Updates ─────────────────────────────────────────────────────────

/// What [`Client::next_update`] just applied to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// An inbound message of this kind was applied.
    Message(MessageKind),
    /// The local round timer advanced.
    Tick { elapsed_ms: u64 },
    /// The connection dropped; the session is back at login, offline.
    ConnectionLost { reason: Option<String> },
    /// The identity provider reported a new sign-in state.
    AuthChanged(Option<UserId>),
}

// ── Client ──────────────────────────────────────────────────────────

/// Session controller.
///
/// Not `Clone`: exactly one task drives a client.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    channel: Channel,
    events: mpsc::Receiver<ChannelEvent>,
    events_open: bool,
    session: Session,
    router: MessageRouter<Session>,
    ticker: Option<Interval>,
    ticker_run: u64,
    auth: Option<watch::Receiver<Option<UserId>>>,
}

impl Client {
    /// Wrap an existing channel.
    ///
    /// The session starts at login with the channel's connectivity.
    pub fn new(
        channel: Channel,
        events: mpsc::Receiver<ChannelEvent>,
        user_id: UserId,
        config: ClientConfig,
    ) -> Self {
        let session = Session::new(user_id, channel.connectivity())
            .with_host_password(config.host_password.clone());
        Self {
            config,
            channel,
            events,
            events_open: true,
            session,
            router: Session::router(),
            ticker: None,
            ticker_run: 0,
            auth: None,
        }
    }

    /// Sign in, then connect to `config.server_url` over WebSocket.
    ///
    /// An unreachable server is not an error: the client comes up offline.
    ///
    /// # Errors
    ///
    /// Only identity failures are returned.
    #[cfg(feature = "transport-websocket")]
    pub async fn connect<I>(config: ClientConfig, identity: &mut I) -> Result<Self>
    where
        I: IdentityProvider,
    {
        let url = config.server_url.clone();
        Self::connect_with(
            config,
            identity,
            crate::transports::WebSocketTransport::connect(&url),
        )
        .await
    }

    /// Sign in, then run `handshake` under the reachability timeout.
    ///
    /// # Errors
    ///
    /// Only identity failures are returned.
    pub async fn connect_with<I, F, T>(
        config: ClientConfig,
        identity: &mut I,
        handshake: F,
    ) -> Result<Self>
    where
        I: IdentityProvider,
        F: std::future::Future<Output = Result<T>>,
        T: Transport,
    {
        let user_id = identity.sign_in_anonymously().await?;
        let (channel, events) = Channel::connect(handshake, &config).await;
        info!(user_id = %user_id, connectivity = ?channel.connectivity(), "client ready");
        let mut client = Self::new(channel, events, user_id, config);
        client.auth = Some(identity.on_auth_state_changed());
        Ok(client)
    }

    /// Replace the mini-game table.
    #[must_use]
    pub fn with_games(mut self, games: GameRegistry) -> Self {
        self.session = self.session.with_games(games);
        self
    }

    /// Observe inbound messages of `kind` after the session has applied them.
    pub fn on_message<F>(&mut self, kind: MessageKind, mut observer: F)
    where
        F: FnMut(&Session, &ServerMessage) + Send + 'static,
    {
        self.router.on(kind, move |session, msg| observer(session, msg));
    }

    // ── User actions ────────────────────────────────────────────────

    /// See [`Session::login`].
    ///
    /// # Errors
    ///
    /// Propagates the session's validation and transition errors.
    pub fn login(&mut self, form: LoginForm) -> Result<()> {
        self.session.login(form)?;
        self.flush();
        Ok(())
    }

    /// See [`Session::select_game_mode`].
    ///
    /// # Errors
    ///
    /// Propagates the session's role and transition errors.
    pub fn select_game_mode(&mut self, mode: GameMode) -> Result<()> {
        self.session.select_game_mode(mode)
    }

    /// See [`Session::start_game`].
    ///
    /// # Errors
    ///
    /// Propagates the session's role and transition errors.
    pub fn start_game(&mut self) -> Result<()> {
        self.session.start_game()?;
        self.flush();
        Ok(())
    }

    /// See [`Session::restart_game`].
    ///
    /// # Errors
    ///
    /// Propagates the session's role and transition errors.
    pub fn restart_game(&mut self) -> Result<()> {
        self.session.restart_game()?;
        self.flush();
        Ok(())
    }

    /// See [`Session::end_event`].
    ///
    /// # Errors
    ///
    /// Propagates the session's role errors.
    pub fn end_event(&mut self) -> Result<()> {
        self.session.end_event()?;
        self.flush();
        Ok(())
    }

    pub fn logout(&mut self) {
        self.session.logout();
        self.ticker = None;
    }

    /// See [`Session::play_again`].
    ///
    /// # Errors
    ///
    /// Propagates the session's transition errors.
    pub fn play_again(&mut self) -> Result<()> {
        self.session.play_again()
    }

    /// See [`Session::record_difference`].
    ///
    /// # Errors
    ///
    /// Propagates the session's validation and transition errors.
    pub fn record_difference(&mut self, index: usize) -> Result<()> {
        self.session.record_difference(index)?;
        self.flush();
        Ok(())
    }

    /// See [`Session::swap_pieces`].
    ///
    /// # Errors
    ///
    /// Propagates the session's validation and transition errors.
    pub fn swap_pieces(&mut self, a: usize, b: usize) -> Result<()> {
        self.session.swap_pieces(a, b)?;
        self.flush();
        Ok(())
    }

    /// See [`Session::record_match`].
    ///
    /// # Errors
    ///
    /// Propagates the session's validation and transition errors.
    pub fn record_match(&mut self, a: usize, b: usize) -> Result<()> {
        self.session.record_match(a, b)?;
        self.flush();
        Ok(())
    }

    /// See [`Session::complete_round`].
    ///
    /// # Errors
    ///
    /// Propagates the session's transition errors.
    pub fn complete_round(&mut self) -> Result<()> {
        self.session.complete_round()?;
        self.flush();
        Ok(())
    }

    // ── Event loop ──────────────────────────────────────────────────

    /// Wait for the next inbound message, timer tick or identity change and
    /// apply it to the session.
    ///
    /// Never resolves while there is nothing left to wait for (offline, no
    /// round running, no identity provider attached).
    pub async fn next_update(&mut self) -> Update {
        loop {
            self.sync_ticker();

            tokio::select! {
                event = self.events.recv(), if self.events_open => match event {
                    Some(ChannelEvent::Message(msg)) => {
                        let kind = msg.kind();
                        self.router.dispatch(&mut self.session, &msg);
                        self.flush();
                        return Update::Message(kind);
                    }
                    Some(ChannelEvent::Disconnected { reason }) => {
                        self.events_open = false;
                        self.session.connection_lost(reason.clone());
                        return Update::ConnectionLost { reason };
                    }
                    None => {
                        debug!("event channel closed");
                        self.events_open = false;
                    }
                },

                () = next_tick(&mut self.ticker) => {
                    if self.session.tick(self.config.tick_period_ms()) {
                        return Update::Tick {
                            elapsed_ms: self.session.timer().elapsed_ms(),
                        };
                    }
                }

                changed = auth_changed(&mut self.auth) => match changed {
                    Some(user) => {
                        if let Some(id) = &user {
                            self.session.set_user_id(id.clone());
                        }
                        return Update::AuthChanged(user);
                    }
                    None => {
                        debug!("identity provider gone");
                        self.auth = None;
                    }
                },
            }
        }
    }

    /// Retry the server from the login screen.
    ///
    /// The current channel is closed and `handshake` gets the reachability
    /// timeout again. Returns the new connectivity.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::InvalidTransition`] outside
    /// [`LifecycleState::Login`].
    pub async fn reconnect<F, T>(&mut self, handshake: F) -> Result<Connectivity>
    where
        F: std::future::Future<Output = Result<T>>,
        T: Transport,
    {
        let state = self.session.lifecycle();
        if state != LifecycleState::Login {
            return Err(QuickQuestError::InvalidTransition {
                action: "reconnect",
                state,
            });
        }

        self.channel.disconnect().await;
        let (channel, events) = Channel::connect(handshake, &self.config).await;
        self.channel = channel;
        self.events = events;
        self.events_open = true;

        let connectivity = self.channel.connectivity();
        self.session.set_connectivity(connectivity)?;
        info!(?connectivity, "reconnect finished");
        Ok(connectivity)
    }

    /// Close the connection.
    ///
    /// An online session returns to login and the next login runs offline.
    /// An offline session keeps its state.
    pub async fn shutdown(&mut self) {
        debug!("client: shutdown requested");
        self.events_open = false;
        self.channel.disconnect().await;
        if self.session.connectivity() == Connectivity::Online {
            self.session.disconnected();
            self.ticker = None;
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Drain notices for the user.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.session.take_notices()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connectivity(&self) -> Connectivity {
        self.session.connectivity()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn flush(&mut self) {
        for msg in self.session.take_outbound() {
            let event = msg.event_name();
            if self.channel.send(msg) {
                debug!(event, "queued for server");
            }
        }
    }

    /// Keep exactly one interval alive per local timer run.
    fn sync_ticker(&mut self) {
        let timer = self.session.timer();
        if !timer.is_local_running() {
            self.ticker = None;
            return;
        }
        if self.ticker.is_some() && self.ticker_run == timer.run_id() {
            return;
        }
        let period = self.config.tick_period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(interval);
        self.ticker_run = timer.run_id();
        debug!(run_id = self.ticker_run, "local tick loop started");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// `None` once the provider has been dropped.
async fn auth_changed(
    auth: &mut Option<watch::Receiver<Option<UserId>>>,
) -> Option<Option<UserId>> {
    let Some(rx) = auth else {
        return std::future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => Some(rx.borrow_and_update().clone()),
        Err(_) => {
            warn!("identity provider dropped its sender");
            None
        }
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
    use crate::identity::AnonymousIdentity;
    use crate::protocol::ClientMessage;
    use crate::timer::TimerSource;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Inbound frames come from a channel the test holds; sent frames are
    /// recorded.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), QuickQuestError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, QuickQuestError>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), QuickQuestError> {
            Ok(())
        }
    }

    fn mock() -> (
        MockTransport,
        mpsc::UnboundedSender<String>,
        Arc<StdMutex<Vec<String>>>,
    ) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = MockTransport {
            incoming,
            sent: Arc::clone(&sent),
        };
        (transport, tx, sent)
    }

    fn config() -> ClientConfig {
        ClientConfig::new("ws://test.invalid")
    }

    fn sent_events(sent: &StdMutex<Vec<String>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|raw| {
                let value: serde_json::Value = serde_json::from_str(raw).unwrap();
                value["event"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.server_url, "ws://test.invalid");
        assert_eq!(config.reachability_timeout, Duration::from_secs(5));
        assert_eq!(config.tick_period, Duration::from_millis(50));
        assert_eq!(config.host_password, "1918");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builders_clamp() {
        let config = config()
            .with_tick_period(Duration::ZERO)
            .with_event_channel_capacity(0)
            .with_host_password("abc");
        assert_eq!(config.tick_period, Duration::from_millis(1));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.host_password, "abc");
        assert_eq!(config.tick_period_ms(), 1);
    }

    #[tokio::test]
    async fn actions_are_flushed_to_the_channel() {
        let (transport, _inbound, sent) = mock();
        let mut identity = AnonymousIdentity::new();
        let mut client = Client::connect_with(config(), &mut identity, async { Ok(transport) })
            .await
            .unwrap();
        assert_eq!(client.connectivity(), Connectivity::Online);

        client.login(LoginForm::new("", "", "1918")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent_events(&sent), ["createEvent"]);
    }

    #[tokio::test]
    async fn observers_run_after_the_session() {
        let (transport, inbound, _sent) = mock();
        let mut identity = AnonymousIdentity::new();
        let mut client = Client::connect_with(config(), &mut identity, async { Ok(transport) })
            .await
            .unwrap();
        client.login(LoginForm::new("", "", "1918")).unwrap();

        let seen = Arc::new(StdMutex::new(None));
        let seen_in_observer = Arc::clone(&seen);
        client.on_message(MessageKind::HostCode, move |session, _| {
            *seen_in_observer.lock().unwrap() = session.host_code().map(str::to_string);
        });

        inbound
            .send(r#"{"event":"hostCode","data":"4821"}"#.into())
            .unwrap();
        assert_eq!(
            client.next_update().await,
            Update::Message(MessageKind::HostCode)
        );
        assert_eq!(seen.lock().unwrap().as_deref(), Some("4821"));
    }

    #[tokio::test]
    async fn completion_triggered_by_broadcast_is_sent() {
        let (transport, inbound, sent) = mock();
        let mut identity = AnonymousIdentity::new();
        let mut client = Client::connect_with(config(), &mut identity, async { Ok(transport) })
            .await
            .unwrap();
        client.login(LoginForm::new("Owls", "B", "1234")).unwrap();

        for frame in [
            r#"{"event":"joinResponse","data":{"success":true,"eventCode":"1234","gameState":"playing","currentGameMode":"spot-the-difference"}}"#,
            r#"{"event":"timerUpdate","data":4200}"#,
            r#"{"event":"differenceUpdate","data":[0,1,2,3,4]}"#,
        ] {
            inbound.send(frame.into()).unwrap();
            client.next_update().await;
        }

        assert_eq!(client.snapshot().lifecycle, LifecycleState::Leaderboard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent_events(&sent), ["joinEvent", "submitTime"]);
        let raw = sent.lock().unwrap()[1].clone();
        let msg: ClientMessage = serde_json::from_str(&raw).unwrap();
        assert!(matches!(msg, ClientMessage::SubmitTime(s) if s.time == 4200));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_round_ticks_locally() {
        let handshake = std::future::pending::<Result<MockTransport>>();
        let mut identity = AnonymousIdentity::new();
        let mut client = Client::connect_with(config(), &mut identity, handshake)
            .await
            .unwrap();
        assert_eq!(client.connectivity(), Connectivity::Offline);

        client.login(LoginForm::new("Owls", "B", "")).unwrap();
        assert_eq!(client.session().timer().source(), TimerSource::Local);

        let mut last = 0;
        for _ in 0..4 {
            match client.next_update().await {
                Update::Tick { elapsed_ms } => last = elapsed_ms,
                other => panic!("expected tick, got {other:?}"),
            }
        }
        assert_eq!(last, 200);
    }

    #[tokio::test]
    async fn auth_changes_update_the_session() {
        let (transport, _inbound, _sent) = mock();
        let mut identity = AnonymousIdentity::new();
        let mut client = Client::connect_with(config(), &mut identity, async { Ok(transport) })
            .await
            .unwrap();

        identity.sign_out();
        assert_eq!(client.next_update().await, Update::AuthChanged(None));

        let id = identity.sign_in_anonymously().await.unwrap();
        assert_eq!(client.next_update().await, Update::AuthChanged(Some(id.clone())));
        assert_eq!(client.session().user_id(), &id);
    }

    #[tokio::test]
    async fn reconnect_only_from_login() {
        let mut identity = AnonymousIdentity::new();
        let mut client = Client::connect_with(config(), &mut identity, async {
            Err::<MockTransport, _>(QuickQuestError::TransportClosed)
        })
        .await
        .unwrap();
        assert_eq!(client.connectivity(), Connectivity::Offline);

        let (transport, _inbound, _sent) = mock();
        let connectivity = client.reconnect(async { Ok(transport) }).await.unwrap();
        assert_eq!(connectivity, Connectivity::Online);
        assert_eq!(client.connectivity(), Connectivity::Online);

        client.login(LoginForm::new("", "", "1918")).unwrap();
        let (transport, _inbound, _sent) = mock();
        let err = client.reconnect(async { Ok(transport) }).await.unwrap_err();
        assert!(matches!(
            err,
            QuickQuestError::InvalidTransition {
                state: LifecycleState::HostDashboard,
                ..
            }
        ));
    }
}

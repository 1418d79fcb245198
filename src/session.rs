//! Session state machine.
//!
//! [`Session`] is the client's view of one event: who we are (host or
//! player), which event we are in, the lifecycle phase, the round timer,
//! round progress and the leaderboard. It performs no I/O. User actions and
//! inbound messages mutate it, and anything that has to reach the server is
//! queued for the owner to drain with [`Session::take_outbound`]. Every
//! method leaves the session in exactly one lifecycle state.
//!
//! ```text
//!            ┌──────────── event ended / end event / logout ────────────┐
//!            ▼                                                          │
//!  Login ──► WaitingForHost ──► Playing ──► Leaderboard ──► WaitingForHost
//!    │            └───────────────────────► Leaderboard                 │
//!    ├──► HostDashboard ──► Playing ──► Leaderboard ──► HostDashboard   │
//!    └──► Playing (offline player) ─────────────────────────────────────┘
//! ```
//!
//! Inbound messages reach the session through the handlers returned by
//! [`Session::router`].

use std::mem;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::Connectivity;
use crate::error::{QuickQuestError, Result};
use crate::games::{GameRegistry, MiniGame, RoundState, DIFFERENCE_COUNT, PAIR_CARDS};
use crate::leaderboard::Leaderboard;
use crate::protocol::{
    ClientMessage, GameMode, JoinResponsePayload, LeaderboardEntry, MessageKind, Phase,
    ServerMessage, Submission, UserId,
};
use crate::router::MessageRouter;
use crate::timer::{Timer, TimerSource, TimerState};

/// Event code used for every session that runs without a server.
pub const OFFLINE_CODE: &str = "OFFLINE";

/// Default host password.
pub const DEFAULT_HOST_PASSWORD: &str = "1918";

const JOINED_STATUS: &str = "Successfully joined, waiting for host...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Controls the event lifecycle; never plays.
    Host,
    /// Plays rounds and submits completion times.
    Player,
}

/// Screen-level phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Login,
    WaitingForHost,
    HostDashboard,
    Playing,
    Leaderboard,
}

/// Team details supplied once at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub team_name: String,
    pub section: String,
    pub user_id: UserId,
}

/// Login form contents.
///
/// `code` doubles as the host password and the event code to join.
#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub team_name: String,
    pub section: String,
    pub code: String,
}

impl LoginForm {
    pub fn new(
        team_name: impl Into<String>,
        section: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            team_name: team_name.into(),
            section: section.into(),
            code: code.into(),
        }
    }
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The server declined our join request.
    JoinRejected { message: String },
    /// The host ended the event; the session is back at login.
    EventEnded,
    /// The server connection dropped; the session is back at login and
    /// continues offline.
    ConnectionLost { reason: Option<String> },
}

/// A consistent copy of the session for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub role: Option<Role>,
    pub lifecycle: LifecycleState,
    pub connectivity: Connectivity,
    pub event_code: Option<String>,
    pub host_code: Option<String>,
    pub game_mode: GameMode,
    pub timer: TimerState,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub status: Option<String>,
}

impl SessionSnapshot {
    /// Whether the mini-game itself should be on screen. Hosts only ever
    /// see control panels.
    pub fn shows_game(&self) -> bool {
        self.role == Some(Role::Player) && self.lifecycle == LifecycleState::Playing
    }
}

/// Client-side state of one event.
#[derive(Debug)]
pub struct Session {
    host_password: String,
    connectivity: Connectivity,
    games: GameRegistry,
    user_id: UserId,
    role: Option<Role>,
    participant: Option<Participant>,
    event_code: Option<String>,
    host_code: Option<String>,
    requested_code: Option<String>,
    game_mode: GameMode,
    lifecycle: LifecycleState,
    timer: Timer,
    round: RoundState,
    leaderboard: Leaderboard,
    status: Option<String>,
    outbound: Vec<ClientMessage>,
    notices: Vec<Notice>,
}

impl Session {
    /// A fresh session at [`LifecycleState::Login`].
    pub fn new(user_id: UserId, connectivity: Connectivity) -> Self {
        Self {
            host_password: DEFAULT_HOST_PASSWORD.to_string(),
            connectivity,
            games: GameRegistry::default(),
            user_id,
            role: None,
            participant: None,
            event_code: None,
            host_code: None,
            requested_code: None,
            game_mode: GameMode::default(),
            lifecycle: LifecycleState::Login,
            timer: Timer::new(timer_source(connectivity)),
            round: RoundState::default(),
            leaderboard: Leaderboard::new(),
            status: None,
            outbound: Vec::new(),
            notices: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_host_password(mut self, password: impl Into<String>) -> Self {
        self.host_password = password.into();
        self
    }

    /// Replace the mini-game dispatch table.
    #[must_use]
    pub fn with_games(mut self, games: GameRegistry) -> Self {
        self.games = games;
        self
    }

    /// Handlers that apply inbound server messages to a session.
    pub fn router() -> MessageRouter<Session> {
        let mut router = MessageRouter::new();
        router.on(MessageKind::GameStateUpdate, |s: &mut Session, msg| {
            if let ServerMessage::GameStateUpdate {
                state,
                game_mode,
                scrambled_order,
            } = msg
            {
                s.on_game_state_update(*state, *game_mode, scrambled_order.as_deref());
            }
        });
        router.on(MessageKind::TimerUpdate, |s: &mut Session, msg| {
            if let ServerMessage::TimerUpdate(ms) = msg {
                s.on_timer_update(*ms);
            }
        });
        router.on(MessageKind::LeaderboardUpdate, |s: &mut Session, msg| {
            if let ServerMessage::LeaderboardUpdate(entries) = msg {
                s.on_leaderboard_update(entries.clone());
            }
        });
        router.on(MessageKind::DifferenceUpdate, |s: &mut Session, msg| {
            if let ServerMessage::DifferenceUpdate(found) = msg {
                s.on_difference_update(found);
            }
        });
        router.on(MessageKind::HostCode, |s: &mut Session, msg| {
            if let ServerMessage::HostCode(code) = msg {
                s.on_host_code(code);
            }
        });
        router.on(MessageKind::JoinResponse, |s: &mut Session, msg| {
            if let ServerMessage::JoinResponse(payload) = msg {
                s.on_join_response(payload);
            }
        });
        router.on(MessageKind::EventEnded, |s: &mut Session, _| s.on_event_ended());
        router
    }

    // ── User actions ────────────────────────────────────────────────

    /// Submit the login form.
    ///
    /// A `code` equal to the host password logs in as host. Anything else is
    /// treated as an event code and logs in as a player, which requires a
    /// team name and section.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::Validation`] if a player leaves team name or
    /// section blank; [`QuickQuestError::InvalidTransition`] outside `Login`.
    pub fn login(&mut self, form: LoginForm) -> Result<()> {
        self.require_state("log in", &[LifecycleState::Login])?;

        if form.code == self.host_password {
            self.login_host(form);
            return Ok(());
        }

        let team_name = form.team_name.trim();
        let section = form.section.trim();
        if team_name.is_empty() || section.is_empty() {
            return Err(QuickQuestError::Validation(
                "please enter both team name and section".into(),
            ));
        }

        self.role = Some(Role::Player);
        self.participant = Some(Participant {
            team_name: team_name.to_string(),
            section: section.to_string(),
            user_id: self.user_id.clone(),
        });

        if self.is_offline() {
            self.event_code = Some(OFFLINE_CODE.to_string());
            self.begin_round();
            self.transition(LifecycleState::Playing);
            return Ok(());
        }

        let event_code = form.code.trim().to_string();
        self.requested_code = Some(event_code.clone());
        self.outbound.push(ClientMessage::JoinEvent {
            event_code,
            team_id: self.user_id.clone(),
            team_name: team_name.to_string(),
            section: section.to_string(),
        });
        self.transition(LifecycleState::WaitingForHost);
        Ok(())
    }

    fn login_host(&mut self, form: LoginForm) {
        let team_name = non_blank(form.team_name, "Host");
        let section = non_blank(form.section, "Admin");
        self.role = Some(Role::Host);
        self.participant = Some(Participant {
            team_name,
            section,
            user_id: self.user_id.clone(),
        });

        if self.is_offline() {
            self.host_code = Some(OFFLINE_CODE.to_string());
            self.event_code = Some(OFFLINE_CODE.to_string());
        } else {
            self.outbound.push(ClientMessage::CreateEvent {
                host_id: self.user_id.clone(),
            });
        }
        self.transition(LifecycleState::HostDashboard);
    }

    /// Choose the mini-game for the next round.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::NotHost`] for players, [`QuickQuestError::Validation`]
    /// for modes with no registered controller.
    pub fn select_game_mode(&mut self, mode: GameMode) -> Result<()> {
        self.require_host()?;
        self.require_state("select a game", &[LifecycleState::HostDashboard])?;
        if self.games.get(mode).is_none() {
            return Err(QuickQuestError::Validation(format!(
                "no mini-game registered for {mode}"
            )));
        }
        self.game_mode = mode;
        Ok(())
    }

    /// Start a round.
    ///
    /// Offline the host moves straight to `Playing` with a local timer.
    /// Online a `startGame` request is sent and the session waits for the
    /// server's `gameStateUpdate`.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::NotHost`] for players, [`QuickQuestError::Validation`]
    /// while the server has not yet assigned an event code.
    pub fn start_game(&mut self) -> Result<()> {
        self.require_host()?;
        self.require_state("start a game", &[LifecycleState::HostDashboard])?;

        if self.is_offline() {
            self.begin_round();
            self.transition(LifecycleState::Playing);
            return Ok(());
        }

        let Some(event_code) = self.host_code.clone() else {
            return Err(QuickQuestError::Validation(
                "event code has not been assigned yet".into(),
            ));
        };
        self.begin_round();
        self.outbound.push(ClientMessage::StartGame {
            event_code,
            game_mode: self.game_mode,
        });
        Ok(())
    }

    /// Abandon the round and return to the dashboard.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::NotHost`] for players.
    pub fn restart_game(&mut self) -> Result<()> {
        self.require_host()?;
        self.require_state(
            "restart the game",
            &[
                LifecycleState::HostDashboard,
                LifecycleState::Playing,
                LifecycleState::Leaderboard,
            ],
        )?;

        self.clear_round();
        self.transition(LifecycleState::HostDashboard);
        if let (false, Some(event_code)) = (self.is_offline(), self.host_code.clone()) {
            self.outbound.push(ClientMessage::RestartGame {
                event_code,
                game_mode: self.game_mode,
            });
        }
        Ok(())
    }

    /// Close the event. The session returns to `Login` immediately, without
    /// waiting for the server to acknowledge.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::NotHost`] for players.
    pub fn end_event(&mut self) -> Result<()> {
        self.require_host()?;
        if let (false, Some(event_code)) = (self.is_offline(), self.host_code.clone()) {
            self.outbound.push(ClientMessage::EndEvent { event_code });
        }
        self.reset_to_login();
        Ok(())
    }

    /// Leave the session locally. Nothing is sent to the server.
    pub fn logout(&mut self) {
        info!(role = ?self.role, "logging out");
        self.reset_to_login();
    }

    /// Offline only: play another round, keeping the local leaderboard.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::InvalidTransition`] online, for hosts, or outside
    /// `Leaderboard`.
    pub fn play_again(&mut self) -> Result<()> {
        self.require_player("play again")?;
        self.require_state("play again", &[LifecycleState::Leaderboard])?;
        if !self.is_offline() {
            return Err(self.invalid("play again while online"));
        }
        self.begin_round();
        self.transition(LifecycleState::Playing);
        Ok(())
    }

    // ── Mini-game input ─────────────────────────────────────────────

    /// A spot-the-difference hit at `index`.
    ///
    /// Offline the hit is recorded directly. Online it is reported to the
    /// server, whose `differenceUpdate` broadcast is the source of truth.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::Validation`] for an out-of-range index;
    /// [`QuickQuestError::InvalidTransition`] when not playing that mode.
    pub fn record_difference(&mut self, index: usize) -> Result<()> {
        self.require_round("record a difference", GameMode::SpotTheDifference)?;
        if index >= DIFFERENCE_COUNT {
            return Err(QuickQuestError::Validation(format!(
                "difference index {index} out of range"
            )));
        }

        if self.is_offline() {
            self.round.found_differences.insert(index);
            self.check_completion();
        } else {
            self.outbound.push(ClientMessage::DifferenceFound {
                event_code: self.event_code.clone().unwrap_or_default(),
                difference_index: index,
            });
        }
        Ok(())
    }

    /// Swap two image-scramble slots.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::Validation`] if either slot is out of range or the
    /// pieces have not been dealt.
    pub fn swap_pieces(&mut self, a: usize, b: usize) -> Result<()> {
        self.require_round("swap pieces", GameMode::ImageScramble)?;
        if !self.round.swap_pieces(a, b) {
            return Err(QuickQuestError::Validation(format!(
                "cannot swap slots {a} and {b}"
            )));
        }
        self.check_completion();
        Ok(())
    }

    /// Two matching-pairs cards were turned over together.
    ///
    /// They are marked matched only if the dealt table shows the same face
    /// at both positions.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::Validation`] for the same card twice, out-of-range
    /// or already matched cards, and for two different faces.
    pub fn record_match(&mut self, a: usize, b: usize) -> Result<()> {
        self.require_round("match cards", GameMode::MatchingPairs)?;
        if a == b
            || a >= PAIR_CARDS
            || b >= PAIR_CARDS
            || self.round.matched_cards.contains(&a)
            || self.round.matched_cards.contains(&b)
        {
            return Err(QuickQuestError::Validation(format!(
                "cards {a} and {b} cannot be matched"
            )));
        }
        let faces = &self.round.card_faces;
        match (faces.get(a), faces.get(b)) {
            (Some(x), Some(y)) if x == y => {}
            _ => {
                return Err(QuickQuestError::Validation(format!(
                    "cards {a} and {b} do not match"
                )))
            }
        }
        self.round.matched_cards.extend([a, b]);
        self.check_completion();
        Ok(())
    }

    /// The active mini-game reports that the player finished the round.
    ///
    /// Offline the time goes straight onto the local leaderboard. Online the
    /// mode's completion message is sent and the session shows the
    /// leaderboard until the server broadcasts the authoritative one.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::InvalidTransition`] unless a player is `Playing`.
    pub fn complete_round(&mut self) -> Result<()> {
        self.require_player("complete a round")?;
        self.require_state("complete a round", &[LifecycleState::Playing])?;

        let Some(participant) = self.participant.clone() else {
            return Err(self.invalid("complete a round without a team"));
        };
        self.timer.stop();
        let time = self.timer.elapsed_ms();
        info!(time_ms = time, mode = %self.game_mode, "round complete");

        if self.is_offline() {
            self.leaderboard.submit(LeaderboardEntry {
                name: participant.team_name,
                section: participant.section,
                time,
                team_id: Some(participant.user_id.to_string()),
            });
        } else {
            let submission = Submission {
                team_name: participant.team_name,
                section: participant.section,
                user_id: participant.user_id,
                event_code: self.event_code.clone().unwrap_or_default(),
                time,
            };
            let message = match self.games.get(self.game_mode) {
                Some(game) => game.completion_message(submission),
                None => ClientMessage::SubmitTime(submission),
            };
            self.outbound.push(message);
        }
        self.transition(LifecycleState::Leaderboard);
        Ok(())
    }

    // ── Inbound messages ────────────────────────────────────────────

    /// `gameStateUpdate`: the server declared a new phase.
    pub fn on_game_state_update(&mut self, phase: Phase, mode: GameMode, order: Option<&[u8]>) {
        if self.ignores_server(MessageKind::GameStateUpdate) {
            return;
        }
        let Some(role) = self.role else {
            debug!(?phase, "no session yet, ignoring lifecycle update");
            return;
        };
        self.game_mode = mode;

        match (role, phase) {
            (Role::Host, Phase::Playing) => {
                if self.lifecycle != LifecycleState::Playing {
                    self.begin_round();
                }
                self.transition(LifecycleState::Playing);
            }
            (Role::Host, Phase::Waiting) => {
                self.timer.stop();
                self.transition(LifecycleState::HostDashboard);
            }
            (Role::Host, Phase::Leaderboard) => {
                self.timer.stop();
                self.transition(LifecycleState::Leaderboard);
            }
            (Role::Player, Phase::Playing) => {
                self.begin_round();
                if let (Some(game), Some(layout)) =
                    (self.games.get(mode), order.filter(|o| !o.is_empty()))
                {
                    game.apply_layout(&mut self.round, layout);
                }
                self.transition(LifecycleState::Playing);
            }
            (Role::Player, Phase::Waiting) => {
                self.timer.stop();
                self.transition(LifecycleState::WaitingForHost);
            }
            (Role::Player, Phase::Leaderboard) => {
                self.timer.stop();
                self.transition(LifecycleState::Leaderboard);
            }
        }
    }

    /// `timerUpdate`: authoritative elapsed time.
    pub fn on_timer_update(&mut self, elapsed_ms: u64) {
        if self.ignores_server(MessageKind::TimerUpdate) {
            return;
        }
        self.timer.apply_server(elapsed_ms);
    }

    /// `leaderboardUpdate`: the server's leaderboard replaces ours.
    pub fn on_leaderboard_update(&mut self, entries: Vec<LeaderboardEntry>) {
        if self.ignores_server(MessageKind::LeaderboardUpdate) {
            return;
        }
        self.leaderboard.replace(entries);
    }

    /// `differenceUpdate`: differences found so far this round.
    pub fn on_difference_update(&mut self, found: &[usize]) {
        if self.ignores_server(MessageKind::DifferenceUpdate) {
            return;
        }
        self.round.found_differences = found.iter().copied().collect();
        self.check_completion();
    }

    /// `hostCode`: the server created our event.
    pub fn on_host_code(&mut self, code: &str) {
        if self.ignores_server(MessageKind::HostCode) {
            return;
        }
        if self.role != Some(Role::Host) {
            debug!("not hosting, ignoring host code");
            return;
        }
        info!(code, "event created");
        self.host_code = Some(code.to_string());
        self.event_code = Some(code.to_string());
        self.transition(LifecycleState::HostDashboard);
    }

    /// `joinResponse`: outcome of our join request.
    pub fn on_join_response(&mut self, response: &JoinResponsePayload) {
        if self.ignores_server(MessageKind::JoinResponse) {
            return;
        }
        if self.role != Some(Role::Player) || self.lifecycle != LifecycleState::WaitingForHost {
            debug!(lifecycle = ?self.lifecycle, "unexpected join response, ignoring");
            return;
        }

        if !response.success {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| "join rejected".to_string());
            warn!(%message, "join rejected");
            self.status = Some(format!("Failed to join event: {message}"));
            self.notices.push(Notice::JoinRejected { message });
            return;
        }

        self.event_code = response
            .event_code
            .clone()
            .or_else(|| self.requested_code.clone());
        if let Some(mode) = response.current_game_mode {
            self.game_mode = mode;
        }
        self.status = Some(JOINED_STATUS.to_string());
        info!(event_code = ?self.event_code, "joined event");

        if response.game_state == Some(Phase::Playing) {
            self.begin_round();
            self.transition(LifecycleState::Playing);
        } else {
            self.transition(LifecycleState::WaitingForHost);
        }
    }

    /// `eventEnded`: the host closed the event.
    pub fn on_event_ended(&mut self) {
        if self.ignores_server(MessageKind::EventEnded) {
            return;
        }
        info!("event ended by host");
        self.notices.push(Notice::EventEnded);
        self.reset_to_login();
    }

    // ── Connectivity and timer ──────────────────────────────────────

    /// The server connection dropped after it had been established.
    ///
    /// The timer freezes, pending messages are discarded and the session
    /// returns to `Login`, where the next login runs offline.
    pub fn connection_lost(&mut self, reason: Option<String>) {
        if self.is_offline() {
            return;
        }
        warn!(?reason, lifecycle = ?self.lifecycle, "connection lost, continuing offline");
        if self.lifecycle != LifecycleState::Login {
            self.notices.push(Notice::ConnectionLost { reason });
        }
        self.go_offline();
    }

    /// The client closed the connection itself.
    ///
    /// Same transition as [`connection_lost`](Self::connection_lost) but
    /// without a notice.
    pub fn disconnected(&mut self) {
        if self.is_offline() {
            return;
        }
        info!(lifecycle = ?self.lifecycle, "disconnected, continuing offline");
        self.go_offline();
    }

    /// Adopt the result of a new connection attempt. Only valid at `Login`.
    ///
    /// # Errors
    ///
    /// [`QuickQuestError::InvalidTransition`] outside `Login`.
    pub fn set_connectivity(&mut self, connectivity: Connectivity) -> Result<()> {
        self.require_state("change connectivity", &[LifecycleState::Login])?;
        self.connectivity = connectivity;
        self.timer = Timer::new(timer_source(connectivity));
        Ok(())
    }

    /// One local tick of `period_ms`. Returns `true` if the timer moved.
    pub fn tick(&mut self, period_ms: u64) -> bool {
        self.timer.tick(period_ms)
    }

    pub fn set_user_id(&mut self, user_id: UserId) {
        self.user_id = user_id;
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Drain messages waiting to be sent to the server.
    pub fn take_outbound(&mut self) -> Vec<ClientMessage> {
        mem::take(&mut self.outbound)
    }

    /// Drain notices waiting to be shown to the user.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role,
            lifecycle: self.lifecycle,
            connectivity: self.connectivity,
            event_code: self.event_code.clone(),
            host_code: self.host_code.clone(),
            game_mode: self.game_mode,
            timer: self.timer.state(),
            leaderboard: self.leaderboard.entries().to_vec(),
            status: self.status.clone(),
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn event_code(&self) -> Option<&str> {
        self.event_code.as_deref()
    }

    pub fn host_code(&self) -> Option<&str> {
        self.host_code.as_deref()
    }

    pub fn game_mode(&self) -> GameMode {
        self.game_mode
    }

    pub fn participant(&self) -> Option<&Participant> {
        self.participant.as_ref()
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// Latest user-facing status line.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn is_offline(&self) -> bool {
        self.connectivity == Connectivity::Offline
    }

    fn ignores_server(&self, kind: MessageKind) -> bool {
        if self.is_offline() {
            debug!(event = kind.as_str(), "offline, ignoring server message");
            return true;
        }
        false
    }

    fn active_game(&self) -> Option<&dyn MiniGame> {
        self.games.get(self.game_mode)
    }

    /// Fresh round progress and a timer that follows the connectivity mode.
    fn begin_round(&mut self) {
        let mode = self.game_mode;
        let offline = self.is_offline();
        match self.games.get(mode) {
            Some(game) => {
                game.reset(&mut self.round);
                if offline {
                    game.seed_offline(&mut self.round);
                }
            }
            None => self.round = RoundState::default(),
        }
        if offline {
            self.timer.start_local();
        } else {
            // The server's leaderboard for the new round replaces ours.
            self.leaderboard.clear();
            self.timer.follow_server();
        }
    }

    fn clear_round(&mut self) {
        self.timer.reset();
        self.round = RoundState::default();
        self.leaderboard.clear();
    }

    fn check_completion(&mut self) {
        if self.role != Some(Role::Player) || self.lifecycle != LifecycleState::Playing {
            return;
        }
        let solved = self
            .active_game()
            .is_some_and(|game| game.is_solved(&self.round));
        if solved {
            if let Err(e) = self.complete_round() {
                warn!("could not complete round: {e}");
            }
        }
    }

    fn go_offline(&mut self) {
        self.connectivity = Connectivity::Offline;
        self.timer.stop();
        self.outbound.clear();
        self.reset_to_login();
    }

    fn reset_to_login(&mut self) {
        self.clear_round();
        self.role = None;
        self.participant = None;
        self.event_code = None;
        self.host_code = None;
        self.requested_code = None;
        self.game_mode = GameMode::default();
        self.status = None;
        self.transition(LifecycleState::Login);
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.lifecycle != next {
            debug!(from = ?self.lifecycle, to = ?next, role = ?self.role, "lifecycle transition");
        }
        self.lifecycle = next;
    }

    fn invalid(&self, action: &'static str) -> QuickQuestError {
        QuickQuestError::InvalidTransition {
            action,
            state: self.lifecycle,
        }
    }

    fn require_state(&self, action: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        if allowed.contains(&self.lifecycle) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn require_host(&self) -> Result<()> {
        match self.role {
            Some(Role::Host) => Ok(()),
            _ => Err(QuickQuestError::NotHost),
        }
    }

    fn require_player(&self, action: &'static str) -> Result<()> {
        match self.role {
            Some(Role::Player) => Ok(()),
            _ => Err(self.invalid(action)),
        }
    }

    fn require_round(&self, action: &'static str, mode: GameMode) -> Result<()> {
        self.require_player(action)?;
        self.require_state(action, &[LifecycleState::Playing])?;
        if self.game_mode != mode {
            return Err(self.invalid(action));
        }
        Ok(())
    }
}

fn timer_source(connectivity: Connectivity) -> TimerSource {
    match connectivity {
        Connectivity::Online => TimerSource::Server,
        Connectivity::Offline => TimerSource::Local,
    }
}

fn non_blank(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
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

    fn online() -> Session {
        Session::new(UserId::new("user-1"), Connectivity::Online)
    }

    fn offline() -> Session {
        Session::new(UserId::new("user-1"), Connectivity::Offline)
    }

    fn host_form() -> LoginForm {
        LoginForm::new("", "", DEFAULT_HOST_PASSWORD)
    }

    fn player_form() -> LoginForm {
        LoginForm::new("Owls", "B", "1234")
    }

    fn online_host() -> Session {
        let mut s = online();
        s.login(host_form()).unwrap();
        s.on_host_code("4821");
        s.take_outbound();
        s
    }

    fn online_player_playing(mode: GameMode) -> Session {
        online_player_dealt(mode, None)
    }

    fn online_player_dealt(mode: GameMode, layout: Option<&[u8]>) -> Session {
        let mut s = online();
        s.login(player_form()).unwrap();
        s.on_join_response(&JoinResponsePayload {
            success: true,
            event_code: Some("1234".into()),
            game_state: Some(Phase::Waiting),
            current_game_mode: Some(mode),
            ..Default::default()
        });
        s.on_game_state_update(Phase::Playing, mode, layout);
        s.take_outbound();
        s
    }

    // ── Login ───────────────────────────────────────────────────────

    #[test]
    fn host_login_online_requests_event() {
        let mut s = online();
        s.login(host_form()).unwrap();

        assert_eq!(s.role(), Some(Role::Host));
        assert_eq!(s.lifecycle(), LifecycleState::HostDashboard);
        assert_eq!(
            s.take_outbound(),
            [ClientMessage::CreateEvent {
                host_id: UserId::new("user-1")
            }]
        );
        let participant = s.participant().unwrap();
        assert_eq!(participant.team_name, "Host");
        assert_eq!(participant.section, "Admin");

        s.on_host_code("4821");
        assert_eq!(s.host_code(), Some("4821"));
        assert_eq!(s.event_code(), Some("4821"));
    }

    #[test]
    fn host_login_offline_uses_offline_code() {
        let mut s = offline();
        s.login(host_form()).unwrap();
        assert_eq!(s.lifecycle(), LifecycleState::HostDashboard);
        assert_eq!(s.host_code(), Some(OFFLINE_CODE));
        assert_eq!(s.event_code(), Some(OFFLINE_CODE));
        assert!(s.take_outbound().is_empty());
    }

    #[test]
    fn player_login_requires_team_and_section() {
        let mut s = online();
        let err = s.login(LoginForm::new("  ", "B", "1234")).unwrap_err();
        assert!(matches!(err, QuickQuestError::Validation(_)));
        let err = s.login(LoginForm::new("Owls", "", "1234")).unwrap_err();
        assert!(matches!(err, QuickQuestError::Validation(_)));

        assert_eq!(s.lifecycle(), LifecycleState::Login);
        assert_eq!(s.role(), None);
        assert!(s.take_outbound().is_empty());
    }

    #[test]
    fn player_login_online_sends_join_and_waits() {
        let mut s = online();
        s.login(player_form()).unwrap();
        assert_eq!(s.lifecycle(), LifecycleState::WaitingForHost);
        assert_eq!(
            s.take_outbound(),
            [ClientMessage::JoinEvent {
                event_code: "1234".into(),
                team_id: UserId::new("user-1"),
                team_name: "Owls".into(),
                section: "B".into(),
            }]
        );
    }

    #[test]
    fn player_login_offline_starts_playing_locally() {
        let mut s = offline();
        s.login(player_form()).unwrap();
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert_eq!(s.event_code(), Some(OFFLINE_CODE));
        assert!(s.timer().is_local_running());
        assert_eq!(s.timer().source(), TimerSource::Local);
        assert!(s.take_outbound().is_empty());
    }

    #[test]
    fn login_twice_is_rejected() {
        let mut s = online();
        s.login(player_form()).unwrap();
        let err = s.login(player_form()).unwrap_err();
        assert!(matches!(
            err,
            QuickQuestError::InvalidTransition {
                state: LifecycleState::WaitingForHost,
                ..
            }
        ));
    }

    // ── Join responses ──────────────────────────────────────────────

    #[test]
    fn join_accepted_while_waiting() {
        let mut s = online();
        s.login(player_form()).unwrap();
        s.on_join_response(&JoinResponsePayload {
            success: true,
            event_code: Some("1234".into()),
            game_state: Some(Phase::Waiting),
            current_game_mode: Some(GameMode::MatchingPairs),
            ..Default::default()
        });
        assert_eq!(s.lifecycle(), LifecycleState::WaitingForHost);
        assert_eq!(s.event_code(), Some("1234"));
        assert_eq!(s.game_mode(), GameMode::MatchingPairs);
        assert_eq!(s.status(), Some(JOINED_STATUS));
    }

    #[test]
    fn join_accepted_mid_round_follows_server_timer() {
        let mut s = online();
        s.login(player_form()).unwrap();
        s.on_join_response(&JoinResponsePayload {
            success: true,
            event_code: Some("1234".into()),
            game_state: Some(Phase::Playing),
            current_game_mode: Some(GameMode::SpotTheDifference),
            ..Default::default()
        });
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert_eq!(s.timer().source(), TimerSource::Server);
        assert!(!s.timer().is_local_running());
    }

    #[test]
    fn join_rejected_surfaces_message_and_stays() {
        let mut s = online();
        s.login(player_form()).unwrap();
        s.on_join_response(&JoinResponsePayload {
            success: false,
            message: Some("Event not found".into()),
            ..Default::default()
        });
        assert_eq!(s.lifecycle(), LifecycleState::WaitingForHost);
        assert_eq!(s.status(), Some("Failed to join event: Event not found"));
        assert_eq!(
            s.take_notices(),
            [Notice::JoinRejected {
                message: "Event not found".into()
            }]
        );
        assert_eq!(s.event_code(), None);
    }

    // ── Host lifecycle ──────────────────────────────────────────────

    #[test]
    fn host_start_online_waits_for_broadcast() {
        let mut s = online_host();
        s.select_game_mode(GameMode::ImageScramble).unwrap();
        s.start_game().unwrap();

        assert_eq!(s.lifecycle(), LifecycleState::HostDashboard);
        assert_eq!(
            s.take_outbound(),
            [ClientMessage::StartGame {
                event_code: "4821".into(),
                game_mode: GameMode::ImageScramble,
            }]
        );

        s.on_game_state_update(Phase::Playing, GameMode::ImageScramble, Some(&[2, 1, 3]));
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert!(!s.snapshot().shows_game());
    }

    #[test]
    fn host_start_before_code_is_rejected() {
        let mut s = online();
        s.login(host_form()).unwrap();
        let err = s.start_game().unwrap_err();
        assert!(matches!(err, QuickQuestError::Validation(_)));
    }

    #[test]
    fn host_start_offline_plays_immediately() {
        let mut s = offline();
        s.login(host_form()).unwrap();
        s.start_game().unwrap();
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert!(s.timer().is_local_running());
        assert!(s.take_outbound().is_empty());
    }

    #[test]
    fn host_mirrors_every_server_phase() {
        let mut s = online_host();
        let phases = [
            Phase::Playing,
            Phase::Leaderboard,
            Phase::Waiting,
            Phase::Playing,
            Phase::Playing,
            Phase::Waiting,
            Phase::Leaderboard,
        ];
        for phase in phases {
            s.on_game_state_update(phase, GameMode::MatchingPairs, None);
            let expected = match phase {
                Phase::Playing => LifecycleState::Playing,
                Phase::Waiting => LifecycleState::HostDashboard,
                Phase::Leaderboard => LifecycleState::Leaderboard,
            };
            assert_eq!(s.lifecycle(), expected);
            assert!(!s.snapshot().shows_game());
        }
    }

    #[test]
    fn host_never_reaches_player_states() {
        // Every sequence of three phases.
        let all = [Phase::Waiting, Phase::Playing, Phase::Leaderboard];
        for a in all {
            for b in all {
                for c in all {
                    let mut s = online_host();
                    for phase in [a, b, c] {
                        s.on_game_state_update(phase, GameMode::SpotTheDifference, None);
                        assert!(matches!(
                            s.lifecycle(),
                            LifecycleState::HostDashboard
                                | LifecycleState::Playing
                                | LifecycleState::Leaderboard
                        ));
                    }
                }
            }
        }
    }

    #[test]
    fn restart_returns_host_to_dashboard() {
        let mut s = online_host();
        s.on_game_state_update(Phase::Playing, GameMode::SpotTheDifference, None);
        s.on_timer_update(4000);
        s.on_leaderboard_update(vec![LeaderboardEntry::new("A", "1", 10)]);
        s.restart_game().unwrap();

        assert_eq!(s.lifecycle(), LifecycleState::HostDashboard);
        assert_eq!(s.timer().elapsed_ms(), 0);
        assert!(!s.timer().is_running());
        assert!(s.leaderboard().is_empty());
        assert_eq!(
            s.take_outbound(),
            [ClientMessage::RestartGame {
                event_code: "4821".into(),
                game_mode: GameMode::SpotTheDifference,
            }]
        );
    }

    #[test]
    fn end_event_resets_without_waiting_for_ack() {
        let mut s = online_host();
        s.end_event().unwrap();
        assert_eq!(
            s.take_outbound(),
            [ClientMessage::EndEvent {
                event_code: "4821".into()
            }]
        );
        assert_eq!(s.lifecycle(), LifecycleState::Login);
        assert_eq!(s.role(), None);
        assert_eq!(s.host_code(), None);
        assert_eq!(s.event_code(), None);
    }

    #[test]
    fn players_cannot_drive_the_lifecycle() {
        let mut s = online_player_playing(GameMode::SpotTheDifference);
        assert!(matches!(s.start_game(), Err(QuickQuestError::NotHost)));
        assert!(matches!(s.restart_game(), Err(QuickQuestError::NotHost)));
        assert!(matches!(s.end_event(), Err(QuickQuestError::NotHost)));
        assert!(matches!(
            s.select_game_mode(GameMode::ImageScramble),
            Err(QuickQuestError::NotHost)
        ));
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert!(s.take_outbound().is_empty());
    }

    // ── Player rounds ───────────────────────────────────────────────

    #[test]
    fn player_follows_server_phases() {
        let mut s = online_player_playing(GameMode::ImageScramble);
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert!(s.snapshot().shows_game());

        s.on_game_state_update(Phase::Leaderboard, GameMode::ImageScramble, None);
        assert_eq!(s.lifecycle(), LifecycleState::Leaderboard);

        s.on_game_state_update(Phase::Waiting, GameMode::ImageScramble, None);
        assert_eq!(s.lifecycle(), LifecycleState::WaitingForHost);
        assert!(!s.timer().is_running());
    }

    #[test]
    fn playing_update_resets_round_and_takes_scramble_order() {
        let mut s = online_player_playing(GameMode::ImageScramble);
        s.on_timer_update(2500);
        s.on_game_state_update(
            Phase::Playing,
            GameMode::ImageScramble,
            Some(&[9, 8, 7, 6, 5, 4, 3, 2, 1]),
        );
        assert_eq!(s.timer().elapsed_ms(), 0);
        assert_eq!(s.round().scramble_order, [9, 8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn online_difference_hits_are_reported_not_recorded() {
        let mut s = online_player_playing(GameMode::SpotTheDifference);
        s.record_difference(3).unwrap();
        assert!(s.round().found_differences.is_empty());
        assert_eq!(
            s.take_outbound(),
            [ClientMessage::DifferenceFound {
                event_code: "1234".into(),
                difference_index: 3,
            }]
        );
        assert!(matches!(
            s.record_difference(DIFFERENCE_COUNT),
            Err(QuickQuestError::Validation(_))
        ));
    }

    #[test]
    fn online_spot_completion_submits_once() {
        let mut s = online_player_playing(GameMode::SpotTheDifference);
        s.on_timer_update(12_345);
        s.on_difference_update(&[0, 1, 2, 3]);
        assert!(s.take_outbound().is_empty());

        s.on_difference_update(&[0, 1, 2, 3, 4]);
        assert_eq!(s.lifecycle(), LifecycleState::Leaderboard);
        let sent = s.take_outbound();
        assert_eq!(
            sent,
            [ClientMessage::SubmitTime(Submission {
                team_name: "Owls".into(),
                section: "B".into(),
                user_id: UserId::new("user-1"),
                event_code: "1234".into(),
                time: 12_345,
            })]
        );

        // A repeated broadcast must not submit again.
        s.on_difference_update(&[0, 1, 2, 3, 4]);
        assert!(s.take_outbound().is_empty());

        s.on_leaderboard_update(vec![
            LeaderboardEntry::new("B", "2", 15_000),
            LeaderboardEntry::new("Owls", "B", 12_345),
            LeaderboardEntry::new("A", "1", 10_000),
        ]);
        let names: Vec<_> = s
            .leaderboard()
            .entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, ["A", "Owls", "B"]);
    }

    #[test]
    fn scramble_completion_uses_scramble_event() {
        let mut s = online_player_playing(GameMode::ImageScramble);
        s.on_game_state_update(
            Phase::Playing,
            GameMode::ImageScramble,
            Some(&[2, 1, 3, 4, 5, 6, 7, 8, 9]),
        );
        s.on_timer_update(800);
        s.swap_pieces(0, 1).unwrap();

        assert_eq!(s.lifecycle(), LifecycleState::Leaderboard);
        assert!(matches!(
            s.take_outbound().as_slice(),
            [ClientMessage::SubmitScrambleTime(Submission { time: 800, .. })]
        ));
    }

    #[test]
    fn matching_pairs_completion() {
        let mut s = online_player_dealt(GameMode::MatchingPairs, Some(&[1, 2, 3, 1, 2, 3]));
        assert!(matches!(
            s.record_match(0, 1),
            Err(QuickQuestError::Validation(_))
        ));
        assert!(s.round().matched_cards.is_empty());
        s.record_match(0, 3).unwrap();
        s.record_match(1, 4).unwrap();
        assert!(matches!(
            s.record_match(1, 2),
            Err(QuickQuestError::Validation(_))
        ));
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        s.record_match(2, 5).unwrap();
        assert_eq!(s.lifecycle(), LifecycleState::Leaderboard);
        assert!(matches!(
            s.take_outbound().as_slice(),
            [ClientMessage::SubmitTime(_)]
        ));
    }

    #[test]
    fn wrong_mode_input_is_rejected() {
        let mut s = online_player_playing(GameMode::MatchingPairs);
        assert!(matches!(
            s.record_difference(0),
            Err(QuickQuestError::InvalidTransition { .. })
        ));
        assert!(matches!(
            s.swap_pieces(0, 1),
            Err(QuickQuestError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn offline_round_lands_on_local_leaderboard() {
        let mut s = offline();
        s.login(player_form()).unwrap();
        for _ in 0..10 {
            s.tick(50);
        }
        for i in 0..DIFFERENCE_COUNT {
            s.record_difference(i).unwrap();
        }

        assert_eq!(s.lifecycle(), LifecycleState::Leaderboard);
        assert!(!s.timer().is_running());
        assert!(!s.tick(50));
        let entries = s.leaderboard().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Owls");
        assert_eq!(entries[0].time, 500);
        assert!(s.take_outbound().is_empty());
    }

    #[test]
    fn offline_play_again_accumulates() {
        let mut s = offline();
        s.login(player_form()).unwrap();
        s.tick(50);
        s.complete_round().unwrap();

        s.play_again().unwrap();
        assert_eq!(s.timer().elapsed_ms(), 0);
        s.tick(50);
        s.tick(50);
        s.complete_round().unwrap();

        let times: Vec<u64> = s.leaderboard().entries().iter().map(|e| e.time).collect();
        assert_eq!(times, [50, 100]);
    }

    #[test]
    fn play_again_is_offline_only() {
        let mut s = online_player_playing(GameMode::SpotTheDifference);
        s.complete_round().unwrap();
        assert!(s.play_again().is_err());
    }

    #[test]
    fn complete_outside_playing_is_rejected() {
        let mut s = online();
        s.login(player_form()).unwrap();
        assert!(matches!(
            s.complete_round(),
            Err(QuickQuestError::InvalidTransition {
                state: LifecycleState::WaitingForHost,
                ..
            })
        ));
    }

    // ── Server-driven resets and filtering ──────────────────────────

    #[test]
    fn event_ended_resets_any_role() {
        for mut s in [online_host(), online_player_playing(GameMode::ImageScramble)] {
            s.on_event_ended();
            assert_eq!(s.lifecycle(), LifecycleState::Login);
            assert_eq!(s.role(), None);
            assert_eq!(s.event_code(), None);
            assert_eq!(s.game_mode(), GameMode::SpotTheDifference);
            assert_eq!(s.take_notices(), [Notice::EventEnded]);
        }
    }

    #[test]
    fn lifecycle_updates_before_login_are_ignored() {
        let mut s = online();
        s.on_game_state_update(Phase::Playing, GameMode::MatchingPairs, None);
        s.on_host_code("999");
        assert_eq!(s.lifecycle(), LifecycleState::Login);
        assert_eq!(s.host_code(), None);
    }

    #[test]
    fn offline_sessions_ignore_server_messages() {
        let mut s = offline();
        s.login(player_form()).unwrap();
        s.tick(50);
        s.on_timer_update(9_000);
        s.on_leaderboard_update(vec![LeaderboardEntry::new("X", "1", 1)]);
        s.on_event_ended();

        assert_eq!(s.timer().elapsed_ms(), 50);
        assert!(s.leaderboard().is_empty());
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
    }

    #[test]
    fn connection_loss_freezes_and_returns_to_offline_login() {
        let mut s = online_player_playing(GameMode::SpotTheDifference);
        s.on_timer_update(3_000);
        s.connection_lost(Some("reset".into()));

        assert_eq!(s.connectivity(), Connectivity::Offline);
        assert_eq!(s.lifecycle(), LifecycleState::Login);
        assert_eq!(
            s.take_notices(),
            [Notice::ConnectionLost {
                reason: Some("reset".into())
            }]
        );

        s.login(player_form()).unwrap();
        assert_eq!(s.event_code(), Some(OFFLINE_CODE));
        assert!(s.timer().is_local_running());
    }

    #[test]
    fn closing_the_connection_goes_offline_quietly() {
        let mut s = online_player_playing(GameMode::SpotTheDifference);
        s.record_difference(2).unwrap();
        s.disconnected();

        assert_eq!(s.connectivity(), Connectivity::Offline);
        assert_eq!(s.lifecycle(), LifecycleState::Login);
        assert!(s.take_outbound().is_empty());
        assert!(s.take_notices().is_empty());

        s.login(player_form()).unwrap();
        assert_eq!(s.event_code(), Some(OFFLINE_CODE));
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
    }

    #[test]
    fn router_applies_inbound_messages() {
        let mut s = online();
        s.login(host_form()).unwrap();
        let mut router = Session::router();

        router.dispatch(&mut s, &ServerMessage::HostCode("7777".into()));
        router.dispatch(
            &mut s,
            &ServerMessage::GameStateUpdate {
                state: Phase::Playing,
                game_mode: GameMode::MatchingPairs,
                scrambled_order: None,
            },
        );
        router.dispatch(&mut s, &ServerMessage::TimerUpdate(1_500));

        assert_eq!(s.host_code(), Some("7777"));
        assert_eq!(s.lifecycle(), LifecycleState::Playing);
        assert_eq!(s.game_mode(), GameMode::MatchingPairs);
        assert_eq!(s.timer().elapsed_ms(), 1_500);
    }

    #[test]
    fn custom_host_password() {
        let mut s = online().with_host_password("letmein");
        s.login(LoginForm::new("", "", DEFAULT_HOST_PASSWORD)).unwrap_err();
        s.login(LoginForm::new("", "", "letmein")).unwrap();
        assert_eq!(s.role(), Some(Role::Host));
    }
}

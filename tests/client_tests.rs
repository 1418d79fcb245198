#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end flows through [`Client`] against a scripted server.

mod common;

use std::time::Duration;

use async_trait::async_trait;
use common::*;
use quickquest_client::protocol::{
    ClientMessage, GameMode, LeaderboardEntry, MessageKind, Phase, Submission, UserId,
};
use quickquest_client::session::OFFLINE_CODE;
use quickquest_client::{
    AnonymousIdentity, Client, ClientConfig, Connectivity, GameRegistry, IdentityProvider,
    LifecycleState, LoginForm, MiniGame, Notice, QuickQuestError, Result, Role, RoundState,
    TimerSource, Update,
};
use tokio::sync::watch;

fn config() -> ClientConfig {
    ClientConfig::new("ws://test.invalid")
}

async fn online_client() -> (Client, MockServer, AnonymousIdentity) {
    let (transport, server) = MockTransport::new();
    let mut identity = AnonymousIdentity::new();
    let client = Client::connect_with(config(), &mut identity, async { Ok(transport) })
        .await
        .unwrap();
    assert_eq!(client.connectivity(), Connectivity::Online);
    (client, server, identity)
}

async fn offline_client() -> (Client, AnonymousIdentity) {
    let mut identity = AnonymousIdentity::new();
    let handshake = std::future::pending::<Result<MockTransport>>();
    let client = Client::connect_with(config(), &mut identity, handshake)
        .await
        .unwrap();
    (client, identity)
}

/// Push `frame` and apply it.
async fn deliver(client: &mut Client, server: &MockServer, frame: serde_json::Value) -> Update {
    server.push(frame);
    client.next_update().await
}

async fn joined_player(mode: GameMode) -> (Client, MockServer, AnonymousIdentity) {
    let (mut client, server, identity) = online_client().await;
    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();
    deliver(
        &mut client,
        &server,
        join_accepted_json("1234", Phase::Waiting, mode),
    )
    .await;
    (client, server, identity)
}

/// Provider whose backend is down.
struct BrokenIdentity;

#[async_trait]
impl IdentityProvider for BrokenIdentity {
    async fn sign_in_anonymously(&mut self) -> Result<UserId> {
        Err(QuickQuestError::Identity("auth backend unavailable".into()))
    }

    fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserId>> {
        watch::channel(None).1
    }
}

#[tokio::test]
async fn identity_failure_is_returned_before_connecting() {
    let (transport, server) = MockTransport::new();
    let result = Client::connect_with(config(), &mut BrokenIdentity, async { Ok(transport) }).await;
    match result {
        Err(QuickQuestError::Identity(reason)) => assert!(reason.contains("unavailable")),
        other => panic!("expected an identity error, got {other:?}"),
    }
    assert!(server.sent().is_empty());
}

// ── Host ────────────────────────────────────────────────────────────

#[tokio::test]
async fn online_host_gets_event_code_from_server() {
    let (mut client, server, _identity) = online_client().await;
    client.login(LoginForm::new("", "", "1918")).unwrap();
    settle().await;

    let sent = server.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["event"], "createEvent");
    assert_eq!(
        sent[0]["data"]["hostId"],
        client.session().user_id().as_str()
    );

    let update = deliver(&mut client, &server, host_code_json("4821")).await;
    assert_eq!(update, Update::Message(MessageKind::HostCode));

    let snapshot = client.snapshot();
    assert_eq!(snapshot.role, Some(Role::Host));
    assert_eq!(snapshot.lifecycle, LifecycleState::HostDashboard);
    assert_eq!(snapshot.host_code.as_deref(), Some("4821"));
    assert_eq!(snapshot.event_code.as_deref(), Some("4821"));
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_hosts_offline() {
    let (mut client, _identity) = offline_client().await;
    assert_eq!(client.connectivity(), Connectivity::Offline);

    client.login(LoginForm::new("", "", "1918")).unwrap();
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::HostDashboard);
    assert_eq!(snapshot.host_code.as_deref(), Some(OFFLINE_CODE));
    assert_eq!(snapshot.event_code.as_deref(), Some(OFFLINE_CODE));

    client.start_game().unwrap();
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Playing);
    assert_eq!(
        client.next_update().await,
        Update::Tick { elapsed_ms: 50 }
    );

    client.restart_game().unwrap();
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::HostDashboard);
    assert_eq!(snapshot.timer.elapsed_ms, 0);
}

#[tokio::test]
async fn host_start_waits_for_server_broadcast() {
    let (mut client, server, _identity) = online_client().await;
    client.login(LoginForm::new("", "", "1918")).unwrap();
    deliver(&mut client, &server, host_code_json("4821")).await;

    client.select_game_mode(GameMode::MatchingPairs).unwrap();
    client.start_game().unwrap();
    settle().await;

    let sent = server.sent();
    assert_eq!(sent[1]["event"], "startGame");
    assert_eq!(sent[1]["data"]["eventCode"], "4821");
    assert_eq!(sent[1]["data"]["gameMode"], "matching-pairs");
    assert_eq!(client.snapshot().lifecycle, LifecycleState::HostDashboard);

    deliver(
        &mut client,
        &server,
        game_state_json(Phase::Playing, GameMode::MatchingPairs),
    )
    .await;
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Playing);
    assert!(!snapshot.shows_game());
}

#[tokio::test]
async fn ending_the_event_does_not_wait_for_the_server() {
    let (mut client, server, _identity) = online_client().await;
    client.login(LoginForm::new("", "", "1918")).unwrap();
    deliver(&mut client, &server, host_code_json("4821")).await;

    client.end_event().unwrap();
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Login);
    assert_eq!(client.snapshot().role, None);

    settle().await;
    let sent = server.sent();
    assert_eq!(sent.last().unwrap()["event"], "endEvent");
    assert_eq!(sent.last().unwrap()["data"]["eventCode"], "4821");
}

// ── Player ──────────────────────────────────────────────────────────

#[tokio::test]
async fn player_joins_then_follows_server_timer() {
    let (mut client, server, _identity) = online_client().await;
    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();
    settle().await;

    let sent = server.sent();
    assert_eq!(sent[0]["event"], "joinEvent");
    assert_eq!(sent[0]["data"]["eventCode"], "1234");
    assert_eq!(sent[0]["data"]["teamName"], "Owls");
    assert_eq!(sent[0]["data"]["section"], "B");
    assert_eq!(
        sent[0]["data"]["teamId"],
        client.session().user_id().as_str()
    );

    deliver(
        &mut client,
        &server,
        join_accepted_json("1234", Phase::Waiting, GameMode::SpotTheDifference),
    )
    .await;
    assert_eq!(client.snapshot().lifecycle, LifecycleState::WaitingForHost);
    assert_eq!(
        client.snapshot().status.as_deref(),
        Some("Successfully joined, waiting for host...")
    );

    deliver(
        &mut client,
        &server,
        game_state_json(Phase::Playing, GameMode::SpotTheDifference),
    )
    .await;
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Playing);
    assert!(snapshot.shows_game());
    assert_eq!(snapshot.timer.source, TimerSource::Server);

    deliver(&mut client, &server, timer_json(1_000)).await;
    deliver(&mut client, &server, timer_json(900)).await;
    assert_eq!(client.snapshot().timer.elapsed_ms, 1_000);
}

#[tokio::test]
async fn joining_mid_round_starts_playing() {
    let (mut client, server, _identity) = online_client().await;
    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();
    deliver(
        &mut client,
        &server,
        join_accepted_json("1234", Phase::Playing, GameMode::MatchingPairs),
    )
    .await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Playing);
    assert_eq!(snapshot.game_mode, GameMode::MatchingPairs);
}

#[tokio::test]
async fn rejected_join_is_reported() {
    let (mut client, server, _identity) = online_client().await;
    client.login(LoginForm::new("Owls", "B", "0000")).unwrap();
    deliver(&mut client, &server, join_rejected_json("Event not found")).await;

    assert_eq!(client.snapshot().lifecycle, LifecycleState::WaitingForHost);
    assert_eq!(
        client.take_notices(),
        [Notice::JoinRejected {
            message: "Event not found".into()
        }]
    );
}

#[tokio::test]
async fn spot_the_difference_round_submits_once() {
    let (mut client, server, _identity) = joined_player(GameMode::SpotTheDifference).await;
    deliver(
        &mut client,
        &server,
        game_state_json(Phase::Playing, GameMode::SpotTheDifference),
    )
    .await;

    client.record_difference(0).unwrap();
    deliver(&mut client, &server, differences_json(&[0])).await;
    deliver(&mut client, &server, differences_json(&[0, 1, 2, 3])).await;
    deliver(&mut client, &server, timer_json(12_345)).await;
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Playing);

    deliver(&mut client, &server, differences_json(&[0, 1, 2, 3, 4])).await;
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Leaderboard);

    // Duplicate broadcast after completion.
    deliver(&mut client, &server, differences_json(&[0, 1, 2, 3, 4])).await;
    settle().await;

    let submissions: Vec<_> = server
        .sent()
        .into_iter()
        .filter(|v| v["event"] == "submitTime")
        .collect();
    assert_eq!(submissions.len(), 1);
    let data = &submissions[0]["data"];
    assert_eq!(data["time"], 12_345);
    assert_eq!(data["teamName"], "Owls");
    assert_eq!(data["section"], "B");
    assert_eq!(data["eventCode"], "1234");
    assert_eq!(
        server.sent_events(),
        ["joinEvent", "differenceFound", "submitTime"]
    );

    deliver(
        &mut client,
        &server,
        leaderboard_json(&[
            LeaderboardEntry::new("A", "1", 10_000),
            LeaderboardEntry::new("Owls", "B", 12_345),
            LeaderboardEntry::new("C", "3", 15_000),
        ]),
    )
    .await;
    let names: Vec<String> = client
        .snapshot()
        .leaderboard
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["A", "Owls", "C"]);
    assert_eq!(
        client.session().leaderboard().rank_of("Owls", "B"),
        Some(2)
    );
}

#[tokio::test]
async fn image_scramble_completion_uses_its_own_event() {
    let (mut client, server, _identity) = joined_player(GameMode::ImageScramble).await;
    server.push(serde_json::json!({
        "event": "gameStateUpdate",
        "data": {
            "state": "playing",
            "gameMode": "image-scramble",
            "scrambledOrder": [1, 2, 3, 4, 5, 6, 7, 9, 8]
        }
    }));
    client.next_update().await;
    deliver(&mut client, &server, timer_json(3_000)).await;

    client.swap_pieces(7, 8).unwrap();
    settle().await;

    assert_eq!(client.snapshot().lifecycle, LifecycleState::Leaderboard);
    let sent = server.sent();
    assert_eq!(sent.last().unwrap()["event"], "submitScrambleTime");
    assert_eq!(sent.last().unwrap()["data"]["time"], 3_000);
}

// ── Server-driven resets ────────────────────────────────────────────

/// Two differences are enough, and the time goes out as a scramble time.
#[derive(Debug)]
struct QuickSpot;

impl MiniGame for QuickSpot {
    fn mode(&self) -> GameMode {
        GameMode::SpotTheDifference
    }

    fn is_solved(&self, round: &RoundState) -> bool {
        round.found_differences.len() >= 2
    }

    fn completion_message(&self, submission: Submission) -> ClientMessage {
        ClientMessage::SubmitScrambleTime(submission)
    }
}

#[tokio::test]
async fn registered_game_decides_completion() {
    let (transport, server) = MockTransport::new();
    let mut identity = AnonymousIdentity::new();
    let mut games = GameRegistry::default();
    games.register(Box::new(QuickSpot));
    let mut client = Client::connect_with(config(), &mut identity, async { Ok(transport) })
        .await
        .unwrap()
        .with_games(games);

    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();
    deliver(
        &mut client,
        &server,
        join_accepted_json("1234", Phase::Playing, GameMode::SpotTheDifference),
    )
    .await;
    deliver(&mut client, &server, differences_json(&[3])).await;
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Playing);

    deliver(&mut client, &server, differences_json(&[3, 1])).await;
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Leaderboard);
    settle().await;
    assert_eq!(server.sent_events(), ["joinEvent", "submitScrambleTime"]);
}

#[tokio::test]
async fn event_ended_returns_everyone_to_login() {
    let (mut client, server, _identity) = joined_player(GameMode::SpotTheDifference).await;
    let update = deliver(&mut client, &server, event_ended_json()).await;
    assert_eq!(update, Update::Message(MessageKind::EventEnded));

    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Login);
    assert_eq!(snapshot.role, None);
    assert_eq!(snapshot.event_code, None);
    assert_eq!(client.take_notices(), [Notice::EventEnded]);
}

#[tokio::test]
async fn lost_connection_falls_back_to_offline_login() {
    let (mut client, server, _identity) = joined_player(GameMode::SpotTheDifference).await;
    deliver(
        &mut client,
        &server,
        game_state_json(Phase::Playing, GameMode::SpotTheDifference),
    )
    .await;

    server.fail("connection reset");
    match client.next_update().await {
        Update::ConnectionLost { reason } => {
            assert!(reason.unwrap().contains("connection reset"));
        }
        other => panic!("expected ConnectionLost, got {other:?}"),
    }

    assert_eq!(client.connectivity(), Connectivity::Offline);
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Login);
    assert!(matches!(
        client.take_notices().as_slice(),
        [Notice::ConnectionLost { .. }]
    ));

    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Playing);
    assert_eq!(snapshot.event_code.as_deref(), Some(OFFLINE_CODE));
    assert_eq!(snapshot.timer.source, TimerSource::Local);
}

#[tokio::test]
async fn clean_server_close_is_a_connection_loss() {
    let (mut client, server, _identity) = online_client().await;
    server.hang_up();
    assert_eq!(
        client.next_update().await,
        Update::ConnectionLost { reason: None }
    );
    assert_eq!(client.connectivity(), Connectivity::Offline);
    // Nothing was in progress, so there is nothing to tell the user.
    assert!(client.take_notices().is_empty());
}

#[tokio::test]
async fn shutdown_closes_the_transport() {
    let (mut client, server, _identity) = online_client().await;
    client.shutdown().await;
    assert!(server.is_closed());
}

#[tokio::test]
async fn login_after_shutdown_runs_offline() {
    let (mut client, _server, _identity) = joined_player(GameMode::SpotTheDifference).await;
    client.shutdown().await;

    assert_eq!(client.connectivity(), Connectivity::Offline);
    assert_eq!(client.snapshot().lifecycle, LifecycleState::Login);
    assert!(client.take_notices().is_empty());

    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Playing);
    assert_eq!(snapshot.event_code.as_deref(), Some(OFFLINE_CODE));
    assert_eq!(snapshot.timer.source, TimerSource::Local);
}

#[tokio::test]
async fn timer_flood_does_not_swallow_the_event_end() {
    let (transport, server) = MockTransport::new();
    let mut identity = AnonymousIdentity::new();
    let config = config().with_event_channel_capacity(4);
    let mut client = Client::connect_with(config, &mut identity, async { Ok(transport) })
        .await
        .unwrap();
    client.login(LoginForm::new("Owls", "B", "1234")).unwrap();

    server.push(join_accepted_json(
        "1234",
        Phase::Playing,
        GameMode::SpotTheDifference,
    ));
    for i in 1..=10 {
        server.push(timer_json(i * 100));
    }
    server.push(event_ended_json());
    settle().await;

    let mut applied = Vec::new();
    while client.snapshot().lifecycle != LifecycleState::Login {
        let update = tokio::time::timeout(Duration::from_secs(1), client.next_update())
            .await
            .expect("eventEnded was never delivered");
        match update {
            Update::Message(kind) => applied.push(kind),
            other => panic!("unexpected update {other:?}"),
        }
    }
    assert_eq!(applied.first(), Some(&MessageKind::JoinResponse));
    assert_eq!(applied.last(), Some(&MessageKind::EventEnded));
    assert_eq!(client.take_notices(), [Notice::EventEnded]);
}

// ── Offline ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn offline_player_round_is_timed_locally() {
    let (mut client, _identity) = offline_client().await;
    client.login(LoginForm::new("Owls", "B", "")).unwrap();
    assert_eq!(client.snapshot().event_code.as_deref(), Some(OFFLINE_CODE));

    for expected in [50, 100, 150] {
        assert_eq!(
            client.next_update().await,
            Update::Tick {
                elapsed_ms: expected
            }
        );
    }

    for i in 0..5 {
        client.record_difference(i).unwrap();
    }
    let snapshot = client.snapshot();
    assert_eq!(snapshot.lifecycle, LifecycleState::Leaderboard);
    assert_eq!(snapshot.leaderboard.len(), 1);
    assert_eq!(snapshot.leaderboard[0].time, 150);
    assert_eq!(snapshot.timer.source, TimerSource::Local);
}

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format fixtures for every protocol message.
//!
//! Each test pins the exact JSON the session server sends or expects, so a
//! rename on either side shows up here first.

use quickquest_client::protocol::{
    ClientMessage, GameMode, JoinResponsePayload, LeaderboardEntry, MessageKind, Phase,
    ServerMessage, Submission, UserId,
};
use quickquest_client::QuickQuestError;
use serde_json::{json, Value};

fn to_value(msg: &ClientMessage) -> Value {
    serde_json::to_value(msg).unwrap()
}

fn parse(value: Value) -> ServerMessage {
    serde_json::from_value(value).unwrap()
}

fn submission() -> Submission {
    Submission {
        team_name: "Owls".into(),
        section: "B".into(),
        user_id: UserId::new("u-1"),
        event_code: "1234".into(),
        time: 12_345,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Client → server
// ═══════════════════════════════════════════════════════════════════

#[test]
fn create_event_shape() {
    let msg = ClientMessage::CreateEvent {
        host_id: UserId::new("host-1"),
    };
    assert_eq!(
        to_value(&msg),
        json!({ "event": "createEvent", "data": { "hostId": "host-1" } })
    );
}

#[test]
fn join_event_shape() {
    let msg = ClientMessage::JoinEvent {
        event_code: "1234".into(),
        team_id: UserId::new("u-1"),
        team_name: "Owls".into(),
        section: "B".into(),
    };
    assert_eq!(
        to_value(&msg),
        json!({
            "event": "joinEvent",
            "data": {
                "eventCode": "1234",
                "teamId": "u-1",
                "teamName": "Owls",
                "section": "B"
            }
        })
    );
}

#[test]
fn lifecycle_requests_carry_event_code_and_mode() {
    let start = ClientMessage::StartGame {
        event_code: "4821".into(),
        game_mode: GameMode::ImageScramble,
    };
    assert_eq!(
        to_value(&start),
        json!({
            "event": "startGame",
            "data": { "eventCode": "4821", "gameMode": "image-scramble" }
        })
    );

    let restart = ClientMessage::RestartGame {
        event_code: "4821".into(),
        game_mode: GameMode::MatchingPairs,
    };
    assert_eq!(to_value(&restart)["event"], "restartGame");
    assert_eq!(to_value(&restart)["data"]["gameMode"], "matching-pairs");

    let end = ClientMessage::EndEvent {
        event_code: "4821".into(),
    };
    assert_eq!(
        to_value(&end),
        json!({ "event": "endEvent", "data": { "eventCode": "4821" } })
    );
}

#[test]
fn completion_submissions_share_a_payload() {
    let expected_data = json!({
        "teamName": "Owls",
        "section": "B",
        "userId": "u-1",
        "eventCode": "1234",
        "time": 12_345
    });

    let spot = to_value(&ClientMessage::SubmitTime(submission()));
    assert_eq!(spot["event"], "submitTime");
    assert_eq!(spot["data"], expected_data);

    let scramble = to_value(&ClientMessage::SubmitScrambleTime(submission()));
    assert_eq!(scramble["event"], "submitScrambleTime");
    assert_eq!(scramble["data"], expected_data);
}

#[test]
fn difference_found_shape() {
    let msg = ClientMessage::DifferenceFound {
        event_code: "1234".into(),
        difference_index: 3,
    };
    assert_eq!(
        to_value(&msg),
        json!({
            "event": "differenceFound",
            "data": { "eventCode": "1234", "differenceIndex": 3 }
        })
    );
}

#[test]
fn event_name_matches_serialized_tag() {
    let messages = [
        ClientMessage::CreateEvent {
            host_id: UserId::new("h"),
        },
        ClientMessage::EndEvent {
            event_code: "1".into(),
        },
        ClientMessage::SubmitScrambleTime(submission()),
        ClientMessage::DifferenceFound {
            event_code: "1".into(),
            difference_index: 0,
        },
    ];
    for msg in messages {
        assert_eq!(to_value(&msg)["event"], msg.event_name());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Server → client
// ═══════════════════════════════════════════════════════════════════

#[test]
fn game_state_update_with_and_without_scramble_order() {
    let msg = parse(json!({
        "event": "gameStateUpdate",
        "data": { "state": "playing", "gameMode": "spot-the-difference" }
    }));
    assert_eq!(
        msg,
        ServerMessage::GameStateUpdate {
            state: Phase::Playing,
            game_mode: GameMode::SpotTheDifference,
            scrambled_order: None,
        }
    );

    let msg = parse(json!({
        "event": "gameStateUpdate",
        "data": {
            "state": "playing",
            "gameMode": "image-scramble",
            "scrambledOrder": [3, 1, 2, 4, 5, 6, 7, 8, 9]
        }
    }));
    let ServerMessage::GameStateUpdate {
        scrambled_order, ..
    } = msg
    else {
        panic!("expected GameStateUpdate");
    };
    assert_eq!(scrambled_order.unwrap(), [3, 1, 2, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn every_phase_parses() {
    for (raw, phase) in [
        ("waiting", Phase::Waiting),
        ("playing", Phase::Playing),
        ("leaderboard", Phase::Leaderboard),
    ] {
        let msg = parse(json!({
            "event": "gameStateUpdate",
            "data": { "state": raw, "gameMode": "matching-pairs" }
        }));
        assert!(matches!(msg, ServerMessage::GameStateUpdate { state, .. } if state == phase));
    }
}

#[test]
fn scalar_payloads() {
    assert_eq!(
        parse(json!({ "event": "timerUpdate", "data": 4200 })),
        ServerMessage::TimerUpdate(4200)
    );
    assert_eq!(
        parse(json!({ "event": "hostCode", "data": "4821" })),
        ServerMessage::HostCode("4821".into())
    );
    assert_eq!(
        parse(json!({ "event": "differenceUpdate", "data": [0, 2, 4] })),
        ServerMessage::DifferenceUpdate(vec![0, 2, 4])
    );
}

#[test]
fn event_ended_needs_no_payload() {
    assert_eq!(
        parse(json!({ "event": "eventEnded" })),
        ServerMessage::EventEnded
    );
}

#[test]
fn leaderboard_update_parses_optional_team_id() {
    let msg = parse(json!({
        "event": "leaderboardUpdate",
        "data": [
            { "name": "A", "section": "1", "time": 10000, "teamId": "u-9" },
            { "name": "B", "section": "2", "time": 15000 }
        ]
    }));
    let ServerMessage::LeaderboardUpdate(entries) = msg else {
        panic!("expected LeaderboardUpdate");
    };
    assert_eq!(entries[0].team_id.as_deref(), Some("u-9"));
    assert_eq!(entries[1], LeaderboardEntry::new("B", "2", 15_000));
}

#[test]
fn join_response_accepted_and_rejected() {
    let accepted = parse(json!({
        "event": "joinResponse",
        "data": {
            "success": true,
            "eventCode": "1234",
            "gameState": "waiting",
            "currentGameMode": "matching-pairs"
        }
    }));
    assert_eq!(
        accepted,
        ServerMessage::JoinResponse(Box::new(JoinResponsePayload {
            success: true,
            message: None,
            event_code: Some("1234".into()),
            game_state: Some(Phase::Waiting),
            current_game_mode: Some(GameMode::MatchingPairs),
        }))
    );

    let rejected = parse(json!({
        "event": "joinResponse",
        "data": { "success": false, "message": "Event not found" }
    }));
    let ServerMessage::JoinResponse(payload) = rejected else {
        panic!("expected JoinResponse");
    };
    assert!(!payload.success);
    assert_eq!(payload.message.as_deref(), Some("Event not found"));
    assert_eq!(payload.game_state, None);
}

#[test]
fn unknown_events_and_modes_are_rejected() {
    assert!(serde_json::from_value::<ServerMessage>(json!({ "event": "chat", "data": "hi" })).is_err());
    assert!(serde_json::from_value::<ServerMessage>(json!({
        "event": "gameStateUpdate",
        "data": { "state": "playing", "gameMode": "trivia" }
    }))
    .is_err());
    assert!(serde_json::from_value::<ServerMessage>(json!({ "event": "timerUpdate", "data": -5 })).is_err());
}

#[test]
fn frame_helpers_report_serialization_errors() {
    assert!(matches!(
        ServerMessage::from_json(r#"{"event":"chat","data":"hi"}"#),
        Err(QuickQuestError::Serialization(_))
    ));
    assert!(matches!(
        ServerMessage::from_json("not json"),
        Err(QuickQuestError::Serialization(_))
    ));
    assert_eq!(
        ServerMessage::from_json(r#"{"event":"hostCode","data":"4821"}"#).unwrap(),
        ServerMessage::HostCode("4821".into())
    );

    let frame = ClientMessage::CreateEvent {
        host_id: UserId::new("host-1"),
    }
    .to_json()
    .unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&frame).unwrap(),
        json!({ "event": "createEvent", "data": { "hostId": "host-1" } })
    );
}

#[test]
fn kind_names_match_wire_tags() {
    let samples = [
        json!({ "event": "gameStateUpdate", "data": { "state": "waiting", "gameMode": "spot-the-difference" } }),
        json!({ "event": "timerUpdate", "data": 1 }),
        json!({ "event": "leaderboardUpdate", "data": [] }),
        json!({ "event": "differenceUpdate", "data": [] }),
        json!({ "event": "hostCode", "data": "1" }),
        json!({ "event": "joinResponse", "data": { "success": true } }),
        json!({ "event": "eventEnded" }),
    ];
    let mut kinds = Vec::new();
    for sample in samples {
        let tag = sample["event"].as_str().unwrap().to_string();
        let kind = parse(sample).kind();
        assert_eq!(kind.as_str(), tag);
        kinds.push(kind);
    }
    assert_eq!(kinds.len(), 7);
    assert!(kinds.contains(&MessageKind::EventEnded));
}

#[test]
fn game_modes_use_kebab_case() {
    for mode in GameMode::ALL {
        assert_eq!(serde_json::to_value(mode).unwrap(), mode.as_str());
        assert_eq!(mode.to_string(), mode.as_str());
    }
    assert_eq!(GameMode::default(), GameMode::SpotTheDifference);
}

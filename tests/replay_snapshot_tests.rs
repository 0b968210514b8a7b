//! Late join, replay requests, snapshot policy, and version
//! monotonicity over a real room's history.

mod test_helpers;

use parlor_server::protocol::ServerMessage;
use serde_json::json;
use test_helpers::*;

#[tokio::test]
async fn test_late_join_receives_current_full_state() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (_p1, _) = server.join_player(&handle, "Ada").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "trivia"})).await;
    let round = run_intent(&handle, &mut host, "start_round", json!({})).await;
    let current = round.version.unwrap();

    // A brand-new client joins mid-game
    let (mut late, payload) = server.join_player(&handle, "Cleo").await;
    assert_eq!(payload.version, current + 1); // their join is itself an event
    assert_eq!(
        payload.current_game,
        Some(parlor_server::protocol::GameKind::Trivia)
    );

    // Their personalized full state arrives without any request
    let sync = late.expect_state_sync().await;
    assert!(sync.state.is_some());
    let state = sync.state.unwrap();
    assert_eq!(state["round"], json!(1));
    assert_eq!(state["game"]["game"], json!("trivia"));
    // Players never see the answer before reveal
    assert!(state["game"].get("correct").is_none());
}

#[tokio::test]
async fn test_replay_request_returns_snapshot_plus_events() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "buzzer"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;
    run_player_intent(&handle, &mut p1, "buzz", json!({})).await;
    let last = run_intent(
        &handle,
        &mut host,
        "award",
        json!({"player_id": p1.id.to_string(), "points": 10}),
    )
    .await;
    let current = last.version.unwrap();
    p1.drain();

    handle.replay_request(p1.id, Some(0), None);
    let replay = loop {
        match p1.next().await {
            ServerMessage::ReplayResponse(payload) => break payload,
            _ => continue,
        }
    };

    assert_eq!(replay.current_version, current);
    // Snapshot (if any) plus events reach the current version exactly
    let mut reached = replay
        .snapshot
        .as_ref()
        .map(|snapshot| snapshot.version)
        .unwrap_or(0);
    for event in &replay.events {
        assert_eq!(event.version, reached + 1);
        reached = event.version;
    }
    assert_eq!(reached, current);
}

#[tokio::test]
async fn test_critical_transitions_create_snapshots() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;

    let before = server.metrics.snapshot().sync.snapshots_created;
    run_intent(&handle, &mut host, "start_game", json!({"game": "trivia"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;
    run_intent(&handle, &mut host, "end_round", json!({})).await;

    let after = server.metrics.snapshot().sync.snapshots_created;
    // start_game, round_started, and round_ended are all critical
    assert!(after >= before + 3, "expected snapshots at critical transitions");
}

#[tokio::test]
async fn test_event_versions_are_strictly_monotonic() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;
    let (mut p2, _) = server.join_player(&handle, "Bob").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "buzzer"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;
    run_player_intent(&handle, &mut p1, "buzz", json!({})).await;
    run_player_intent(&handle, &mut p2, "buzz", json!({})).await;
    run_intent(&handle, &mut host, "end_round", json!({})).await;
    p1.drain();

    handle.replay_request(p1.id, Some(0), None);
    let replay = loop {
        match p1.next().await {
            ServerMessage::ReplayResponse(payload) => break payload,
            _ => continue,
        }
    };

    let versions: Vec<u64> = replay.events.iter().map(|event| event.version).collect();
    assert!(!versions.is_empty());
    for pair in versions.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "versions must increase by exactly 1");
    }
}

#[tokio::test]
async fn test_intent_ids_are_recorded_on_events() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "buzzer"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;

    let buzz = submission("buzz", json!({}));
    let buzz_id = buzz.id;
    handle.submit_intent(p1.id, parlor_server::protocol::ConnectionRole::Player, buzz);
    let result = p1.expect_intent_result().await;
    assert!(result.success);
    p1.drain();

    handle.replay_request(p1.id, Some(0), None);
    let replay = loop {
        match p1.next().await {
            ServerMessage::ReplayResponse(payload) => break payload,
            _ => continue,
        }
    };

    // Exactly one event carries this intent id
    let matching = replay
        .events
        .iter()
        .filter(|event| event.intent_id == Some(buzz_id))
        .count();
    assert_eq!(matching, 1);
}

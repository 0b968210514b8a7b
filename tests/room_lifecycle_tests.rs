//! Membership, reconnection with migration, host handoff, kick,
//! pause/resume, and settings changes.

mod test_helpers;

use parlor_server::protocol::{ErrorCode, ServerMessage, SyncScope};
use serde_json::json;
use std::time::Duration;
use test_helpers::*;

#[tokio::test]
async fn test_reconnect_migrates_player_identity_and_score() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, joined) = server.join_player(&handle, "Ada").await;
    let token = joined.reconnect_token.expect("token issued");
    let old_id = p1.id;

    // Earn some score first
    run_intent(&handle, &mut host, "start_game", json!({"game": "trivia"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;
    run_player_intent(&handle, &mut p1, "answer", json!({"choice": 1})).await;
    run_intent(&handle, &mut host, "reveal", json!({})).await;

    // Drop and come back with the token under a fresh connection
    handle.connection_closed(old_id);
    server.fanout.unregister(old_id);
    let (reconnected, payload) = server.rejoin_with_token(&handle, &token).await;

    assert!(payload.resumed);
    assert_ne!(reconnected.id, old_id);
    assert_eq!(payload.player_id, reconnected.id);

    // The roster migrated atomically: new id present with the score,
    // old id gone
    let player = payload
        .roster
        .players
        .get(&reconnected.id)
        .expect("migrated player in roster");
    assert_eq!(player.name, "Ada");
    assert_eq!(player.score, 100);
    assert!(!payload.roster.players.contains_key(&old_id));
}

#[tokio::test]
async fn test_reconnect_token_is_single_use() {
    let server = create_test_server().await;
    let (handle, _host, _) = server.create_room("Host").await;
    let (p1, joined) = server.join_player(&handle, "Ada").await;
    let token = joined.reconnect_token.expect("token issued");

    handle.connection_closed(p1.id);
    let (_first, payload) = server.rejoin_with_token(&handle, &token).await;
    assert!(payload.resumed);

    // Replaying the same token joins as a brand-new player at most,
    // never as Ada again
    let id = uuid::Uuid::new_v4();
    let _rx = server.fanout.register(id);
    let outcome = handle
        .join(parlor_server::room::JoinRequest {
            connection_id: id,
            role: parlor_server::protocol::ConnectionRole::Player,
            player_name: None,
            reconnect_token: Some(token),
        })
        .await;
    // Without a name and with a dead token, the join fails cleanly
    assert!(matches!(outcome, Err((ErrorCode::ValidationFailed, _))));
}

#[tokio::test]
async fn test_kick_removes_player_and_notifies() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;
    p1.drain();

    let result = run_intent(
        &handle,
        &mut host,
        "kick",
        json!({"player_id": p1.id.to_string()}),
    )
    .await;
    assert!(result.success);

    // The kicked client is told why
    let error = p1.expect_kind("error").await;
    match error {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Unauthorized),
        _ => unreachable!(),
    }

    let summary = handle.summary().await.expect("room alive");
    assert_eq!(summary.player_count, 1);
}

#[tokio::test]
async fn test_host_disconnect_hands_off_to_oldest_player() {
    let server = create_test_server().await;
    let (handle, host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;
    let (_p2, _) = server.join_player(&handle, "Bob").await;
    p1.drain();

    handle.connection_closed(host.id);

    // The authoritative roster now names Ada as host
    let roster = loop {
        let sync = p1.expect_roster().await;
        if sync.roster.as_ref().map(|roster| roster.host_id) == Some(p1.id) {
            break sync.roster.unwrap();
        }
    };
    assert_eq!(roster.host_id, p1.id);

    // And the new host may drive the game
    let result = run_intent(&handle, &mut p1, "start_game", json!({"game": "buzzer"})).await;
    assert!(result.success);
}

#[tokio::test]
async fn test_pause_blocks_gameplay_and_resume_restores_it() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "buzzer"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;

    let paused = run_intent(&handle, &mut host, "pause", json!({})).await;
    assert!(paused.success);

    let rejected = run_player_intent(&handle, &mut p1, "buzz", json!({})).await;
    assert!(!rejected.success);
    assert_eq!(rejected.error, Some(ErrorCode::ValidationFailed));

    let resumed = run_intent(&handle, &mut host, "resume", json!({})).await;
    assert!(resumed.success);

    let buzz = run_player_intent(&handle, &mut p1, "buzz", json!({})).await;
    assert!(buzz.success);
}

#[tokio::test]
async fn test_settings_update_broadcasts_to_room() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;
    p1.drain();

    let result = run_intent(&handle, &mut host, "update_settings", json!({"max_players": 12})).await;
    assert!(result.success);

    let settings = loop {
        if let ServerMessage::StateSync(payload) = p1.expect_kind("state_sync").await {
            if payload.scope == SyncScope::Settings {
                break payload.settings.unwrap();
            }
        }
    };
    assert_eq!(settings.max_players, 12);
}

#[tokio::test]
async fn test_settings_cannot_shrink_below_current_population() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    for name in ["Ada", "Bob", "Cleo", "Dee", "Eve"] {
        server.join_player(&handle, name).await;
    }

    // Six members now; five is the floor but below the population
    let result = run_intent(&handle, &mut host, "update_settings", json!({"max_players": 5})).await;
    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorCode::ValidationFailed));
}

#[tokio::test]
async fn test_full_room_rejects_joins() {
    let mut config = test_config();
    config.protocol.room.max_players = 5;
    let server = create_test_server_with_config(config).await;
    let (handle, _host, _) = server.create_room("Host").await;
    for name in ["Ada", "Bob", "Cleo", "Dee"] {
        server.join_player(&handle, name).await;
    }

    let id = uuid::Uuid::new_v4();
    let _rx = server.fanout.register(id);
    let outcome = handle
        .join(parlor_server::room::JoinRequest {
            connection_id: id,
            role: parlor_server::protocol::ConnectionRole::Player,
            player_name: Some("Late".to_string()),
            reconnect_token: None,
        })
        .await;
    assert!(matches!(outcome, Err((ErrorCode::ValidationFailed, _))));
}

#[tokio::test]
async fn test_trivia_auto_reveal_timer_fires_through_the_room_queue() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "trivia"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;
    run_player_intent(&handle, &mut p1, "answer", json!({"choice": 1})).await;

    let armed = run_intent(&handle, &mut host, "start_timer", json!({"seconds": 1})).await;
    assert!(armed.success);
    p1.drain();

    // The timer re-enters the queue as a host "reveal" intent
    tokio::time::sleep(Duration::from_millis(1300)).await;
    p1.drain();

    // A critical transition forces a full broadcast we can inspect
    run_intent(&handle, &mut host, "end_round", json!({})).await;
    let state = loop {
        let sync = p1.expect_state_sync().await;
        if let Some(state) = sync.state {
            break state;
        }
    };
    assert_eq!(state["game"]["phase"], json!("revealed"));
    assert_eq!(state["scores"][p1.id.to_string()], json!(100));
}

#[tokio::test]
async fn test_game_end_reports_final_scores() {
    let server = create_test_server().await;
    let (handle, mut host, _) = server.create_room("Host").await;
    let (mut p1, _) = server.join_player(&handle, "Ada").await;

    run_intent(&handle, &mut host, "start_game", json!({"game": "trivia"})).await;
    run_intent(&handle, &mut host, "start_round", json!({})).await;
    run_player_intent(&handle, &mut p1, "answer", json!({"choice": 1})).await;
    run_intent(&handle, &mut host, "reveal", json!({})).await;
    run_intent(&handle, &mut host, "end_round", json!({})).await;

    let ended = run_intent(&handle, &mut host, "end_game", json!({})).await;
    assert!(ended.success);

    // Back to the lobby closes the loop
    let lobby = run_intent(&handle, &mut host, "return_to_lobby", json!({})).await;
    assert!(lobby.success);
    let summary = handle.summary().await.unwrap();
    assert_eq!(
        summary.lifecycle,
        parlor_server::protocol::GameLifecycle::Lobby
    );
    assert_eq!(summary.current_game, None);
}

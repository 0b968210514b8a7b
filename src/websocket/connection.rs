//! Per-connection WebSocket handling.
//!
//! Each connection gets a server-allocated id, declares its role in the
//! mandatory first handshake, and is then bridged between the socket
//! and its room: inbound frames are validated, rate-limited, and routed
//! to the room's queue; outbound messages arrive from the fan-out
//! registry and are written as JSON text frames.

use axum::extract::ws::{Message, WebSocket};
use crate::broadcast::Fanout;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::broadcast::OutboundMessage;
use crate::protocol::{
    validate_envelope, ClientEnvelope, ClientMessage, ConnectionRole, ErrorCode, PlayerId,
    RoomCode, ServerEnvelope, ServerMessage,
};
use crate::room::{JoinRequest, RoomHandle};
use crate::security_log::{AuditKind, Severity};

/// Drive one accepted WebSocket until either side closes it.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: PlayerId = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Register the outbound channel before any join so the initial
    // personalized sync is not lost
    let mut outbound = state.fanout.register(connection_id);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let bytes = message.json_bytes();
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let session = run_session(connection_id, &mut ws_rx, &state).await;

    if let Some((handle, _)) = session {
        handle.connection_closed(connection_id);
    }
    state.fanout.unregister(connection_id);
    writer.abort();
    tracing::debug!(%connection_id, "connection closed");
}

/// Returns the joined room (if the handshake succeeded) once the
/// socket stops yielding frames.
async fn run_session(
    connection_id: PlayerId,
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    state: &Arc<AppState>,
) -> Option<(RoomHandle, ConnectionRole)> {
    // The first message must be a handshake
    let (handle, role) = loop {
        let envelope = match next_envelope(ws_rx, state, connection_id).await {
            Some(Ok(envelope)) => envelope,
            Some(Err(())) => continue,
            None => return None,
        };
        match establish(connection_id, envelope, state).await {
            Ok(established) => break established,
            Err((code, message)) => {
                send_error(state, connection_id, None, code, &message);
                if code == ErrorCode::Expired {
                    return None;
                }
                // Malformed first messages get one error and the
                // connection is dropped
                return None;
            }
        }
    };

    // Main message loop
    while let Some(result) = next_envelope(ws_rx, state, connection_id).await {
        let Ok(envelope) = result else { continue };
        route_message(connection_id, role, &handle, envelope, state);
    }

    Some((handle, role))
}

/// Read, parse, and structurally validate one frame. `Err(())` means a
/// reply was already sent and the caller should keep reading.
async fn next_envelope(
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    state: &Arc<AppState>,
    connection_id: PlayerId,
) -> Option<Result<ClientEnvelope, ()>> {
    loop {
        let frame = match ws_rx.next().await? {
            Ok(frame) => frame,
            Err(_) => return None,
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            // Pings are answered by axum; other frame kinds are ignored
            _ => continue,
        };

        if text.len() > state.config.protocol.max_message_bytes {
            state.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            send_error(
                state,
                connection_id,
                None,
                ErrorCode::ValidationFailed,
                "message exceeds size limit",
            );
            return Some(Err(()));
        }

        let envelope: ClientEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(error) => {
                state.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
                state.security.record(
                    AuditKind::ValidationFailure,
                    Severity::Low,
                    None,
                    Some(connection_id),
                    "unparseable_message",
                    json!({"error": error.to_string()}),
                );
                send_error(
                    state,
                    connection_id,
                    None,
                    ErrorCode::ValidationFailed,
                    "unparseable message",
                );
                return Some(Err(()));
            }
        };

        if let Err(failure) = validate_envelope(&envelope, &state.config.protocol) {
            state.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            state.security.record(
                AuditKind::ValidationFailure,
                Severity::Low,
                envelope.room_code.clone(),
                Some(connection_id),
                "invalid_message",
                json!({"reason": failure.reason}),
            );
            send_error(
                state,
                connection_id,
                envelope.room_code.as_ref(),
                failure.code,
                &failure.reason,
            );
            return Some(Err(()));
        }

        return Some(Ok(envelope));
    }
}

/// Process the handshake: create or resolve the room and join it.
async fn establish(
    connection_id: PlayerId,
    envelope: ClientEnvelope,
    state: &Arc<AppState>,
) -> Result<(RoomHandle, ConnectionRole), (ErrorCode, String)> {
    let ClientMessage::Handshake {
        role,
        player_name,
        reconnect_token,
        ..
    } = envelope.message
    else {
        return Err((
            ErrorCode::ValidationFailed,
            "the first message must be a handshake".to_string(),
        ));
    };

    let handle = match (&envelope.room_code, role) {
        (Some(code), _) => state
            .dispatcher
            .route(code)
            .map_err(|code| (code, "no such room".to_string()))?,
        (None, ConnectionRole::HostControl) => {
            let name = player_name.clone().unwrap_or_else(|| "Host".to_string());
            state
                .dispatcher
                .create(connection_id, name)
                .await
                .map_err(|error| (ErrorCode::Internal, error.to_string()))?
        }
        (None, _) => {
            return Err((
                ErrorCode::ValidationFailed,
                "a room code is required to join".to_string(),
            ));
        }
    };

    let payload = handle
        .join(JoinRequest {
            connection_id,
            role,
            player_name,
            reconnect_token,
        })
        .await?;

    state.fanout.send_to(
        connection_id,
        OutboundMessage::new(ServerEnvelope::new(
            Some(handle.code.clone()),
            ServerMessage::Handshake(payload),
        )),
    );
    Ok((handle, role))
}

/// Forward a validated post-handshake message to the owning room,
/// consulting the rate limiter first.
fn route_message(
    connection_id: PlayerId,
    role: ConnectionRole,
    handle: &RoomHandle,
    envelope: ClientEnvelope,
    state: &Arc<AppState>,
) {
    match envelope.message {
        ClientMessage::Handshake { .. } => {
            send_error(
                state,
                connection_id,
                Some(&handle.code),
                ErrorCode::ValidationFailed,
                "already joined",
            );
        }
        ClientMessage::Intent(submission) => {
            if let Err(limited) =
                state
                    .rate_limiter
                    .check(connection_id, &handle.code, &submission.action)
            {
                state.security.record(
                    AuditKind::RateLimitTrip,
                    Severity::Medium,
                    Some(handle.code.clone()),
                    Some(connection_id),
                    submission.action.clone(),
                    json!({"retry_after_ms": limited.retry_after.as_millis() as u64}),
                );
                send_error(
                    state,
                    connection_id,
                    Some(&handle.code),
                    ErrorCode::RateLimited,
                    &limited.to_string(),
                );
                return;
            }
            handle.submit_intent(connection_id, role, submission);
        }
        ClientMessage::Ack {
            version,
            message_type,
            client_timestamp,
        } => {
            handle.ack(connection_id, version, message_type, client_timestamp);
        }
        ClientMessage::ReplayRequest {
            from_version,
            from_timestamp,
        } => {
            if let Err(limited) =
                state
                    .rate_limiter
                    .check(connection_id, &handle.code, "replay_request")
            {
                send_error(
                    state,
                    connection_id,
                    Some(&handle.code),
                    ErrorCode::RateLimited,
                    &limited.to_string(),
                );
                return;
            }
            handle.replay_request(connection_id, from_version, from_timestamp);
        }
    }
}

fn send_error(
    state: &Arc<AppState>,
    connection_id: PlayerId,
    room_code: Option<&RoomCode>,
    code: ErrorCode,
    message: &str,
) {
    state.fanout.send_to(
        connection_id,
        OutboundMessage::new(ServerEnvelope::new(
            room_code.cloned(),
            ServerMessage::error(code, message),
        )),
    );
}

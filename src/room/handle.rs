//! Cheap, cloneable handle onto a room's command queue.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{
    ConnectionRole, ErrorCode, HandshakePayload, IntentSubmission, PlayerId, RoomCode,
    RoomSummary, Version,
};

/// A request to enter a room, built by the transport layer from the
/// handshake message.
#[derive(Debug)]
pub struct JoinRequest {
    /// Connection-scoped id the transport allocated for this client
    pub connection_id: PlayerId,
    pub role: ConnectionRole,
    pub player_name: Option<String>,
    pub reconnect_token: Option<String>,
}

/// Commands processed by the room's single-writer loop.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<Box<HandshakePayload>, (ErrorCode, String)>>,
    },
    SubmitIntent {
        player_id: PlayerId,
        role: ConnectionRole,
        submission: IntentSubmission,
    },
    Ack {
        player_id: PlayerId,
        version: Version,
        message_type: String,
        client_timestamp: Option<DateTime<Utc>>,
    },
    ReplayRequest {
        player_id: PlayerId,
        from_version: Option<Version>,
        from_timestamp: Option<DateTime<Utc>>,
    },
    ConnectionClosed {
        player_id: PlayerId,
    },
    TimerFired {
        name: String,
        action: String,
        data: serde_json::Value,
    },
    Summary {
        reply: oneshot::Sender<RoomSummary>,
    },
    Destroy {
        reason: String,
    },
}

/// Handle to a live room. Cloned freely; all mutation flows through the
/// queue behind it.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub code: RoomCode,
    /// Informational shard id derived from the code; a future cluster
    /// layer routes connections with it
    pub shard: u32,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub(crate) fn new(code: RoomCode, shard: u32, tx: mpsc::UnboundedSender<RoomCommand>) -> Self {
        Self { code, shard, tx }
    }

    /// Whether the room's loop has terminated.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn join(
        &self,
        request: JoinRequest,
    ) -> Result<Box<HandshakePayload>, (ErrorCode, String)> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(RoomCommand::Join { request, reply })
            .is_err()
        {
            return Err((ErrorCode::NotFound, "room is gone".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err((ErrorCode::Internal, "room did not answer".to_string())))
    }

    pub fn submit_intent(
        &self,
        player_id: PlayerId,
        role: ConnectionRole,
        submission: IntentSubmission,
    ) {
        let _ = self.tx.send(RoomCommand::SubmitIntent {
            player_id,
            role,
            submission,
        });
    }

    pub fn ack(
        &self,
        player_id: PlayerId,
        version: Version,
        message_type: String,
        client_timestamp: Option<DateTime<Utc>>,
    ) {
        let _ = self.tx.send(RoomCommand::Ack {
            player_id,
            version,
            message_type,
            client_timestamp,
        });
    }

    pub fn replay_request(
        &self,
        player_id: PlayerId,
        from_version: Option<Version>,
        from_timestamp: Option<DateTime<Utc>>,
    ) {
        let _ = self.tx.send(RoomCommand::ReplayRequest {
            player_id,
            from_version,
            from_timestamp,
        });
    }

    pub fn connection_closed(&self, player_id: PlayerId) {
        let _ = self.tx.send(RoomCommand::ConnectionClosed { player_id });
    }

    pub async fn summary(&self) -> Option<RoomSummary> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RoomCommand::Summary { reply }).ok()?;
        rx.await.ok()
    }

    pub fn destroy(&self, reason: impl Into<String>) {
        let _ = self.tx.send(RoomCommand::Destroy {
            reason: reason.into(),
        });
    }
}

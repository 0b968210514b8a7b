use parlor_server::broadcast::{LocalFanout, OutboundMessage};
use parlor_server::config::Config;
use parlor_server::dedup::DedupStore;
use parlor_server::dispatcher::Dispatcher;
use parlor_server::metrics::EngineMetrics;
use parlor_server::protocol::{
    ConnectionRole, HandshakePayload, IntentResult, IntentSubmission, PlayerId, ServerMessage,
    StateSyncPayload, SyncScope,
};
use parlor_server::rate_limit::RateLimiter;
use parlor_server::reconnect::ReconnectRegistry;
use parlor_server::room::{JoinRequest, RoomHandle, RuntimeServices};
use parlor_server::security_log::SecurityLog;
use parlor_server::storage::NoopStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Engine stack wired for integration tests: real dispatcher, rooms,
/// sync, and fan-out; no sockets.
pub struct TestServer {
    pub dispatcher: Arc<Dispatcher>,
    pub fanout: Arc<LocalFanout>,
    pub metrics: Arc<EngineMetrics>,
}

/// Test configuration: fast scanner, generous ACK timeout so tests that
/// do not ACK are not flooded with resyncs.
#[allow(dead_code)]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sync.sync_scan_hz = 50;
    config.sync.min_full_broadcast_gap_ms = 0;
    config.sync.ack_timeout_ms = 60_000;
    config.sync.snapshot_interval_versions = 5;
    config.protocol.room.gc_interval_secs = 1;
    config
}

#[allow(dead_code)]
pub async fn create_test_server() -> TestServer {
    create_test_server_with_config(test_config()).await
}

#[allow(dead_code)]
pub async fn create_test_server_with_config(config: Config) -> TestServer {
    let config = Arc::new(config);
    let metrics = Arc::new(EngineMetrics::new());
    let fanout = Arc::new(LocalFanout::new());
    let services = RuntimeServices {
        config: config.clone(),
        fanout: fanout.clone(),
        dedup: DedupStore::new(4096, config.sync.dedup_ttl(), metrics.clone()),
        reconnect: Arc::new(ReconnectRegistry::new(Duration::from_secs(3600))),
        security: Arc::new(SecurityLog::default()),
        metrics: metrics.clone(),
        store: Arc::new(NoopStore),
    };
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone(), metrics.clone()));
    TestServer {
        dispatcher: Arc::new(Dispatcher::new(services, rate_limiter)),
        fanout,
        metrics,
    }
}

/// One simulated connection: its id and its outbound stream.
pub struct TestClient {
    pub id: PlayerId,
    pub rx: UnboundedReceiver<OutboundMessage>,
}

impl TestClient {
    /// Next outbound message, or panic after the timeout.
    #[allow(dead_code)]
    pub async fn next(&mut self) -> ServerMessage {
        let outbound = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection channel closed");
        outbound.envelope().message.clone()
    }

    /// Drain messages until one of the given wire kind arrives.
    #[allow(dead_code)]
    pub async fn expect_kind(&mut self, kind: &str) -> ServerMessage {
        loop {
            let message = self.next().await;
            if message.kind() == kind {
                return message;
            }
        }
    }

    /// Drain until an intent result arrives.
    #[allow(dead_code)]
    pub async fn expect_intent_result(&mut self) -> IntentResult {
        match self.expect_kind("intent_result").await {
            ServerMessage::IntentResult(result) => result,
            _ => unreachable!(),
        }
    }

    /// Drain until a state-scoped sync arrives.
    #[allow(dead_code)]
    pub async fn expect_state_sync(&mut self) -> StateSyncPayload {
        loop {
            if let ServerMessage::StateSync(payload) = self.expect_kind("state_sync").await {
                if payload.scope == SyncScope::State {
                    return *payload;
                }
            }
        }
    }

    /// Drain until a roster-scoped sync arrives.
    #[allow(dead_code)]
    pub async fn expect_roster(&mut self) -> StateSyncPayload {
        loop {
            if let ServerMessage::StateSync(payload) = self.expect_kind("state_sync").await {
                if payload.scope == SyncScope::Roster {
                    return *payload;
                }
            }
        }
    }

    /// Discard everything currently queued.
    #[allow(dead_code)]
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl TestServer {
    /// Create a room and complete the host's handshake.
    #[allow(dead_code)]
    pub async fn create_room(&self, host_name: &str) -> (RoomHandle, TestClient, HandshakePayload) {
        let id = Uuid::new_v4();
        let rx = self.fanout.register(id);
        let handle = self
            .dispatcher
            .create(id, host_name.to_string())
            .await
            .expect("room created");
        let payload = handle
            .join(JoinRequest {
                connection_id: id,
                role: ConnectionRole::HostControl,
                player_name: Some(host_name.to_string()),
                reconnect_token: None,
            })
            .await
            .expect("host handshake accepted");
        (handle, TestClient { id, rx }, *payload)
    }

    /// Join a player connection into an existing room.
    #[allow(dead_code)]
    pub async fn join_player(
        &self,
        handle: &RoomHandle,
        name: &str,
    ) -> (TestClient, HandshakePayload) {
        let id = Uuid::new_v4();
        let rx = self.fanout.register(id);
        let payload = handle
            .join(JoinRequest {
                connection_id: id,
                role: ConnectionRole::Player,
                player_name: Some(name.to_string()),
                reconnect_token: None,
            })
            .await
            .expect("player handshake accepted");
        (TestClient { id, rx }, *payload)
    }

    /// Reconnect with a token under a fresh connection id.
    #[allow(dead_code)]
    pub async fn rejoin_with_token(
        &self,
        handle: &RoomHandle,
        token: &str,
    ) -> (TestClient, HandshakePayload) {
        let id = Uuid::new_v4();
        let rx = self.fanout.register(id);
        let payload = handle
            .join(JoinRequest {
                connection_id: id,
                role: ConnectionRole::Player,
                player_name: None,
                reconnect_token: Some(token.to_string()),
            })
            .await
            .expect("reconnect accepted");
        (TestClient { id, rx }, *payload)
    }
}

/// Build an intent submission with a fresh id.
#[allow(dead_code)]
pub fn submission(action: &str, data: serde_json::Value) -> IntentSubmission {
    IntentSubmission {
        id: Uuid::new_v4(),
        action: action.to_string(),
        data,
        version: None,
        idempotency_key: None,
    }
}

/// Submit an intent and wait for its result.
#[allow(dead_code)]
pub async fn run_intent(
    handle: &RoomHandle,
    client: &mut TestClient,
    action: &str,
    data: serde_json::Value,
) -> IntentResult {
    let intent = submission(action, data);
    handle.submit_intent(client.id, ConnectionRole::HostControl, intent);
    client.expect_intent_result().await
}

/// Submit an intent as a plain player and wait for its result.
#[allow(dead_code)]
pub async fn run_player_intent(
    handle: &RoomHandle,
    client: &mut TestClient,
    action: &str,
    data: serde_json::Value,
) -> IntentResult {
    let intent = submission(action, data);
    handle.submit_intent(client.id, ConnectionRole::Player, intent);
    client.expect_intent_result().await
}

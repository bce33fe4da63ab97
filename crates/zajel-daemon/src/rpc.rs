//! JSON-RPC server over Unix socket.
//!
//! The platform UI talks to the daemon through newline-delimited JSON-RPC
//! 2.0 on a Unix domain socket. Channel key material returned by
//! `channel.create` goes straight to the caller, which owns the platform
//! secure storage; the daemon never writes private keys into its tables.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use rusqlite::Connection;
use zajel_channel::invite::subscribe;
use zajel_channel::manifest::create_channel;
use zajel_connection::manager::ConnectionManager;
use zajel_connection::ConnectionError;
use zajel_crypto::safety::compute_safety_number;
use zajel_db::actor::PeerStoreHandle;
use zajel_db::queries::{channels, messages};
use zajel_types::channel::{Channel, ChannelRole, ChannelRules};
use zajel_types::identity::StableId;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".into(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".into(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    fn internal(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".into(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    fn not_connected(peer: &str) -> Self {
        Self {
            code: -32000,
            message: "NOT_CONNECTED".into(),
            data: Some(serde_json::json!({"peer": peer})),
        }
    }
}

/// State the RPC handlers work against.
pub struct RpcState {
    pub stable_id: StableId,
    pub username: String,
    pub store: PeerStoreHandle,
    pub connections: Arc<ConnectionManager<PeerStoreHandle>>,
    pub db: Arc<Mutex<Connection>>,
}

/// Dispatch one request.
pub async fn dispatch(state: &RpcState, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "identity.get" => RpcResponse::success(
            id,
            serde_json::json!({
                "stable_id": state.stable_id.to_hex(),
                "tag": state.stable_id.tag(),
                "username": state.username,
                "mnemonic": state.stable_id.to_mnemonic(),
                "display": zajel_types::identity::display_identity(
                    &state.username,
                    &state.stable_id,
                ),
            }),
        ),

        "peers.list" => match state.store.list_peers().await {
            Ok(peers) => RpcResponse::success(
                id,
                serde_json::json!({ "peers": peers }),
            ),
            Err(e) => RpcResponse::failure(id, RpcError::internal(&e.to_string())),
        },

        "peers.acknowledge_key_change" => {
            let Some(stable_hex) = request.params.get("stable_id").and_then(|v| v.as_str())
            else {
                return RpcResponse::failure(id, RpcError::invalid_params("stable_id"));
            };
            let stable_id = match StableId::from_hex(stable_hex) {
                Ok(stable_id) => stable_id,
                Err(e) => {
                    return RpcResponse::failure(id, RpcError::invalid_params(&e.to_string()))
                }
            };
            match state.store.acknowledge_key_change(stable_id).await {
                Ok(()) => RpcResponse::success(id, serde_json::json!({"status": "ok"})),
                Err(e) => RpcResponse::failure(id, RpcError::internal(&e.to_string())),
            }
        }

        "messages.send" => {
            let Some(stable_hex) = request.params.get("stable_id").and_then(|v| v.as_str())
            else {
                return RpcResponse::failure(id, RpcError::invalid_params("stable_id"));
            };
            let stable_id = match StableId::from_hex(stable_hex) {
                Ok(stable_id) => stable_id,
                Err(e) => {
                    return RpcResponse::failure(id, RpcError::invalid_params(&e.to_string()))
                }
            };
            let Some(body) = request.params.get("body").and_then(|v| v.as_str()) else {
                return RpcResponse::failure(id, RpcError::invalid_params("body"));
            };
            if body.is_empty() {
                return RpcResponse::failure(id, RpcError::invalid_params("body must not be empty"));
            }

            match state.connections.send_message(stable_id, body.as_bytes()).await {
                Ok(()) => {
                    // Sent over the wire; persist our device-local copy.
                    let message_id = {
                        let db = state.db.lock().await;
                        match messages::append(
                            &db,
                            &stable_id.to_hex(),
                            "out",
                            "text",
                            body,
                            unix_now(),
                        ) {
                            Ok(message_id) => message_id,
                            Err(e) => {
                                return RpcResponse::failure(
                                    id,
                                    RpcError::internal(&e.to_string()),
                                )
                            }
                        }
                    };
                    RpcResponse::success(
                        id,
                        serde_json::json!({"status": "ok", "message_id": message_id}),
                    )
                }
                Err(ConnectionError::NotConnected(peer)) => {
                    RpcResponse::failure(id, RpcError::not_connected(&peer))
                }
                Err(e) => RpcResponse::failure(id, RpcError::internal(&e.to_string())),
            }
        }

        "messages.list" => {
            let Some(stable_hex) = request.params.get("stable_id").and_then(|v| v.as_str())
            else {
                return RpcResponse::failure(id, RpcError::invalid_params("stable_id"));
            };
            let stable_id = match StableId::from_hex(stable_hex) {
                Ok(stable_id) => stable_id,
                Err(e) => {
                    return RpcResponse::failure(id, RpcError::invalid_params(&e.to_string()))
                }
            };
            let db = state.db.lock().await;
            match messages::list_for_peer(&db, &stable_id.to_hex()) {
                Ok(rows) => RpcResponse::success(id, serde_json::json!({ "messages": rows })),
                Err(e) => RpcResponse::failure(id, RpcError::internal(&e.to_string())),
            }
        }

        "channel.create" => {
            let name = request
                .params
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if name.is_empty() {
                return RpcResponse::failure(id, RpcError::invalid_params("name"));
            }
            let description = request
                .params
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let channel = match create_channel(name, description, ChannelRules::default()) {
                Ok(channel) => channel,
                Err(e) => return RpcResponse::failure(id, RpcError::internal(&e.to_string())),
            };
            let invite = match zajel_channel::invite::create_invite(&channel) {
                Ok(invite) => invite,
                Err(e) => return RpcResponse::failure(id, RpcError::internal(&e.to_string())),
            };

            // The manifest row is ours; private keys go back to the
            // caller for secure storage.
            let row = Channel {
                id: channel.manifest.channel_id.clone(),
                role: ChannelRole::Owner,
                manifest: channel.manifest.clone(),
                created_at: unix_now(),
            };
            {
                let db = state.db.lock().await;
                if let Err(e) = channels::upsert(&db, &row) {
                    return RpcResponse::failure(id, RpcError::internal(&e.to_string()));
                }
            }

            RpcResponse::success(
                id,
                serde_json::json!({
                    "channel_id": channel.manifest.channel_id,
                    "manifest": channel.manifest,
                    "invite": invite,
                    "owner_signing_key_hex": hex::encode(channel.owner_signing.to_bytes()),
                    "encryption_key_hex": hex::encode(channel.encryption_secret.to_bytes()),
                }),
            )
        }

        "channel.subscribe" => {
            let Some(link) = request.params.get("invite").and_then(|v| v.as_str()) else {
                return RpcResponse::failure(id, RpcError::invalid_params("invite"));
            };
            let subscribed = match subscribe(link) {
                Ok(subscribed) => subscribed,
                Err(e) => {
                    return RpcResponse::failure(id, RpcError::invalid_params(&e.to_string()))
                }
            };

            let row = Channel {
                id: subscribed.manifest.channel_id.clone(),
                role: ChannelRole::Subscriber,
                manifest: subscribed.manifest.clone(),
                created_at: unix_now(),
            };
            {
                let db = state.db.lock().await;
                if let Err(e) = channels::upsert(&db, &row) {
                    return RpcResponse::failure(id, RpcError::internal(&e.to_string()));
                }
            }

            RpcResponse::success(
                id,
                serde_json::json!({
                    "channel_id": subscribed.manifest.channel_id,
                    "manifest": subscribed.manifest,
                    "pinned_owner_key": subscribed.pinned_owner_key,
                    "encryption_key_hex": hex::encode(subscribed.encryption_secret.to_bytes()),
                }),
            )
        }

        "channels.list" => {
            let db = state.db.lock().await;
            match channels::list(&db) {
                Ok(list) => RpcResponse::success(id, serde_json::json!({ "channels": list })),
                Err(e) => RpcResponse::failure(id, RpcError::internal(&e.to_string())),
            }
        }

        "safety.number" => {
            let key = |field: &str| -> Option<[u8; 32]> {
                let hex_str = request.params.get(field)?.as_str()?;
                hex::decode(hex_str).ok()?.try_into().ok()
            };
            match (key("key_a"), key("key_b")) {
                (Some(a), Some(b)) => RpcResponse::success(
                    id,
                    serde_json::json!({"safety_number": compute_safety_number(&a, &b)}),
                ),
                _ => RpcResponse::failure(id, RpcError::invalid_params("key_a/key_b")),
            }
        }

        other => RpcResponse::failure(id, RpcError::method_not_found(other)),
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<RpcState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a server.
    pub fn new(state: Arc<RpcState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Accept and serve connections until the listener fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = ?self.socket_path, "RPC listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();

                while let Ok(Some(line)) = lines.next_line().await {
                    let response = match serde_json::from_str::<RpcRequest>(&line) {
                        Ok(request) => dispatch(&state, request).await,
                        Err(_) => {
                            RpcResponse::failure(serde_json::Value::Null, RpcError::parse_error())
                        }
                    };
                    let Ok(mut body) = serde_json::to_vec(&response) else {
                        warn!("failed to serialize RPC response");
                        continue;
                    };
                    body.push(b'\n');
                    if write_half.write_all(&body).await.is_err() {
                        break;
                    }
                }
            });
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zajel_crypto::x25519::X25519StaticSecret;

    fn state() -> RpcState {
        let actor_conn = zajel_db::open_memory().expect("db");
        let shared_conn = zajel_db::open_memory().expect("db");
        let store = PeerStoreHandle::spawn(actor_conn);
        let stable_id = StableId::from_bytes([0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6, 0x07, 0x18]);
        let (connections, _streams) = ConnectionManager::new(
            X25519StaticSecret::random(),
            stable_id,
            "alice".into(),
            store.clone(),
        );
        RpcState {
            stable_id,
            username: "alice".into(),
            store,
            connections: Arc::new(connections),
            db: Arc::new(Mutex::new(shared_conn)),
        }
    }

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".into(),
            id: serde_json::json!(1),
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn test_identity_get() {
        let state = state();
        let response = dispatch(&state, request("identity.get", serde_json::json!({}))).await;
        let result = response.result.expect("result");
        assert_eq!(result["stable_id"], "a1b2c3d4e5f60718");
        assert_eq!(result["display"], "alice#A1B2");
        assert_eq!(
            result["mnemonic"].as_str().expect("mnemonic").split(' ').count(),
            6
        );
    }

    #[tokio::test]
    async fn test_channel_create_and_list() {
        let state = state();
        let response = dispatch(
            &state,
            request("channel.create", serde_json::json!({"name": "news"})),
        )
        .await;
        let result = response.result.expect("result");
        assert!(result["invite"]
            .as_str()
            .expect("invite")
            .starts_with("zajel://channel/"));
        assert_eq!(result["owner_signing_key_hex"].as_str().expect("key").len(), 64);

        let listed = dispatch(&state, request("channels.list", serde_json::json!({}))).await;
        let channels = listed.result.expect("result");
        assert_eq!(channels["channels"].as_array().expect("array").len(), 1);
    }

    #[tokio::test]
    async fn test_channel_subscribe_roundtrip() {
        let state = state();
        let created = dispatch(
            &state,
            request("channel.create", serde_json::json!({"name": "news"})),
        )
        .await;
        let invite = created.result.expect("result")["invite"]
            .as_str()
            .expect("invite")
            .to_string();

        let subscribed = dispatch(
            &state,
            request("channel.subscribe", serde_json::json!({"invite": invite})),
        )
        .await;
        let result = subscribed.result.expect("result");
        assert!(!result["pinned_owner_key"].as_str().expect("pin").is_empty());
    }

    #[tokio::test]
    async fn test_channel_create_requires_name() {
        let state = state();
        let response = dispatch(
            &state,
            request("channel.create", serde_json::json!({})),
        )
        .await;
        assert_eq!(response.error.expect("error").code, -32602);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let state = state();
        let response = dispatch(&state, request("nope.nothing", serde_json::json!({}))).await;
        assert_eq!(response.error.expect("error").code, -32601);
    }

    #[tokio::test]
    async fn test_messages_send_receive_persist_roundtrip() {
        let state = state();

        // Bob: a full peer with his own manager and typed streams.
        let bob_store = PeerStoreHandle::spawn(zajel_db::open_memory().expect("db"));
        let bob_id = StableId::from_bytes([0xB0; 8]);
        let (bob_mgr, mut bob_streams) = ConnectionManager::new(
            X25519StaticSecret::random(),
            bob_id,
            "bob".into(),
            bob_store,
        );

        // Data channel between the two devices.
        let (alice_end, bob_end) = zajel_relay::transport::memory_pair();
        state.connections.add_connection("conn-bob").await.expect("add");
        state
            .connections
            .attach_channel("conn-bob", alice_end)
            .await
            .expect("attach");
        bob_mgr.add_connection("conn-alice").await.expect("add");

        // Crossed handshakes establish the session on both sides.
        let alice_hello = state.connections.own_handshake().to_json().expect("json");
        let bob_hello = bob_mgr.own_handshake().to_json().expect("json");
        state
            .connections
            .process_handshake("conn-bob", &bob_hello, 1000)
            .await
            .expect("alice handshake");
        bob_mgr
            .process_handshake("conn-alice", &alice_hello, 1000)
            .await
            .expect("bob handshake");

        // Send through the RPC surface.
        let response = dispatch(
            &state,
            request(
                "messages.send",
                serde_json::json!({"stable_id": bob_id.to_hex(), "body": "hi bob"}),
            ),
        )
        .await;
        let result = response.result.expect("result");
        assert_eq!(result["status"], "ok");
        assert!(result["message_id"].as_i64().expect("id") > 0);

        // Bob's transport delivers the frame; his manager decrypts and
        // routes it into the 1:1 chat stream.
        let frame = {
            use zajel_relay::transport::DataChannel;
            bob_end.recv().await.expect("frame")
        };
        bob_mgr
            .handle_inbound("conn-alice", &frame)
            .await
            .expect("inbound");
        let inbound = bob_streams.peer_messages.try_recv().expect("routed");
        assert_eq!(inbound.body, "hi bob");

        // Alice's device-local history holds the outbound copy.
        let listed = dispatch(
            &state,
            request(
                "messages.list",
                serde_json::json!({"stable_id": bob_id.to_hex()}),
            ),
        )
        .await;
        let rows = listed.result.expect("result")["messages"]
            .as_array()
            .expect("array")
            .clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["direction"], "out");
        assert_eq!(rows[0]["kind"], "text");
        assert_eq!(rows[0]["body"], "hi bob");
    }

    #[tokio::test]
    async fn test_messages_send_to_unconnected_peer_fails() {
        let state = state();
        let response = dispatch(
            &state,
            request(
                "messages.send",
                serde_json::json!({"stable_id": "00000000000000ff", "body": "hello?"}),
            ),
        )
        .await;
        assert_eq!(response.error.expect("error").code, -32000);

        // Nothing was persisted for the failed send.
        let listed = dispatch(
            &state,
            request(
                "messages.list",
                serde_json::json!({"stable_id": "00000000000000ff"}),
            ),
        )
        .await;
        assert!(listed.result.expect("result")["messages"]
            .as_array()
            .expect("array")
            .is_empty());
    }

    #[tokio::test]
    async fn test_messages_send_validates_params() {
        let state = state();

        let missing_body = dispatch(
            &state,
            request(
                "messages.send",
                serde_json::json!({"stable_id": "00000000000000ff"}),
            ),
        )
        .await;
        assert_eq!(missing_body.error.expect("error").code, -32602);

        let bad_id = dispatch(
            &state,
            request(
                "messages.send",
                serde_json::json!({"stable_id": "nothex", "body": "x"}),
            ),
        )
        .await;
        assert_eq!(bad_id.error.expect("error").code, -32602);
    }

    #[tokio::test]
    async fn test_safety_number() {
        let state = state();
        let response = dispatch(
            &state,
            request(
                "safety.number",
                serde_json::json!({
                    "key_a": "11".repeat(32),
                    "key_b": "22".repeat(32),
                }),
            ),
        )
        .await;
        let number = response.result.expect("result")["safety_number"]
            .as_str()
            .expect("number")
            .to_string();
        assert_eq!(number.len(), 60);

        // Order-independent.
        let reversed = dispatch(
            &state,
            request(
                "safety.number",
                serde_json::json!({
                    "key_a": "22".repeat(32),
                    "key_b": "11".repeat(32),
                }),
            ),
        )
        .await;
        assert_eq!(
            reversed.result.expect("result")["safety_number"]
                .as_str()
                .expect("number"),
            number
        );
    }
}

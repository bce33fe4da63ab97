//! The bootstrap registry: signed server discovery over REST.
//!
//! `GET /servers` returns the registered signaling servers signed with the
//! bootstrap key. Registration and unregistration take the server id from
//! the path; an empty id is an explicit 400, not a silent no-match —
//! naive suffix splitting has historically turned `POST /servers/` into a
//! registration named `""`.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use zajel_crypto::ed25519::SigningKey;
use zajel_types::bootstrap::{signable_bytes, ServerEntry, SignedServerList};

use crate::{Result, ServerError};

/// The bootstrap registry state.
pub struct BootstrapRegistry {
    servers: Mutex<HashMap<String, ServerEntry>>,
    signing: SigningKey,
}

impl BootstrapRegistry {
    /// Create a registry signing with the given key.
    pub fn new(signing: SigningKey) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            signing,
        }
    }

    /// The public key clients pin, hex-encoded.
    pub fn public_key_hex(&self) -> String {
        self.signing.verifying_key().to_hex()
    }

    /// Register or refresh a server.
    pub fn register(&self, entry: ServerEntry) -> Result<()> {
        entry
            .validate()
            .map_err(|e| ServerError::Validation(e.to_string()))?;
        info!(id = %entry.id, endpoint = %entry.endpoint, "server registered");
        self.servers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(entry.id.clone(), entry);
        Ok(())
    }

    /// Unregister a server by id.
    pub fn unregister(&self, id: &str) -> Result<()> {
        let removed = self
            .servers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
        match removed {
            Some(_) => Ok(()),
            None => Err(ServerError::NotFound(format!("server {id}"))),
        }
    }

    /// The signed list response.
    pub fn signed_list(&self) -> Result<SignedServerList> {
        let mut servers: Vec<ServerEntry> = self
            .servers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));

        let signable =
            signable_bytes(&servers).map_err(|e| ServerError::Serialization(e.to_string()))?;
        let signature = self.signing.sign(&signable).to_hex();
        Ok(SignedServerList { servers, signature })
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.servers.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub endpoint: String,
    pub public_key: String,
    #[serde(default)]
    pub region: String,
}

/// Build the REST router for the bootstrap registry.
pub fn router(registry: Arc<BootstrapRegistry>) -> Router {
    Router::new()
        .route("/servers", get(list_servers))
        // Explicit 400 for the empty-id forms.
        .route("/servers/", post(missing_id).delete(missing_id))
        .route(
            "/servers/:id",
            post(register_server).delete(unregister_server),
        )
        .with_state(registry)
}

async fn list_servers(State(registry): State<Arc<BootstrapRegistry>>) -> impl IntoResponse {
    match registry.signed_list() {
        Ok(list) => (StatusCode::OK, Json(serde_json::json!(list))),
        Err(e) => {
            warn!(error = %e, "failed to build signed server list");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal"})),
            )
        }
    }
}

async fn register_server(
    State(registry): State<Arc<BootstrapRegistry>>,
    Path(id): Path<String>,
    Json(body): Json<RegisterBody>,
) -> impl IntoResponse {
    let entry = ServerEntry {
        id: id.trim().to_string(),
        endpoint: body.endpoint,
        public_key: body.public_key,
        region: body.region,
        last_heartbeat: unix_now(),
    };
    if entry.id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "server id must not be empty");
    }
    match registry.register(entry) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn unregister_server(
    State(registry): State<Arc<BootstrapRegistry>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "server id must not be empty");
    }
    match registry.unregister(id.trim()) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(ServerError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, "unknown server"),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn missing_id() -> impl IntoResponse {
    error_response(StatusCode::BAD_REQUEST, "server id must not be empty")
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({"error": message})))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//! zajel-daemon: the client-side network daemon.
//!
//! Single OS process on a Tokio runtime: loads the device identity,
//! discovers signaling servers through the signed bootstrap list,
//! registers with one, and runs the rendezvous, connection, and chunk
//! sync services until shutdown.

mod bootstrap;
mod config;
mod events;
mod identity;
mod inbox;
mod rpc;
mod signaling;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use zajel_connection::manager::ConnectionManager;
use zajel_crypto::ed25519::VerifyingKey;
use zajel_db::actor::PeerStoreHandle;
use zajel_db::queries::settings;
use zajel_rendezvous::service::{LocalConnectionInfo, RendezvousService};
use zajel_sync::service::{ChunkSyncService, FOREGROUND_ANNOUNCE_INTERVAL};
use zajel_types::signaling::{Register, SignalMessage, UpdateLoad};

use crate::config::DaemonConfig;
use crate::events::EventBus;
use crate::signaling::SignalingClient;

/// How often the rendezvous registrations are refreshed.
const RENDEZVOUS_REFRESH_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// How often the relay load is reported.
const LOAD_REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zajel=info".parse()?),
        )
        .init();

    info!("Zajel daemon starting");

    // 1. Config and data directory.
    let config = DaemonConfig::load()?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Database: one connection for the store actor, one shared for the
    // sync service and settings.
    let db_path = data_dir.join("zajel.db");
    let actor_conn = zajel_db::open(&db_path)?;
    let shared_conn = Arc::new(Mutex::new(zajel_db::open(&db_path)?));

    // 3. Identity (hard-fails when a wrapped key has no passphrase).
    let passphrase = std::env::var("ZAJEL_PASSPHRASE").ok();
    let device = {
        let conn = shared_conn.lock().await;
        identity::load_or_generate(&conn, passphrase.as_deref())?
    };
    let username = if config.identity.username.is_empty() {
        let conn = shared_conn.lock().await;
        settings::get_or(&conn, "username", "anonymous")
    } else {
        config.identity.username.clone()
    };
    info!(identity = %zajel_types::identity::display_identity(&username, &device.stable_id), "identity loaded");

    // 4. Persistent source id.
    let source_id = {
        let conn = shared_conn.lock().await;
        let existing = settings::get_or(&conn, "source_id", "");
        if existing.is_empty() {
            let fresh = zajel_relay::generate_source_id();
            settings::set(&conn, "source_id", &fresh)?;
            fresh
        } else {
            existing
        }
    };

    // 5. Bootstrap discovery against the pinned key.
    if config.network.bootstrap_public_key_hex.is_empty() {
        anyhow::bail!("bootstrap public key is not configured; refusing to start");
    }
    let pinned = VerifyingKey::from_hex(&config.network.bootstrap_public_key_hex)?;
    let http = reqwest::Client::new();
    let servers =
        bootstrap::discover_servers(&http, &config.network.bootstrap_url, &pinned).await;
    let server = servers
        .first()
        .ok_or_else(|| anyhow::anyhow!("no signaling servers discovered"))?;
    info!(endpoint = %server.endpoint, region = %server.region, "using signaling server");

    // 6. Signaling connection + registration.
    let (signaling, mut pushes) = SignalingClient::connect(&server.endpoint).await?;
    signaling
        .send(SignalMessage::Register(Register {
            peer_id: device.stable_id.to_hex(),
            public_key: {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .encode(device.secret.public_key().to_bytes())
            },
            max_connections: config.network.max_connections,
        }))
        .map_err(|e| anyhow::anyhow!(e))?;

    // 7. Services.
    let event_bus = EventBus::new(1000);
    let store = PeerStoreHandle::spawn(actor_conn);
    let (connections, typed_streams) = ConnectionManager::new(
        device.secret.clone(),
        device.stable_id,
        username.clone(),
        store.clone(),
    );
    let connections = Arc::new(connections);

    let rendezvous = Arc::new(RendezvousService::new(
        signaling.clone(),
        device.secret.clone(),
        device.stable_id,
        LocalConnectionInfo {
            relay_id: server.id.clone(),
            source_id: source_id.clone(),
            ip: None,
            port: None,
            fallback_relays: Vec::new(),
        },
    ));

    let sync = Arc::new(ChunkSyncService::new(
        signaling.clone(),
        device.stable_id.to_hex(),
        Arc::clone(&shared_conn),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // 8. Inbound-stream consumer: persists 1:1 chat, surfaces the rest.
    inbox::Inbox::new(
        Arc::clone(&connections),
        Arc::clone(&shared_conn),
        event_bus.clone(),
    )
    .spawn(typed_streams, shutdown_tx.subscribe());

    // 9. Server push dispatcher.
    {
        let sync = Arc::clone(&sync);
        let event_bus = event_bus.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    push = pushes.recv() => {
                        let Some(message) = push else { break };
                        match message {
                            SignalMessage::RendezvousMatch(matched) => {
                                event_bus.emit(
                                    "PeerFound",
                                    serde_json::json!({
                                        "peer_id": matched.matched.peer_id,
                                        "relay_id": matched.matched.relay_id,
                                        "live": true,
                                    }),
                                );
                            }
                            chunk_message => {
                                if let Err(e) = sync.handle_server_message(chunk_message).await {
                                    warn!(error = %e, "sync message failed");
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    // 10. Rendezvous refresh loop.
    {
        let rendezvous = Arc::clone(&rendezvous);
        let store = store.clone();
        let event_bus = event_bus.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RENDEZVOUS_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let peers = match store.list_peers().await {
                            Ok(peers) => peers,
                            Err(e) => {
                                warn!(error = %e, "cannot list peers for rendezvous");
                                continue;
                            }
                        };
                        let unblocked: Vec<_> =
                            peers.into_iter().filter(|p| !p.is_blocked()).collect();
                        let registrations =
                            rendezvous.register_for_peers(&unblocked, Utc::now()).await;
                        for registration in &registrations {
                            if !registration.actions.is_empty() {
                                event_bus.emit(
                                    "PeerFound",
                                    serde_json::json!({
                                        "peer_id": registration.peer_id.to_hex(),
                                        "actions": registration.actions.len(),
                                        "live": false,
                                    }),
                                );
                            }
                        }
                    }
                }
            }
        });
    }

    // 11. Chunk announce loop (foreground cadence).
    {
        let sync = Arc::clone(&sync);
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FOREGROUND_ANNOUNCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = sync.announce_all().await {
                            warn!(error = %e, "chunk announce failed");
                        }
                    }
                }
            }
        });
    }

    // 12. Load report loop.
    {
        let signaling = signaling.clone();
        let connections = Arc::clone(&connections);
        let peer_id = device.stable_id.to_hex();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LOAD_REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        // Report connection count as relay load.
                        let count = if connections.is_disposed() { 0 } else { 1 };
                        let _ = signaling.send(SignalMessage::UpdateLoad(UpdateLoad {
                            peer_id: peer_id.clone(),
                            connected_count: count,
                        }));
                    }
                }
            }
        });
    }

    // 13. RPC server for the platform UI.
    let rpc_state = Arc::new(rpc::RpcState {
        stable_id: device.stable_id,
        username: username.clone(),
        store: store.clone(),
        connections: Arc::clone(&connections),
        db: Arc::clone(&shared_conn),
    });
    let rpc_server = rpc::RpcServer::new(rpc_state, data_dir.join("daemon.sock"));
    {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {}
                result = rpc_server.run() => {
                    if let Err(e) = result {
                        warn!(error = %e, "RPC server stopped");
                    }
                }
            }
        });
    }

    event_bus.emit(
        "DaemonStarted",
        serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
    );

    // 14. Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(());
    connections.dispose();

    Ok(())
}

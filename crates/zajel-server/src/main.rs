//! zajel-server: the signaling, rendezvous, and chunk relay server.
//!
//! Single OS process on a Tokio runtime serving the bootstrap REST
//! registry, the signaling WebSocket, and a health endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use zajel_crypto::ed25519::SigningKey;
use zajel_server::bootstrap::BootstrapRegistry;
use zajel_server::chunk_relay::ChunkRelay;
use zajel_server::config::ServerConfig;
use zajel_server::relay_registry::RelayRegistry;
use zajel_server::rendezvous_registry::RendezvousRegistry;
use zajel_server::ws::{router, AppState};

/// How often the eviction and rendezvous cleanup pass runs.
const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zajel=info".parse()?),
        )
        .init();

    info!("Zajel server starting");

    let config = ServerConfig::load()?;

    // Missing keys hard-fail; a malformed configured key must never
    // silently fall back to a generated one.
    let signing = if config.bootstrap.signing_key_hex.is_empty() {
        warn!("no bootstrap signing key configured; generating an ephemeral one (dev only)");
        SigningKey::generate()
    } else {
        let bytes: [u8; 32] = hex::decode(&config.bootstrap.signing_key_hex)?
            .try_into()
            .map_err(|_| anyhow::anyhow!("bootstrap signing key must be 32 bytes of hex"))?;
        SigningKey::from_bytes(&bytes)
    };

    let db = if config.network.db_path.is_empty() {
        zajel_db::open_memory()?
    } else {
        zajel_db::open(std::path::Path::new(&config.network.db_path))?
    };

    let bootstrap = Arc::new(BootstrapRegistry::new(signing));
    info!(public_key = %bootstrap.public_key_hex(), "bootstrap signing key");

    let state = Arc::new(AppState {
        chunk_relay: Arc::new(ChunkRelay::new(db, config.relay.cache_budget_bytes)),
        bootstrap,
        relay_registry: Arc::new(RelayRegistry::new()),
        rendezvous: Mutex::new(RendezvousRegistry::new()),
        peers: Mutex::new(HashMap::new()),
        started_at: unix_now(),
        config,
    });

    // Periodic maintenance: cache eviction + rendezvous cleanup.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                let now = unix_now();
                match state
                    .chunk_relay
                    .evict(state.config.relay.chunk_ttl_secs, now)
                {
                    Ok((expired, lru)) if expired + lru > 0 => {
                        info!(expired, lru, "cache eviction pass");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "eviction pass failed"),
                }
                let removed = state.rendezvous.lock().await.cleanup(now);
                if removed > 0 {
                    info!(removed, "rendezvous cleanup pass");
                }
            }
        });
    }

    let listen_addr: std::net::SocketAddr = state.config.network.listen_addr.parse()?;
    info!(%listen_addr, "listening");

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//! Drains the typed inbound streams.
//!
//! The connection manager guarantees at-least-once delivery into its
//! per-type channels, which means something must always be polling them.
//! This task is that consumer: 1:1 chat messages are persisted to the
//! device-local messages table and surfaced on the event bus; group
//! traffic is surfaced to subscribers; the future and legacy streams are
//! drained so nothing buffers without bound.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use rusqlite::Connection;
use zajel_connection::manager::ConnectionManager;
use zajel_connection::streams::{Inbound, TypedReceivers};
use zajel_db::actor::PeerStoreHandle;
use zajel_db::queries::messages;

use crate::events::EventBus;

/// The inbound-stream consumer.
pub struct Inbox {
    connections: Arc<ConnectionManager<PeerStoreHandle>>,
    db: Arc<Mutex<Connection>>,
    event_bus: EventBus,
}

impl Inbox {
    /// Create an inbox over the daemon's shared state.
    pub fn new(
        connections: Arc<ConnectionManager<PeerStoreHandle>>,
        db: Arc<Mutex<Connection>>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            connections,
            db,
            event_bus,
        }
    }

    /// Spawn the drain task. It runs until shutdown fires or the
    /// connection manager is disposed (all stream senders dropped).
    pub fn spawn(
        self,
        mut streams: TypedReceivers,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    message = streams.peer_messages.recv() => match message {
                        Some(inbound) => self.on_peer_message(inbound).await,
                        None => break,
                    },
                    message = streams.group_invitations.recv() => match message {
                        Some(inbound) => self.emit_group("GroupInvitation", &inbound),
                        None => break,
                    },
                    message = streams.group_data.recv() => match message {
                        Some(inbound) => self.emit_group("GroupData", &inbound),
                        None => break,
                    },
                    message = streams.linked_device.recv() => match message {
                        Some(inbound) => {
                            debug!(peer = %inbound.peer_id, "linked-device frame (no handler wired)");
                        }
                        None => break,
                    },
                    // Future streams and the deprecated mirror: drained,
                    // not delivered.
                    message = streams.typing.recv() => if message.is_none() { break },
                    message = streams.receipts.recv() => if message.is_none() { break },
                    message = streams.messages.recv() => if message.is_none() { break },
                }
            }
        })
    }

    /// Persist a 1:1 chat message and surface it to the UI.
    async fn on_peer_message(&self, inbound: Inbound) {
        let Some(stable_id) = self.connections.stable_id_for(&inbound.peer_id).await else {
            warn!(peer = %inbound.peer_id, "inbound message from unresolved connection; dropping");
            return;
        };

        {
            let db = self.db.lock().await;
            if let Err(e) = messages::append(
                &db,
                &stable_id.to_hex(),
                "in",
                "text",
                &inbound.body,
                unix_now(),
            ) {
                warn!(peer = %stable_id, error = %e, "failed to persist inbound message");
            }
        }

        self.event_bus.emit(
            "MessageReceived",
            serde_json::json!({
                "peer_id": stable_id.to_hex(),
                "body": inbound.body,
            }),
        );
    }

    fn emit_group(&self, event_type: &str, inbound: &Inbound) {
        self.event_bus.emit(
            event_type,
            serde_json::json!({
                "peer_id": inbound.peer_id,
                "body": inbound.body,
            }),
        );
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//! The relay client: a small pool of persistent control connections.
//!
//! Connection ordering is the critical part of the handshake: the data
//! channel must report open *before* the client emits
//! [`RelayConnectionState::Connected`] and *before* the
//! `relay_handshake` frame goes out. Sending into a half-open channel
//! loses the handshake silently and the relay never learns our source id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use zajel_types::signaling::RelayInfo;

use crate::transport::{ChannelFactory, DataChannel};
use crate::wire::RelayFrame;
use crate::{RelayError, Result};

/// Default maximum concurrent relay connections.
pub const MAX_RELAY_CONNECTIONS: usize = 10;

/// Load delta that triggers an immediate report.
pub const AUTO_REPORT_THRESHOLD: u32 = 5;

/// Periodic load report interval.
pub const LOAD_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Data-channel open timeout.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// State transitions of one relay connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayConnectionState {
    Connecting { relay_id: String },
    Connected { relay_id: String },
    Failed { relay_id: String },
    Disconnected { relay_id: String },
}

/// An established relay connection.
#[derive(Clone, Debug)]
pub struct RelayConnection {
    pub peer_id: String,
    pub public_key: String,
    pub connected_at: u64,
}

struct RelayLink {
    info: RelayConnection,
    channel: Arc<dyn DataChannel>,
}

/// Client-side relay pool.
pub struct RelayClient<F> {
    factory: F,
    source_id: String,
    max_connections: usize,
    connections: Mutex<HashMap<String, RelayLink>>,
    local_load: AtomicU32,
    last_reported_load: AtomicU32,
    state_tx: mpsc::UnboundedSender<RelayConnectionState>,
}

impl<F: ChannelFactory> RelayClient<F> {
    /// Create a client with the default connection cap.
    ///
    /// Returns the client and the single-consumer state stream.
    pub fn new(
        factory: F,
        source_id: String,
    ) -> (Self, mpsc::UnboundedReceiver<RelayConnectionState>) {
        Self::with_limit(factory, source_id, MAX_RELAY_CONNECTIONS)
    }

    /// Create a client with an explicit connection cap.
    pub fn with_limit(
        factory: F,
        source_id: String,
        max_connections: usize,
    ) -> (Self, mpsc::UnboundedReceiver<RelayConnectionState>) {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                source_id,
                max_connections,
                connections: Mutex::new(HashMap::new()),
                local_load: AtomicU32::new(0),
                last_reported_load: AtomicU32::new(0),
                state_tx,
            },
            state_rx,
        )
    }

    /// Our persistent source id.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Currently connected relay ids.
    pub async fn connected_relays(&self) -> Vec<String> {
        self.connections.lock().await.keys().cloned().collect()
    }

    /// Connect to a list of relay candidates, best-effort.
    ///
    /// Already-connected relays are skipped, the pool cap is respected,
    /// and a failure on one relay never aborts the rest.
    pub async fn connect_to_relays(&self, relays: &[RelayInfo], now: u64) -> usize {
        let mut connected = 0usize;
        for relay in relays {
            {
                let pool = self.connections.lock().await;
                if pool.contains_key(&relay.peer_id) {
                    continue;
                }
                if pool.len() >= self.max_connections {
                    debug!(limit = self.max_connections, "relay pool full");
                    break;
                }
            }
            match self.connect_one(relay, now).await {
                Ok(()) => connected += 1,
                Err(e) => {
                    warn!(relay = %relay.peer_id, error = %e, "relay connect failed");
                    let _ = self.state_tx.send(RelayConnectionState::Failed {
                        relay_id: relay.peer_id.clone(),
                    });
                }
            }
        }
        connected
    }

    async fn connect_one(&self, relay: &RelayInfo, now: u64) -> Result<()> {
        let _ = self.state_tx.send(RelayConnectionState::Connecting {
            relay_id: relay.peer_id.clone(),
        });

        let channel = self.factory.open_channel(&relay.peer_id).await?;

        // Open must complete before the handshake or the Connected event.
        tokio::time::timeout(OPEN_TIMEOUT, channel.wait_open())
            .await
            .map_err(|_| RelayError::OpenTimeout)??;

        let _ = self.state_tx.send(RelayConnectionState::Connected {
            relay_id: relay.peer_id.clone(),
        });

        let handshake = RelayFrame::RelayHandshake {
            source_id: self.source_id.clone(),
        };
        channel.send(handshake.to_bytes()?).await?;

        info!(relay = %relay.peer_id, "relay connected");
        self.connections.lock().await.insert(
            relay.peer_id.clone(),
            RelayLink {
                info: RelayConnection {
                    peer_id: relay.peer_id.clone(),
                    public_key: relay.public_key.clone(),
                    connected_at: now,
                },
                channel,
            },
        );
        Ok(())
    }

    /// Drop a relay connection.
    pub async fn disconnect(&self, relay_id: &str) {
        if let Some(link) = self.connections.lock().await.remove(relay_id) {
            link.channel.close();
            let _ = self.state_tx.send(RelayConnectionState::Disconnected {
                relay_id: relay_id.to_string(),
            });
        }
    }

    /// Send an introduction through a connected relay.
    pub async fn send_introduction(
        &self,
        relay_id: &str,
        target_source_id: &str,
        encrypted_payload: Vec<u8>,
    ) -> Result<()> {
        let pool = self.connections.lock().await;
        let link = pool
            .get(relay_id)
            .ok_or_else(|| RelayError::RelayNotConnected(relay_id.to_string()))?;

        let frame = RelayFrame::Introduction {
            target_source_id: target_source_id.to_string(),
            payload: encrypted_payload,
        };
        link.channel.send(frame.to_bytes()?).await
    }

    /// Update the local connection count.
    ///
    /// Returns `true` when the delta since the last report crossed the
    /// auto-report threshold; the caller then pushes `update_load` to the
    /// signaling server and calls [`Self::mark_reported`].
    pub fn update_local_load(&self, connected_count: u32) -> bool {
        self.local_load.store(connected_count, Ordering::SeqCst);
        let last = self.last_reported_load.load(Ordering::SeqCst);
        connected_count.abs_diff(last) >= AUTO_REPORT_THRESHOLD
    }

    /// Current local load.
    pub fn local_load(&self) -> u32 {
        self.local_load.load(Ordering::SeqCst)
    }

    /// Record that the current load was reported.
    pub fn mark_reported(&self) {
        self.last_reported_load
            .store(self.local_load.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Connection info for a relay, if connected.
    pub async fn connection(&self, relay_id: &str) -> Option<RelayConnection> {
        self.connections
            .lock()
            .await
            .get(relay_id)
            .map(|l| l.info.clone())
    }
}

//! The matchmaker client.
//!
//! [`RendezvousService`] derives the token set for each trusted peer,
//! seals a dead drop with our current connection info, registers the lot
//! with the signaling server, and turns the response into reconnect
//! actions. Live matches are preferred over dead drops; a dead drop
//! younger than one hour is worth a direct-IP attempt, anything older goes
//! through the relay named inside it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use zajel_crypto::kdf;
use zajel_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use zajel_types::deaddrop::DeadDropPayload;
use zajel_types::identity::StableId;
use zajel_types::peer::PeerRecord;
use zajel_types::signaling::{RegisterRendezvous, RendezvousResult};

use crate::dead_drop::{open_dead_drop, package_dead_drop};
use crate::meeting_point::{derive_daily_points, derive_hourly_tokens};
use crate::{RendezvousError, Result};

/// Transport seam to the signaling server.
#[async_trait]
pub trait Matchmaker: Send + Sync {
    /// Submit a rendezvous registration and return the server's result.
    async fn register_rendezvous(&self, registration: RegisterRendezvous)
        -> Result<RendezvousResult>;
}

/// Our own connection info, packaged into every dead drop.
#[derive(Clone, Debug)]
pub struct LocalConnectionInfo {
    /// Relay we are reachable through.
    pub relay_id: String,
    /// Our source id at that relay.
    pub source_id: String,
    /// Public IP, when known.
    pub ip: Option<String>,
    /// Public port, when known.
    pub port: Option<u16>,
    /// Additional relays to try.
    pub fallback_relays: Vec<String>,
}

/// How to reconnect to a peer, in preference order.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconnectAction {
    /// The peer is registered right now: ask the named relay for an
    /// introduction.
    IntroduceLive {
        peer_id: String,
        relay_id: String,
    },
    /// Fresh dead drop: try the enclosed IP/port directly.
    ConnectDirect { payload: DeadDropPayload },
    /// Stale dead drop: route through the relay and source id it names.
    IntroduceViaRelay { payload: DeadDropPayload },
}

/// Outcome of registering for one peer.
#[derive(Debug)]
pub struct PeerRegistration {
    /// The peer this registration targeted.
    pub peer_id: StableId,
    /// Reconnect actions, live matches first.
    pub actions: Vec<ReconnectAction>,
    /// Dead drops that failed to decrypt (stale peer key); surfaced to the
    /// UI as a stale-peer warning and retried next cycle.
    pub stale_drops: usize,
}

/// The rendezvous client service.
pub struct RendezvousService<M> {
    matchmaker: M,
    identity: X25519StaticSecret,
    self_id: StableId,
    connection_info: LocalConnectionInfo,
}

impl<M: Matchmaker> RendezvousService<M> {
    /// Create a new service around a matchmaker transport.
    pub fn new(
        matchmaker: M,
        identity: X25519StaticSecret,
        self_id: StableId,
        connection_info: LocalConnectionInfo,
    ) -> Self {
        Self {
            matchmaker,
            identity,
            self_id,
            connection_info,
        }
    }

    /// Update the connection info used in future dead drops.
    pub fn set_connection_info(&mut self, info: LocalConnectionInfo) {
        self.connection_info = info;
    }

    /// Register for every peer in the list, best-effort.
    ///
    /// A failure for one peer is logged and does not abort the others.
    pub async fn register_for_peers(
        &self,
        peers: &[PeerRecord],
        now: DateTime<Utc>,
    ) -> Vec<PeerRegistration> {
        let mut results = Vec::with_capacity(peers.len());
        for peer in peers {
            match self.register_for_peer(peer, now).await {
                Ok(registration) => results.push(registration),
                Err(e) => {
                    warn!(peer = %peer.stable_id, error = %e, "rendezvous registration failed");
                }
            }
        }
        results
    }

    /// Derive tokens for one peer, register them with a sealed dead drop,
    /// and map the result to reconnect actions.
    pub async fn register_for_peer(
        &self,
        peer: &PeerRecord,
        now: DateTime<Utc>,
    ) -> Result<PeerRegistration> {
        let peer_key_bytes = peer
            .public_key_bytes()
            .ok_or_else(|| RendezvousError::PeerNotFound(peer.stable_id.to_hex()))?;
        let peer_key = X25519PublicKey::from_bytes(peer_key_bytes);

        let daily_points = derive_daily_points(
            &self.self_id.to_bytes(),
            &peer.stable_id.to_bytes(),
            now.date_naive(),
        );

        let shared = kdf::derive_session_key(&self.identity, &peer_key)?;
        let hourly_tokens = derive_hourly_tokens(shared.as_bytes(), now);

        let drop_payload = DeadDropPayload {
            public_key: {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .encode(self.identity.public_key().to_bytes())
            },
            stable_id: self.self_id,
            relay_id: self.connection_info.relay_id.clone(),
            source_id: self.connection_info.source_id.clone(),
            ip: self.connection_info.ip.clone(),
            port: self.connection_info.port,
            fallback_relays: self.connection_info.fallback_relays.clone(),
            timestamp: now.timestamp() as u64,
        };
        let dead_drop = package_dead_drop(&drop_payload, &peer_key)?;

        let result = self
            .matchmaker
            .register_rendezvous(RegisterRendezvous {
                peer_id: self.self_id.to_hex(),
                daily_points,
                hourly_tokens,
                dead_drop,
                relay_id: self.connection_info.relay_id.clone(),
            })
            .await?;

        Ok(self.process_result(peer, result, now))
    }

    /// Turn a rendezvous result into ordered reconnect actions.
    fn process_result(
        &self,
        peer: &PeerRecord,
        result: RendezvousResult,
        now: DateTime<Utc>,
    ) -> PeerRegistration {
        let now_secs = now.timestamp() as u64;
        let mut actions = Vec::new();
        let mut stale_drops = 0usize;

        // Live matches first: the peer is online right now.
        for live in result.live_matches {
            debug!(peer = %live.peer_id, relay = %live.relay_id, "live rendezvous match");
            actions.push(ReconnectAction::IntroduceLive {
                peer_id: live.peer_id,
                relay_id: live.relay_id,
            });
        }

        for encoded in result.dead_drops {
            let payload = match open_dead_drop(&self.identity, &encoded) {
                Ok(payload) => payload,
                Err(_) => {
                    stale_drops += 1;
                    continue;
                }
            };
            if payload.is_fresh(now_secs) {
                actions.push(ReconnectAction::ConnectDirect { payload });
            } else {
                actions.push(ReconnectAction::IntroduceViaRelay { payload });
            }
        }

        PeerRegistration {
            peer_id: peer.stable_id,
            actions,
            stale_drops,
        }
    }
}

//! The connection manager.
//!
//! Owns the per-peer connection table, the per-peer session keys, and the
//! stream router. The handshake path is careful about one thing above all:
//! after any await, the connection entry may be gone (the peer can close
//! the channel mid-handshake), so completion re-checks the table and backs
//! out with a warning instead of touching state that no longer exists.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use zajel_crypto::kdf::{self, SessionKey};
use zajel_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use zajel_relay::transport::DataChannel;
use zajel_types::identity::StableId;
use zajel_types::peer::PeerRecord;

use crate::handshake::{resolve_identity, HandshakePayload};
use crate::state::PeerConnectionState;
use crate::streams::{StreamRouter, TypedReceivers};
use crate::{ConnectionError, Result};

/// System chat message appended when a peer's key rotates.
pub const KEY_ROTATION_MESSAGE: &str = "Safety number changed. Tap to verify.";

/// Storage seam for the trusted-peer store.
///
/// The production implementation is the store actor in `zajel-db`.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Look up a trusted record; `None` when the peer is unknown.
    async fn get_peer(&self, id: StableId) -> Result<Option<PeerRecord>>;
    /// Insert or replace a record.
    async fn upsert_peer(&self, record: PeerRecord) -> Result<()>;
    /// Record a key rotation on an existing record.
    async fn record_key_rotation(&self, id: StableId, new_key: String, at: u64) -> Result<()>;
    /// Append a system message to the peer's conversation.
    async fn append_system_message(&self, peer_id: String, body: String, at: u64) -> Result<()>;
}

#[async_trait]
impl PeerStore for zajel_db::actor::PeerStoreHandle {
    async fn get_peer(&self, id: StableId) -> Result<Option<PeerRecord>> {
        match zajel_db::actor::PeerStoreHandle::get_peer(self, id).await {
            Ok(record) => Ok(Some(record)),
            Err(zajel_db::DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_peer(&self, record: PeerRecord) -> Result<()> {
        Ok(zajel_db::actor::PeerStoreHandle::upsert_peer(self, record).await?)
    }

    async fn record_key_rotation(&self, id: StableId, new_key: String, at: u64) -> Result<()> {
        Ok(zajel_db::actor::PeerStoreHandle::record_key_rotation(self, id, new_key, at).await?)
    }

    async fn append_system_message(&self, peer_id: String, body: String, at: u64) -> Result<()> {
        zajel_db::actor::PeerStoreHandle::append_system_message(self, peer_id, body, at).await?;
        Ok(())
    }
}

/// One entry in the connection table.
#[derive(Clone, Debug)]
pub struct PeerConnection {
    /// Transport peer id.
    pub peer_id: String,
    /// Resolved stable id, once the handshake completed.
    pub stable_id: Option<StableId>,
    /// Current lifecycle state.
    pub state: PeerConnectionState,
}

/// Outcome of a completed handshake.
#[derive(Clone, Debug)]
pub struct HandshakeOutcome {
    pub stable_id: StableId,
    pub username: String,
    /// The peer ran a pre-stable-id build.
    pub legacy: bool,
    /// A key rotation was detected and recorded.
    pub rotated: bool,
    /// A trusted record existed (keyed by stable id, so this survives
    /// rotation).
    pub auto_accepted: bool,
}

/// The connection manager.
pub struct ConnectionManager<S> {
    identity: X25519StaticSecret,
    self_id: StableId,
    username: String,
    store: S,
    router: StreamRouter,
    connections: Mutex<HashMap<String, PeerConnection>>,
    // Transport channels live behind a sync lock so dispose can close
    // them without awaiting.
    channels: std::sync::Mutex<HashMap<String, Arc<dyn DataChannel>>>,
    sessions: Mutex<HashMap<StableId, SessionKey>>,
    legacy_logged: Mutex<HashSet<StableId>>,
    disposed: AtomicBool,
}

impl<S: PeerStore> ConnectionManager<S> {
    /// Create a manager and hand out the typed stream receivers.
    pub fn new(
        identity: X25519StaticSecret,
        self_id: StableId,
        username: String,
        store: S,
    ) -> (Self, TypedReceivers) {
        let (router, receivers) = StreamRouter::new();
        (
            Self {
                identity,
                self_id,
                username,
                store,
                router,
                connections: Mutex::new(HashMap::new()),
                channels: std::sync::Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
                legacy_logged: Mutex::new(HashSet::new()),
                disposed: AtomicBool::new(false),
            },
            receivers,
        )
    }

    /// The handshake payload this device sends after channel open.
    pub fn own_handshake(&self) -> HandshakePayload {
        use base64::Engine;
        HandshakePayload {
            public_key: base64::engine::general_purpose::STANDARD
                .encode(self.identity.public_key().to_bytes()),
            stable_id: Some(self.self_id.to_hex()),
            username: self.username.clone(),
        }
    }

    /// Register a new connection entry in `DataChannelOpening`.
    pub async fn add_connection(&self, peer_id: &str) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disposed);
        }
        self.connections.lock().await.insert(
            peer_id.to_string(),
            PeerConnection {
                peer_id: peer_id.to_string(),
                stable_id: None,
                state: PeerConnectionState::DataChannelOpening,
            },
        );
        Ok(())
    }

    /// Attach the transport data channel for a registered connection.
    ///
    /// Outbound 1:1 messages are written to this channel; the platform
    /// glue that opened it keeps feeding inbound frames to
    /// [`Self::handle_inbound`].
    pub async fn attach_channel(&self, peer_id: &str, channel: Arc<dyn DataChannel>) -> Result<()> {
        if !self.connections.lock().await.contains_key(peer_id) {
            return Err(ConnectionError::NotConnected(peer_id.to_string()));
        }
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(peer_id.to_string(), channel);
        Ok(())
    }

    /// Remove a connection (channel closed). The session key survives so
    /// a reconnect does not re-derive it.
    pub async fn remove_connection(&self, peer_id: &str) {
        self.connections.lock().await.remove(peer_id);
        let channel = self
            .channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(peer_id);
        if let Some(channel) = channel {
            channel.close();
        }
    }

    /// Resolve the stable id behind a transport peer id, once the
    /// handshake completed.
    pub async fn stable_id_for(&self, peer_id: &str) -> Option<StableId> {
        self.connections
            .lock()
            .await
            .get(peer_id)
            .and_then(|c| c.stable_id)
    }

    /// Current state of a connection, if present.
    pub async fn connection_state(&self, peer_id: &str) -> Option<PeerConnectionState> {
        self.connections.lock().await.get(peer_id).map(|c| c.state)
    }

    /// Move a connection through the state machine.
    pub async fn set_state(&self, peer_id: &str, next: PeerConnectionState) -> Result<()> {
        let mut table = self.connections.lock().await;
        let entry = table
            .get_mut(peer_id)
            .ok_or_else(|| ConnectionError::NotConnected(peer_id.to_string()))?;
        if !entry.state.can_transition(next) {
            return Err(ConnectionError::InvalidTransition(format!(
                "{:?} -> {next:?}",
                entry.state
            )));
        }
        entry.state = next;
        Ok(())
    }

    /// Process a peer's handshake frame.
    ///
    /// Aborting rules: a failure here aborts this peer only. If the
    /// connection entry disappears while the store calls are in flight,
    /// the handshake backs out with a warning.
    pub async fn process_handshake(
        &self,
        peer_id: &str,
        payload_json: &str,
        now: u64,
    ) -> Result<HandshakeOutcome> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disposed);
        }

        self.set_state(peer_id, PeerConnectionState::HandshakePending)
            .await?;

        let payload = HandshakePayload::from_json(payload_json)?;
        let resolved = resolve_identity(&payload)?;

        if resolved.legacy {
            let mut logged = self.legacy_logged.lock().await;
            if logged.insert(resolved.stable_id) {
                info!(peer = %resolved.stable_id, "legacy peer without stable id; derived from public key");
            }
        }

        // TOFU: the record is keyed by stable id, so a changed key on a
        // known peer is a rotation, not a new peer.
        let record = self.store.get_peer(resolved.stable_id).await?;
        let mut rotated = false;
        let auto_accepted = record.is_some();

        if let Some(record) = &record {
            if record.public_key != payload.public_key {
                self.store
                    .record_key_rotation(resolved.stable_id, payload.public_key.clone(), now)
                    .await?;
                self.store
                    .append_system_message(
                        resolved.stable_id.to_hex(),
                        KEY_ROTATION_MESSAGE.to_string(),
                        now,
                    )
                    .await?;
                rotated = true;
            }
        }

        // Establish the session from our static key and theirs.
        let peer_key = X25519PublicKey::from_bytes(payload.public_key_bytes()?);
        let session = kdf::derive_session_key(&self.identity, &peer_key)?;

        // Post-await existence check: the peer may have disconnected
        // while the store calls were in flight.
        {
            let mut table = self.connections.lock().await;
            let entry = match table.get_mut(peer_id) {
                Some(entry) => entry,
                None => {
                    warn!(peer = %peer_id, "connection vanished during handshake; aborting");
                    return Err(ConnectionError::PeerVanished(peer_id.to_string()));
                }
            };
            entry.stable_id = Some(resolved.stable_id);
            entry.state = PeerConnectionState::Connected;
        }

        self.sessions
            .lock()
            .await
            .insert(resolved.stable_id, session);

        Ok(HandshakeOutcome {
            stable_id: resolved.stable_id,
            username: payload.username,
            legacy: resolved.legacy,
            rotated,
            auto_accepted,
        })
    }

    /// Trust a peer after the user accepts a pairing request.
    pub async fn trust_peer(
        &self,
        stable_id: StableId,
        public_key: String,
        now: u64,
    ) -> Result<()> {
        self.store
            .upsert_peer(PeerRecord::new(stable_id, public_key, now))
            .await
    }

    /// Encrypt a 1:1 message and send it over the peer's attached data
    /// channel.
    ///
    /// Fails with `NotConnected` when the peer has no `Connected` entry
    /// or no attached channel.
    pub async fn send_message(&self, stable_id: StableId, plaintext: &[u8]) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disposed);
        }

        let peer_id = {
            let table = self.connections.lock().await;
            table
                .values()
                .find(|c| {
                    c.stable_id == Some(stable_id) && c.state == PeerConnectionState::Connected
                })
                .map(|c| c.peer_id.clone())
                .ok_or_else(|| ConnectionError::NotConnected(stable_id.to_hex()))?
        };

        let frame = self.encrypt_for(stable_id, plaintext).await?;

        let channel = self
            .channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&peer_id)
            .cloned()
            .ok_or_else(|| ConnectionError::NotConnected(peer_id.clone()))?;

        channel
            .send(frame)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    /// Encrypt a plaintext for a peer's session.
    pub async fn encrypt_for(&self, stable_id: StableId, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(&stable_id)
            .ok_or_else(|| ConnectionError::NotConnected(stable_id.to_hex()))?;
        Ok(session.encrypt(plaintext)?)
    }

    /// Decrypt an inbound blob from a peer's session.
    pub async fn decrypt_from(&self, stable_id: StableId, blob: &[u8]) -> Result<Vec<u8>> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(&stable_id)
            .ok_or_else(|| ConnectionError::NotConnected(stable_id.to_hex()))?;
        Ok(session.decrypt(blob)?)
    }

    /// Decrypt and route one inbound frame.
    ///
    /// A decrypt failure drops this message (logged at WARN) and keeps
    /// the connection; other peers are unaffected.
    pub async fn handle_inbound(&self, peer_id: &str, blob: &[u8]) -> Result<()> {
        let stable_id = {
            let table = self.connections.lock().await;
            table
                .get(peer_id)
                .and_then(|c| c.stable_id)
                .ok_or_else(|| ConnectionError::NotConnected(peer_id.to_string()))?
        };

        let plaintext = match self.decrypt_from(stable_id, blob).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "dropping undecryptable message");
                return Err(e);
            }
        };

        match String::from_utf8(plaintext) {
            Ok(text) => {
                self.router.route(peer_id, &text);
                Ok(())
            }
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "dropping non-utf8 message");
                Err(ConnectionError::HandshakeFailed("non-utf8 payload".into()))
            }
        }
    }

    /// Dispose the manager: stop routing, close attached channels,
    /// refuse new work. Idempotent; never async — channel close is
    /// fire-and-forget.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.router.dispose();
            let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
            for (_, channel) in channels.drain() {
                channel.close();
            }
        }
    }

    /// Whether the manager was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

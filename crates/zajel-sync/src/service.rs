//! The chunk sync service.
//!
//! Speaks the chunk half of the signaling catalog. The flow that matters:
//! after successfully downloading a chunk the service immediately
//! announces itself as a source (swarm seeding), and a `chunk_not_found`
//! keeps the request pending — a later `chunk_available` resolves it.
//!
//! Malformed inbound messages are logged at WARN and dropped; a quiet
//! DEBUG here buries real sync failures.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use rusqlite::Connection;
use zajel_db::queries::chunks;
use zajel_types::chunk::{validate_sealed_size, Chunk};
use zajel_types::signaling::{
    ChunkAnnounce, ChunkPush, ChunkRef, ChunkRequest, ChunkRequestMeta, SignalMessage,
};

use crate::{Result, SyncError};

/// Foreground re-announce interval.
pub const FOREGROUND_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Background (mobile) re-announce interval.
pub const BACKGROUND_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Outbound seam to the signaling server.
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Send one message to the server.
    async fn send(&self, message: SignalMessage) -> Result<()>;
}

/// The chunk sync service.
pub struct ChunkSyncService<T> {
    sink: T,
    peer_id: String,
    db: Arc<Mutex<Connection>>,
    /// Requests we are still waiting on: chunk id -> channel id.
    pending: Mutex<HashMap<String, Option<String>>>,
    /// Chunks downloaded since construction (for sync reports).
    downloaded: Mutex<HashSet<String>>,
}

impl<T: SignalSink> ChunkSyncService<T> {
    /// Create the service.
    pub fn new(sink: T, peer_id: String, db: Arc<Mutex<Connection>>) -> Self {
        Self {
            sink,
            peer_id,
            db,
            pending: Mutex::new(HashMap::new()),
            downloaded: Mutex::new(HashSet::new()),
        }
    }

    /// Chunk ids currently pending.
    pub async fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().await.keys().cloned().collect()
    }

    /// Pending requests with their channel hints.
    pub async fn pending_entries(&self) -> Vec<(String, Option<String>)> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|(id, channel)| (id.clone(), channel.clone()))
            .collect()
    }

    /// Shared handle to the underlying database.
    pub fn db_handle(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// Announce a specific set of `(chunk_id, routing_hash)` pairs for one
    /// channel.
    pub async fn announce_channel(
        &self,
        channel_id: &str,
        refs: Vec<(String, String)>,
    ) -> Result<()> {
        if refs.is_empty() {
            return Ok(());
        }
        self.sink
            .send(SignalMessage::ChunkAnnounce(ChunkAnnounce {
                peer_id: self.peer_id.clone(),
                channel_id: channel_id.to_string(),
                chunks: refs
                    .into_iter()
                    .map(|(chunk_id, routing_hash)| ChunkRef {
                        chunk_id,
                        routing_hash,
                    })
                    .collect(),
            }))
            .await
    }

    /// Chunks downloaded since construction.
    pub async fn downloaded_count(&self) -> usize {
        self.downloaded.lock().await.len()
    }

    /// Request a chunk; the request stays pending until data arrives.
    pub async fn request_chunk(&self, chunk_id: &str, channel_id: Option<String>) -> Result<()> {
        self.pending
            .lock()
            .await
            .insert(chunk_id.to_string(), channel_id.clone());
        self.sink
            .send(SignalMessage::ChunkRequest(ChunkRequest {
                peer_id: self.peer_id.clone(),
                chunk_id: chunk_id.to_string(),
                channel_id,
            }))
            .await
    }

    /// Request a chunk by routing metadata when its id is not yet known
    /// (e.g. a gap detected from neighbouring sequence numbers).
    pub async fn request_chunk_by_meta(
        &self,
        routing_hash: &str,
        sequence: u64,
        chunk_index: u32,
    ) -> Result<()> {
        self.sink
            .send(SignalMessage::ChunkRequestMeta(ChunkRequestMeta {
                peer_id: self.peer_id.clone(),
                routing_hash: routing_hash.to_string(),
                sequence,
                chunk_index,
            }))
            .await
    }

    /// Announce every locally held chunk, grouped by channel.
    pub async fn announce_all(&self) -> Result<usize> {
        let ids = {
            let db = self.db.lock().await;
            chunks::all_ids(&db)?
        };

        let mut by_channel: HashMap<String, Vec<ChunkRef>> = HashMap::new();
        for (chunk_id, channel_id, routing_hash) in ids {
            by_channel.entry(channel_id).or_default().push(ChunkRef {
                chunk_id,
                routing_hash,
            });
        }

        let mut announced = 0usize;
        for (channel_id, refs) in by_channel {
            announced += refs.len();
            self.sink
                .send(SignalMessage::ChunkAnnounce(ChunkAnnounce {
                    peer_id: self.peer_id.clone(),
                    channel_id,
                    chunks: refs,
                }))
                .await?;
        }
        Ok(announced)
    }

    /// Handle one server message. Unknown or malformed messages are
    /// dropped with a WARN; the connection stays up.
    pub async fn handle_server_message(&self, message: SignalMessage) -> Result<()> {
        match message {
            SignalMessage::ChunkPull(pull) => self.answer_pull(&pull.chunk_id).await,
            SignalMessage::ChunkData(data) => self.accept_data(data).await,
            SignalMessage::ChunkAvailable(available) => {
                let ids: Vec<String> = available.ids().iter().map(|s| s.to_string()).collect();
                for chunk_id in ids {
                    let channel = self.pending.lock().await.get(&chunk_id).cloned();
                    match channel {
                        Some(channel_id) => {
                            // Re-issue the request now that a source exists.
                            self.sink
                                .send(SignalMessage::ChunkRequest(ChunkRequest {
                                    peer_id: self.peer_id.clone(),
                                    chunk_id,
                                    channel_id,
                                }))
                                .await?;
                        }
                        None => debug!(chunk = %chunk_id, "available but not pending; ignoring"),
                    }
                }
                Ok(())
            }
            SignalMessage::ChunkNotFound(not_found) => {
                // Stay pending; a future announce will trigger
                // chunk_available.
                debug!(chunk = %not_found.chunk_id, "no source online; keeping request pending");
                Ok(())
            }
            SignalMessage::Error(err) => {
                warn!(error = %err.error, "server rejected a sync message");
                Ok(())
            }
            other => {
                warn!(message = ?other, "unexpected message on sync channel; dropping");
                Ok(())
            }
        }
    }

    /// Answer a relay pull for a chunk we hold.
    async fn answer_pull(&self, chunk_id: &str) -> Result<()> {
        let chunk = {
            let db = self.db.lock().await;
            match chunks::find_by_id(&db, chunk_id) {
                Ok(chunk) => chunk,
                Err(zajel_db::DbError::NotFound(_)) => {
                    warn!(chunk = %chunk_id, "pulled for a chunk we no longer hold");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.sink
            .send(SignalMessage::ChunkPush(ChunkPush {
                peer_id: self.peer_id.clone(),
                chunk_id: chunk.chunk_id.clone(),
                channel_id: chunk.channel_id.clone(),
                data: chunk,
            }))
            .await
    }

    /// Accept delivered chunk data, store it, and seed.
    async fn accept_data(&self, data: zajel_types::signaling::ChunkData) -> Result<()> {
        let chunk: Chunk = match data.chunk() {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(chunk = %data.chunk_id, error = %e, "malformed chunk_data; dropping");
                return Err(SyncError::InvalidMessage(e.to_string()));
            }
        };

        if let Err(e) = validate_sealed_size(chunk.encrypted_payload.len()) {
            warn!(chunk = %chunk.chunk_id, error = %e, "oversized chunk_data; dropping");
            return Err(SyncError::InvalidMessage(e.to_string()));
        }

        {
            let db = self.db.lock().await;
            chunks::insert(&db, &chunk)?;
        }

        self.pending.lock().await.remove(&chunk.chunk_id);
        self.downloaded
            .lock()
            .await
            .insert(chunk.chunk_id.clone());

        // Swarm seeding: become a source right away.
        self.sink
            .send(SignalMessage::ChunkAnnounce(ChunkAnnounce {
                peer_id: self.peer_id.clone(),
                channel_id: chunk.channel_id.clone(),
                chunks: vec![ChunkRef {
                    chunk_id: chunk.chunk_id.clone(),
                    routing_hash: chunk.routing_hash.clone(),
                }],
            }))
            .await
    }
}

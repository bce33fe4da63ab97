//! The chunk relay: cache, source index, pull-on-demand, multicast
//! fan-out, and eviction.
//!
//! Every handler returns an outbox of `(target_peer_id, message)` pairs;
//! the WebSocket dispatcher owns actual delivery. That keeps this module
//! synchronous over its own state and directly testable.
//!
//! Request handling order:
//! 1. cache hit — serve and touch access bookkeeping
//! 2. online source — queue the requester; at most one concurrent pull
//!    per chunk id
//! 3. otherwise `chunk_not_found`; the requester stays queued so a later
//!    announce triggers `chunk_available`

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, warn};

use rusqlite::Connection;
use zajel_db::queries::{chunk_cache, chunk_sources};
use zajel_types::chunk::validate_sealed_size;
use zajel_types::signaling::{
    ChunkAnnounce, ChunkAvailable, ChunkData, ChunkNotFound, ChunkPull, ChunkPush, SignalMessage,
};

use crate::Result;

/// An outbound message owed to a peer.
pub type Outbound = (String, SignalMessage);

#[derive(Default)]
struct PendingChunk {
    requesters: Vec<String>,
    pulling: bool,
}

/// The chunk relay state.
pub struct ChunkRelay {
    db: Mutex<Connection>,
    pending: Mutex<HashMap<String, PendingChunk>>,
    cache_budget_bytes: u64,
}

impl ChunkRelay {
    /// Create a relay around an open database.
    pub fn new(db: Connection, cache_budget_bytes: u64) -> Self {
        Self {
            db: Mutex::new(db),
            pending: Mutex::new(HashMap::new()),
            cache_budget_bytes,
        }
    }

    /// Handle a chunk request from a peer.
    pub fn handle_request(
        &self,
        requester: &str,
        chunk_id: &str,
        online: &HashSet<String>,
        now: u64,
    ) -> Result<Vec<Outbound>> {
        // 1. Cache hit: serve directly. Cached rows hold the chunk JSON,
        //    so the data field is delivered as a string here.
        {
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(row) = chunk_cache::fetch(&db, chunk_id, now)? {
                let data = String::from_utf8_lossy(&row.data).to_string();
                return Ok(vec![(
                    requester.to_string(),
                    SignalMessage::ChunkData(ChunkData {
                        chunk_id: chunk_id.to_string(),
                        data: serde_json::Value::String(data),
                        channel_id: row.channel_id,
                    }),
                )]);
            }
        }

        // 2. Online source: queue the requester, pull at most once.
        let source = {
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            chunk_sources::sources_for(&db, chunk_id)?
                .into_iter()
                .find(|peer| online.contains(peer))
        };

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let entry = pending.entry(chunk_id.to_string()).or_default();
        if !entry.requesters.iter().any(|r| r == requester) {
            entry.requesters.push(requester.to_string());
        }

        match source {
            Some(source_peer) => {
                if entry.pulling {
                    debug!(chunk = %chunk_id, "pull already in flight");
                    return Ok(Vec::new());
                }
                entry.pulling = true;
                Ok(vec![(
                    source_peer,
                    SignalMessage::ChunkPull(ChunkPull {
                        chunk_id: chunk_id.to_string(),
                    }),
                )])
            }
            // 3. No source online: tell the requester, keep it queued.
            None => Ok(vec![(
                requester.to_string(),
                SignalMessage::ChunkNotFound(ChunkNotFound {
                    chunk_id: chunk_id.to_string(),
                }),
            )]),
        }
    }

    /// Handle an inbound chunk push: validate, cache, fan out to every
    /// queued requester, clear the queue atomically.
    pub fn handle_push(&self, push: &ChunkPush, now: u64) -> Result<Vec<Outbound>> {
        if let Err(e) = validate_sealed_size(push.data.encrypted_payload.len()) {
            warn!(chunk = %push.chunk_id, error = %e, "rejecting oversized push");
            return Ok(vec![(
                push.peer_id.clone(),
                SignalMessage::Error(zajel_types::signaling::ErrorMessage {
                    error: e.to_string(),
                }),
            )]);
        }

        let serialized = serde_json::to_string(&push.data)
            .map_err(|e| crate::ServerError::Serialization(e.to_string()))?;

        let requesters = {
            // Queue drain is atomic with the cache write: both happen
            // under the pending lock before any delivery.
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            chunk_cache::store(&db, &push.chunk_id, &push.channel_id, serialized.as_bytes(), now)?;
            chunk_sources::announce(&db, &push.chunk_id, &push.peer_id, now)?;
            pending
                .remove(&push.chunk_id)
                .map(|p| p.requesters)
                .unwrap_or_default()
        };

        let mut outbox = Vec::with_capacity(requesters.len());
        for requester in requesters {
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            // Each delivery counts as a cache access.
            if let Some(row) = chunk_cache::fetch(&db, &push.chunk_id, now)? {
                outbox.push((
                    requester,
                    SignalMessage::ChunkData(ChunkData {
                        chunk_id: push.chunk_id.clone(),
                        data: serde_json::Value::String(
                            String::from_utf8_lossy(&row.data).to_string(),
                        ),
                        channel_id: push.channel_id.clone(),
                    }),
                ));
            }
        }
        Ok(outbox)
    }

    /// Handle a source announce: record sources and wake pending
    /// requesters with `chunk_available`.
    pub fn handle_announce(&self, announce: &ChunkAnnounce, now: u64) -> Result<Vec<Outbound>> {
        {
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            for chunk in &announce.chunks {
                chunk_sources::announce(&db, &chunk.chunk_id, &announce.peer_id, now)?;
            }
        }

        let pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let mut outbox = Vec::new();
        for chunk in &announce.chunks {
            if let Some(entry) = pending.get(&chunk.chunk_id) {
                for requester in &entry.requesters {
                    outbox.push((
                        requester.clone(),
                        SignalMessage::ChunkAvailable(ChunkAvailable {
                            chunk_id: Some(chunk.chunk_id.clone()),
                            channel_id: Some(announce.channel_id.clone()),
                            chunk_ids: None,
                        }),
                    ));
                }
            }
        }
        Ok(outbox)
    }

    /// Serve a metadata-addressed request from the cache, when the caller
    /// does not yet know the chunk id.
    ///
    /// Scans cached rows for a chunk matching `(routing_hash, sequence,
    /// chunk_index)`. Misses return `chunk_not_found` keyed by a
    /// synthetic meta id so the requester can correlate.
    pub fn handle_request_meta(
        &self,
        requester: &str,
        routing_hash: &str,
        sequence: u64,
        chunk_index: u32,
        now: u64,
    ) -> Result<Vec<Outbound>> {
        let found = {
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            let mut stmt = db
                .prepare("SELECT chunk_id, data FROM chunk_cache")
                .map_err(zajel_db::DbError::Sqlite)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(zajel_db::DbError::Sqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(zajel_db::DbError::Sqlite)?;

            rows.into_iter().find(|(_, data)| {
                serde_json::from_slice::<zajel_types::chunk::Chunk>(data)
                    .map(|c| {
                        c.routing_hash == routing_hash
                            && c.sequence == sequence
                            && c.chunk_index == chunk_index
                    })
                    .unwrap_or(false)
            })
        };

        match found {
            Some((chunk_id, _)) => self.handle_request(requester, &chunk_id, &HashSet::new(), now),
            None => Ok(vec![(
                requester.to_string(),
                SignalMessage::ChunkNotFound(ChunkNotFound {
                    chunk_id: format!("meta:{routing_hash}:{sequence}:{chunk_index}"),
                }),
            )]),
        }
    }

    /// A peer disconnected: forget its source entries, its queued
    /// requests, and any pull we were waiting on from it.
    pub fn peer_disconnected(&self, peer_id: &str) -> Result<()> {
        {
            let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
            chunk_sources::remove_peer(&db, peer_id)?;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.retain(|_, entry| {
            entry.requesters.retain(|r| r != peer_id);
            !entry.requesters.is_empty() || entry.pulling
        });
        Ok(())
    }

    /// Run one eviction pass: TTL first, then LRU down to the budget.
    /// Source entries are untouched; content can be re-pulled.
    pub fn evict(&self, ttl_secs: u64, now: u64) -> Result<(usize, usize)> {
        let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
        let expired = chunk_cache::evict_expired(&db, ttl_secs, now)?;
        let lru = chunk_cache::evict_lru_to_budget(&db, self.cache_budget_bytes)?;
        Ok((expired, lru))
    }

    /// Pending requester count for a chunk (tests, diagnostics).
    pub fn pending_requesters(&self, chunk_id: &str) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(chunk_id)
            .map(|e| e.requesters.len())
            .unwrap_or(0)
    }

    /// Cache access count for a chunk (tests, diagnostics).
    pub fn cache_access_count(&self, chunk_id: &str) -> Result<Option<u64>> {
        let db = self.db.lock().unwrap_or_else(|p| p.into_inner());
        Ok(chunk_cache::peek(&db, chunk_id)?.map(|row| row.access_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zajel_types::chunk::Chunk;
    use zajel_types::signaling::ChunkRef;

    fn relay() -> ChunkRelay {
        ChunkRelay::new(zajel_db::open_memory().expect("db"), 10 * 1024 * 1024)
    }

    fn chunk(id_seq: u64, payload_len: usize) -> Chunk {
        Chunk {
            chunk_id: Chunk::format_id("abcd", id_seq, 0),
            channel_id: "abcd".into(),
            routing_hash: "rh".into(),
            sequence: id_seq,
            chunk_index: 0,
            total_chunks: 1,
            size: payload_len as u64,
            signature: "aa".repeat(64),
            author_pubkey: "bb".repeat(32),
            encrypted_payload: vec![7u8; payload_len],
        }
    }

    fn online(peers: &[&str]) -> HashSet<String> {
        peers.iter().map(|s| s.to_string()).collect()
    }

    fn announce_one(relay: &ChunkRelay, peer: &str, c: &Chunk, now: u64) {
        relay
            .handle_announce(
                &ChunkAnnounce {
                    peer_id: peer.into(),
                    channel_id: c.channel_id.clone(),
                    chunks: vec![ChunkRef {
                        chunk_id: c.chunk_id.clone(),
                        routing_hash: c.routing_hash.clone(),
                    }],
                },
                now,
            )
            .expect("announce");
    }

    #[test]
    fn test_request_without_source_is_not_found_but_stays_pending() {
        let relay = relay();
        let outbox = relay
            .handle_request("sub-1", "ch_abcd_seq1_idx0", &online(&[]), 100)
            .expect("request");

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, "sub-1");
        assert!(matches!(outbox[0].1, SignalMessage::ChunkNotFound(_)));
        assert_eq!(relay.pending_requesters("ch_abcd_seq1_idx0"), 1);
    }

    #[test]
    fn test_multicast_single_pull_fan_out() {
        let relay = relay();
        let c = chunk(1, 10 * 1024);
        announce_one(&relay, "owner", &c, 50);

        let peers = online(&["owner"]);

        // Three subscribers request within the same window.
        let out1 = relay
            .handle_request("sub-1", &c.chunk_id, &peers, 100)
            .expect("r1");
        let out2 = relay
            .handle_request("sub-2", &c.chunk_id, &peers, 101)
            .expect("r2");
        let out3 = relay
            .handle_request("sub-3", &c.chunk_id, &peers, 102)
            .expect("r3");

        // Exactly one pull (to the owner), no duplicates.
        assert_eq!(out1.len(), 1);
        assert!(matches!(out1[0].1, SignalMessage::ChunkPull(_)));
        assert_eq!(out1[0].0, "owner");
        assert!(out2.is_empty());
        assert!(out3.is_empty());
        assert_eq!(relay.pending_requesters(&c.chunk_id), 3);

        // Owner pushes; all three get chunk_data and the queue clears.
        let outbox = relay
            .handle_push(
                &ChunkPush {
                    peer_id: "owner".into(),
                    chunk_id: c.chunk_id.clone(),
                    channel_id: c.channel_id.clone(),
                    data: c.clone(),
                },
                110,
            )
            .expect("push");

        assert_eq!(outbox.len(), 3);
        let targets: HashSet<String> = outbox.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(targets, online(&["sub-1", "sub-2", "sub-3"]));
        for (_, message) in &outbox {
            let SignalMessage::ChunkData(data) = message else {
                unreachable!("expected chunk_data");
            };
            assert_eq!(data.chunk().expect("decode"), c);
        }
        assert_eq!(relay.pending_requesters(&c.chunk_id), 0);

        // Three deliveries, three cache accesses.
        assert_eq!(
            relay.cache_access_count(&c.chunk_id).expect("count"),
            Some(3)
        );
    }

    #[test]
    fn test_cache_hit_serves_directly() {
        let relay = relay();
        let c = chunk(2, 128);
        announce_one(&relay, "owner", &c, 50);
        relay
            .handle_request("sub-1", &c.chunk_id, &online(&["owner"]), 100)
            .expect("request");
        relay
            .handle_push(
                &ChunkPush {
                    peer_id: "owner".into(),
                    chunk_id: c.chunk_id.clone(),
                    channel_id: c.channel_id.clone(),
                    data: c.clone(),
                },
                110,
            )
            .expect("push");

        // A later requester hits the cache; data arrives as a JSON string.
        let outbox = relay
            .handle_request("sub-9", &c.chunk_id, &online(&[]), 200)
            .expect("request");
        assert_eq!(outbox.len(), 1);
        let SignalMessage::ChunkData(data) = &outbox[0].1 else {
            unreachable!("expected chunk_data");
        };
        assert!(matches!(data.data, serde_json::Value::String(_)));
        assert_eq!(data.chunk().expect("decode"), c);
    }

    #[test]
    fn test_oversized_push_rejected() {
        let relay = relay();
        let c = chunk(3, zajel_types::chunk::MAX_SEALED_CHUNK_SIZE + 1);

        let outbox = relay
            .handle_push(
                &ChunkPush {
                    peer_id: "owner".into(),
                    chunk_id: c.chunk_id.clone(),
                    channel_id: c.channel_id.clone(),
                    data: c.clone(),
                },
                100,
            )
            .expect("push handled");
        assert!(matches!(outbox[0].1, SignalMessage::Error(_)));
        assert_eq!(relay.cache_access_count(&c.chunk_id).expect("count"), None);
    }

    #[test]
    fn test_boundary_sized_push_accepted() {
        let relay = relay();
        let c = chunk(4, zajel_types::chunk::MAX_SEALED_CHUNK_SIZE);
        let outbox = relay
            .handle_push(
                &ChunkPush {
                    peer_id: "owner".into(),
                    chunk_id: c.chunk_id.clone(),
                    channel_id: c.channel_id.clone(),
                    data: c.clone(),
                },
                100,
            )
            .expect("push");
        assert!(outbox.is_empty()); // no requesters queued
        assert!(relay
            .cache_access_count(&c.chunk_id)
            .expect("count")
            .is_some());
    }

    #[test]
    fn test_announce_wakes_pending_requesters() {
        let relay = relay();
        let c = chunk(5, 64);

        // Request before any source exists.
        relay
            .handle_request("sub-1", &c.chunk_id, &online(&[]), 100)
            .expect("request");

        // Source appears.
        let outbox = relay
            .handle_announce(
                &ChunkAnnounce {
                    peer_id: "owner".into(),
                    channel_id: c.channel_id.clone(),
                    chunks: vec![ChunkRef {
                        chunk_id: c.chunk_id.clone(),
                        routing_hash: c.routing_hash.clone(),
                    }],
                },
                200,
            )
            .expect("announce");

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, "sub-1");
        assert!(matches!(outbox[0].1, SignalMessage::ChunkAvailable(_)));
    }

    #[test]
    fn test_sources_outlive_cache_eviction() {
        let relay = relay();
        let c = chunk(6, 64);
        announce_one(&relay, "owner", &c, 50);
        relay
            .handle_push(
                &ChunkPush {
                    peer_id: "owner".into(),
                    chunk_id: c.chunk_id.clone(),
                    channel_id: c.channel_id.clone(),
                    data: c.clone(),
                },
                100,
            )
            .expect("push");

        // TTL eviction clears the cache row.
        let (expired, _) = relay.evict(10, 1000).expect("evict");
        assert_eq!(expired, 1);

        // A request can still find the online source and pull again.
        let outbox = relay
            .handle_request("sub-1", &c.chunk_id, &online(&["owner"]), 1100)
            .expect("request");
        assert!(matches!(outbox[0].1, SignalMessage::ChunkPull(_)));
    }

    #[test]
    fn test_peer_disconnect_clears_sources_and_queue() {
        let relay = relay();
        let c = chunk(7, 64);
        announce_one(&relay, "owner", &c, 50);
        relay
            .handle_request("sub-1", &c.chunk_id, &online(&["owner"]), 100)
            .expect("request");

        relay.peer_disconnected("owner").expect("disconnect owner");
        relay.peer_disconnected("sub-1").expect("disconnect sub");

        // No online sources, no queued requesters left behind.
        assert_eq!(relay.pending_requesters(&c.chunk_id), 0);
        let outbox = relay
            .handle_request("sub-2", &c.chunk_id, &online(&[]), 200)
            .expect("request");
        assert!(matches!(outbox[0].1, SignalMessage::ChunkNotFound(_)));
    }

    #[test]
    fn test_request_by_meta() {
        let relay = relay();
        let c = chunk(8, 64);
        relay
            .handle_push(
                &ChunkPush {
                    peer_id: "owner".into(),
                    chunk_id: c.chunk_id.clone(),
                    channel_id: c.channel_id.clone(),
                    data: c.clone(),
                },
                100,
            )
            .expect("push");

        let outbox = relay
            .handle_request_meta("sub-1", &c.routing_hash, c.sequence, c.chunk_index, 200)
            .expect("meta request");
        assert!(matches!(&outbox[0].1, SignalMessage::ChunkData(d) if d.chunk_id == c.chunk_id));

        let miss = relay
            .handle_request_meta("sub-1", "other-hash", 1, 0, 200)
            .expect("meta miss");
        assert!(matches!(&miss[0].1, SignalMessage::ChunkNotFound(_)));
    }

    #[test]
    fn test_lru_eviction_respects_budget() {
        let relay = ChunkRelay::new(zajel_db::open_memory().expect("db"), 2048);
        for n in 0..8 {
            let c = chunk(100 + n, 512);
            relay
                .handle_push(
                    &ChunkPush {
                        peer_id: "owner".into(),
                        chunk_id: c.chunk_id.clone(),
                        channel_id: c.channel_id.clone(),
                        data: c,
                    },
                    100 + n,
                )
                .expect("push");
        }

        let (_, lru) = relay.evict(3600, 200).expect("evict");
        assert!(lru > 0, "budget eviction should have removed rows");
    }
}

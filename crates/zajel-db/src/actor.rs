//! The store actor.
//!
//! The peer-record store is owned by exactly one task; every mutation and
//! read goes through its mailbox, which serializes access without any
//! cross-component locking. Consumers hold a cheap cloneable
//! [`PeerStoreHandle`].

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use rusqlite::Connection;
use zajel_types::identity::StableId;
use zajel_types::peer::PeerRecord;

use crate::queries::{messages, peers};
use crate::{DbError, Result};

/// Mailbox depth for the store actor.
const MAILBOX: usize = 64;

enum Command {
    GetPeer {
        id: StableId,
        reply: oneshot::Sender<Result<PeerRecord>>,
    },
    UpsertPeer {
        record: Box<PeerRecord>,
        reply: oneshot::Sender<Result<()>>,
    },
    ListPeers {
        reply: oneshot::Sender<Result<Vec<PeerRecord>>>,
    },
    RecordKeyRotation {
        id: StableId,
        new_public_key: String,
        rotated_at: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    AcknowledgeKeyChange {
        id: StableId,
        reply: oneshot::Sender<Result<()>>,
    },
    AppendSystemMessage {
        peer_id: String,
        body: String,
        at: u64,
        reply: oneshot::Sender<Result<i64>>,
    },
}

/// Handle to the peer store actor.
#[derive(Clone)]
pub struct PeerStoreHandle {
    tx: mpsc::Sender<Command>,
}

impl PeerStoreHandle {
    /// Spawn the actor around an open database connection.
    pub fn spawn(conn: Connection) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(MAILBOX);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                handle(&conn, command);
            }
        });

        Self { tx }
    }

    /// Look up a peer by stable id.
    pub async fn get_peer(&self, id: StableId) -> Result<PeerRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetPeer { id, reply }).await?;
        rx.await.map_err(|_| DbError::ActorGone)?
    }

    /// Insert or replace a peer record.
    pub async fn upsert_peer(&self, record: PeerRecord) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UpsertPeer {
            record: Box::new(record),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DbError::ActorGone)?
    }

    /// List all peers.
    pub async fn list_peers(&self) -> Result<Vec<PeerRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListPeers { reply }).await?;
        rx.await.map_err(|_| DbError::ActorGone)?
    }

    /// Record an observed key rotation.
    pub async fn record_key_rotation(
        &self,
        id: StableId,
        new_public_key: String,
        rotated_at: u64,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RecordKeyRotation {
            id,
            new_public_key,
            rotated_at,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DbError::ActorGone)?
    }

    /// Clear the key-change flag after user verification.
    pub async fn acknowledge_key_change(&self, id: StableId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AcknowledgeKeyChange { id, reply }).await?;
        rx.await.map_err(|_| DbError::ActorGone)?
    }

    /// Append a system chat message to a peer conversation.
    pub async fn append_system_message(
        &self,
        peer_id: String,
        body: String,
        at: u64,
    ) -> Result<i64> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AppendSystemMessage {
            peer_id,
            body,
            at,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DbError::ActorGone)?
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| DbError::ActorGone)
    }
}

fn handle(conn: &Connection, command: Command) {
    match command {
        Command::GetPeer { id, reply } => {
            let _ = reply.send(peers::get(conn, &id));
        }
        Command::UpsertPeer { record, reply } => {
            let _ = reply.send(peers::upsert(conn, &record));
        }
        Command::ListPeers { reply } => {
            let _ = reply.send(peers::list(conn));
        }
        Command::RecordKeyRotation {
            id,
            new_public_key,
            rotated_at,
            reply,
        } => {
            let result = peers::record_key_rotation(conn, &id, &new_public_key, rotated_at);
            if let Err(e) = &result {
                warn!(peer = %id, error = %e, "key rotation not recorded");
            }
            let _ = reply.send(result);
        }
        Command::AcknowledgeKeyChange { id, reply } => {
            let _ = reply.send(peers::acknowledge_key_change(conn, &id));
        }
        Command::AppendSystemMessage {
            peer_id,
            body,
            at,
            reply,
        } => {
            let _ = reply.send(messages::append_system(conn, &peer_id, &body, at));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> PeerStoreHandle {
        PeerStoreHandle::spawn(crate::open_memory().expect("open"))
    }

    #[tokio::test]
    async fn test_upsert_and_get_via_actor() {
        let store = test_store();
        let record = PeerRecord::new(StableId::from_bytes([1; 8]), "key-1".into(), 100);

        store.upsert_peer(record.clone()).await.expect("upsert");
        let loaded = store.get_peer(record.stable_id).await.expect("get");
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_rotation_via_actor() {
        let store = test_store();
        let record = PeerRecord::new(StableId::from_bytes([2; 8]), "key-old".into(), 100);
        store.upsert_peer(record.clone()).await.expect("upsert");

        store
            .record_key_rotation(record.stable_id, "key-new".into(), 200)
            .await
            .expect("rotate");

        let loaded = store.get_peer(record.stable_id).await.expect("get");
        assert_eq!(loaded.public_key, "key-new");
        assert_eq!(loaded.previous_public_key.as_deref(), Some("key-old"));
        assert!(!loaded.key_change_acknowledged);

        store
            .acknowledge_key_change(record.stable_id)
            .await
            .expect("ack");
        assert!(store
            .get_peer(record.stable_id)
            .await
            .expect("get")
            .key_change_acknowledged);
    }

    #[tokio::test]
    async fn test_unknown_peer_not_found() {
        let store = test_store();
        assert!(matches!(
            store.get_peer(StableId::from_bytes([9; 8])).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_serialized_mutations() {
        let store = test_store();
        // Many concurrent upserts of the same row; the mailbox serializes
        // them so the final state is one consistent record.
        let mut handles = Vec::new();
        for n in 0..20u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record =
                    PeerRecord::new(StableId::from_bytes([7; 8]), format!("key-{n}"), 100);
                store.upsert_peer(record).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("upsert");
        }
        assert_eq!(store.list_peers().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_system_message_via_actor() {
        let store = test_store();
        let id = store
            .append_system_message("p1".into(), "Safety number changed. Tap to verify.".into(), 1)
            .await
            .expect("append");
        assert!(id > 0);
    }
}

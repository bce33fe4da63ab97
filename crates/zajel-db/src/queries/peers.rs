//! Trusted-peer query functions.
//!
//! The peers table is the TOFU trust store: one row per stable id, with
//! the pinned key, the previous key after a rotation, and the
//! acknowledgement flag the UI clears once the user verifies the new
//! safety number.

use rusqlite::Connection;

use zajel_types::identity::StableId;
use zajel_types::peer::PeerRecord;

use crate::{DbError, Result};

/// Insert or replace a peer record.
pub fn upsert(conn: &Connection, record: &PeerRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO peers (stable_id, public_key, previous_public_key, key_rotated_at,
                            key_change_acknowledged, trusted_at, alias, blocked_since)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(stable_id) DO UPDATE SET
             public_key = excluded.public_key,
             previous_public_key = excluded.previous_public_key,
             key_rotated_at = excluded.key_rotated_at,
             key_change_acknowledged = excluded.key_change_acknowledged,
             trusted_at = excluded.trusted_at,
             alias = excluded.alias,
             blocked_since = excluded.blocked_since",
        rusqlite::params![
            record.stable_id.to_hex(),
            record.public_key,
            record.previous_public_key,
            record.key_rotated_at.map(|v| v as i64),
            record.key_change_acknowledged,
            record.trusted_at as i64,
            record.alias,
            record.blocked_since.map(|v| v as i64),
        ],
    )?;
    Ok(())
}

/// Get a peer by stable id.
pub fn get(conn: &Connection, stable_id: &StableId) -> Result<PeerRecord> {
    conn.query_row(
        "SELECT stable_id, public_key, previous_public_key, key_rotated_at,
                key_change_acknowledged, trusted_at, alias, blocked_since
         FROM peers WHERE stable_id = ?1",
        [stable_id.to_hex()],
        row_to_record,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("peer".into()),
        other => DbError::Sqlite(other),
    })
}

/// List all peers, unblocked first, by trust date.
pub fn list(conn: &Connection) -> Result<Vec<PeerRecord>> {
    let mut stmt = conn.prepare(
        "SELECT stable_id, public_key, previous_public_key, key_rotated_at,
                key_change_acknowledged, trusted_at, alias, blocked_since
         FROM peers ORDER BY blocked_since IS NOT NULL, trusted_at",
    )?;

    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record a key rotation: pin the new key, keep the old one, clear the
/// acknowledgement flag.
pub fn record_key_rotation(
    conn: &Connection,
    stable_id: &StableId,
    new_public_key: &str,
    rotated_at: u64,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE peers SET previous_public_key = public_key,
                          public_key = ?2,
                          key_rotated_at = ?3,
                          key_change_acknowledged = 0
         WHERE stable_id = ?1",
        rusqlite::params![stable_id.to_hex(), new_public_key, rotated_at as i64],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound("peer".into()));
    }
    Ok(())
}

/// Mark a key change as acknowledged by the user.
pub fn acknowledge_key_change(conn: &Connection, stable_id: &StableId) -> Result<()> {
    conn.execute(
        "UPDATE peers SET key_change_acknowledged = 1 WHERE stable_id = ?1",
        [stable_id.to_hex()],
    )?;
    Ok(())
}

/// Block a peer.
pub fn block(conn: &Connection, stable_id: &StableId, at: u64) -> Result<()> {
    conn.execute(
        "UPDATE peers SET blocked_since = ?2 WHERE stable_id = ?1",
        rusqlite::params![stable_id.to_hex(), at as i64],
    )?;
    Ok(())
}

/// Remove a peer entirely.
pub fn remove(conn: &Connection, stable_id: &StableId) -> Result<()> {
    conn.execute("DELETE FROM peers WHERE stable_id = ?1", [stable_id.to_hex()])?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerRecord> {
    let id_hex: String = row.get(0)?;
    let stable_id = StableId::from_hex(&id_hex).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            "invalid stable id".into(),
        )
    })?;
    Ok(PeerRecord {
        stable_id,
        public_key: row.get(1)?,
        previous_public_key: row.get(2)?,
        key_rotated_at: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        key_change_acknowledged: row.get(4)?,
        trusted_at: row.get::<_, i64>(5)? as u64,
        alias: row.get(6)?,
        blocked_since: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn record(byte: u8) -> PeerRecord {
        PeerRecord::new(StableId::from_bytes([byte; 8]), format!("key-{byte}"), 1000)
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = test_db();
        let peer = record(1);
        upsert(&conn, &peer).expect("upsert");

        let loaded = get(&conn, &peer.stable_id).expect("get");
        assert_eq!(loaded, peer);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let conn = test_db();
        assert!(matches!(
            get(&conn, &StableId::from_bytes([9; 8])),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_upsert_replaces() {
        let conn = test_db();
        let mut peer = record(1);
        upsert(&conn, &peer).expect("insert");

        peer.alias = Some("friend".into());
        upsert(&conn, &peer).expect("update");

        let loaded = get(&conn, &peer.stable_id).expect("get");
        assert_eq!(loaded.alias.as_deref(), Some("friend"));
        assert_eq!(list(&conn).expect("list").len(), 1);
    }

    #[test]
    fn test_record_key_rotation() {
        let conn = test_db();
        let peer = record(1);
        upsert(&conn, &peer).expect("insert");

        record_key_rotation(&conn, &peer.stable_id, "key-new", 2000).expect("rotate");

        let loaded = get(&conn, &peer.stable_id).expect("get");
        assert_eq!(loaded.public_key, "key-new");
        assert_eq!(loaded.previous_public_key.as_deref(), Some("key-1"));
        assert_eq!(loaded.key_rotated_at, Some(2000));
        assert!(!loaded.key_change_acknowledged);
    }

    #[test]
    fn test_rotation_on_unknown_peer_fails() {
        let conn = test_db();
        assert!(matches!(
            record_key_rotation(&conn, &StableId::from_bytes([9; 8]), "k", 1),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_acknowledge_key_change() {
        let conn = test_db();
        let peer = record(1);
        upsert(&conn, &peer).expect("insert");
        record_key_rotation(&conn, &peer.stable_id, "key-new", 2000).expect("rotate");

        acknowledge_key_change(&conn, &peer.stable_id).expect("ack");
        assert!(get(&conn, &peer.stable_id).expect("get").key_change_acknowledged);
    }

    #[test]
    fn test_block_and_remove() {
        let conn = test_db();
        let peer = record(1);
        upsert(&conn, &peer).expect("insert");

        block(&conn, &peer.stable_id, 3000).expect("block");
        assert_eq!(get(&conn, &peer.stable_id).expect("get").blocked_since, Some(3000));

        remove(&conn, &peer.stable_id).expect("remove");
        assert!(get(&conn, &peer.stable_id).is_err());
    }
}

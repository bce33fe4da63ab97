//! 1:1 message storage (device-local only).
//!
//! `kind` distinguishes user text from system notices such as the
//! key-rotation banner.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub peer_id: String,
    pub direction: String,
    pub kind: String,
    pub body: String,
    pub created_at: u64,
}

/// Append a message. Returns the row id.
pub fn append(
    conn: &Connection,
    peer_id: &str,
    direction: &str,
    kind: &str,
    body: &str,
    created_at: u64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (peer_id, direction, kind, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![peer_id, direction, kind, body, created_at as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Append a system notice for a peer conversation.
pub fn append_system(conn: &Connection, peer_id: &str, body: &str, created_at: u64) -> Result<i64> {
    append(conn, peer_id, "in", "system", body, created_at)
}

/// All messages with a peer, oldest first.
pub fn list_for_peer(conn: &Connection, peer_id: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, peer_id, direction, kind, body, created_at
         FROM messages WHERE peer_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map([peer_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                peer_id: row.get(1)?,
                direction: row.get(2)?,
                kind: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get::<_, i64>(5)? as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_append_and_list() {
        let conn = test_db();
        append(&conn, "p1", "out", "text", "hi", 100).expect("append");
        append(&conn, "p1", "in", "text", "hello", 200).expect("append");
        append(&conn, "p2", "in", "text", "other", 150).expect("append");

        let rows = list_for_peer(&conn, "p1").expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].body, "hi");
        assert_eq!(rows[1].direction, "in");
    }

    #[test]
    fn test_system_message() {
        let conn = test_db();
        append_system(&conn, "p1", "Safety number changed. Tap to verify.", 100)
            .expect("append");

        let rows = list_for_peer(&conn, "p1").expect("list");
        assert_eq!(rows[0].kind, "system");
        assert!(rows[0].body.contains("Safety number changed"));
    }
}

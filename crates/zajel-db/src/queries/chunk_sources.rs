//! Relay-side chunk source index (server).
//!
//! Maps chunk ids to the peers that announced them. Entries are removed
//! only when the announcing peer disconnects — never on cache eviction —
//! so content can be re-pulled after its cache row expires.

use rusqlite::Connection;

use crate::Result;

/// Register a peer as a source for a chunk.
pub fn announce(conn: &Connection, chunk_id: &str, peer_id: &str, now: u64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO chunk_sources (chunk_id, peer_id, announced_at)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![chunk_id, peer_id, now as i64],
    )?;
    Ok(())
}

/// All peers that have announced a chunk, most recent first.
pub fn sources_for(conn: &Connection, chunk_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT peer_id FROM chunk_sources WHERE chunk_id = ?1 ORDER BY announced_at DESC",
    )?;
    let rows = stmt
        .query_map([chunk_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All chunk ids a peer is a source for (used for `chunk_available`
/// notifications when the peer comes online).
pub fn chunks_for_peer(conn: &Connection, peer_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT chunk_id FROM chunk_sources WHERE peer_id = ?1")?;
    let rows = stmt
        .query_map([peer_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop every source entry for a disconnecting peer. Returns the count.
pub fn remove_peer(conn: &Connection, peer_id: &str) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM chunk_sources WHERE peer_id = ?1", [peer_id])?;
    Ok(deleted)
}

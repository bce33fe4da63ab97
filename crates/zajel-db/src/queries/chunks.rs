//! Local chunk storage (client side).

use rusqlite::Connection;

use zajel_types::chunk::Chunk;

use crate::{DbError, Result};

/// Insert a chunk; replaces an existing row with the same id.
pub fn insert(conn: &Connection, chunk: &Chunk) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO chunks
             (chunk_id, channel_id, routing_hash, sequence, chunk_index, total_chunks,
              size, signature, author_pubkey, encrypted_payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            chunk.chunk_id,
            chunk.channel_id,
            chunk.routing_hash,
            chunk.sequence as i64,
            chunk.chunk_index,
            chunk.total_chunks,
            chunk.size as i64,
            chunk.signature,
            chunk.author_pubkey,
            chunk.encrypted_payload,
        ],
    )?;
    Ok(())
}

/// Get a chunk by id within a channel.
pub fn get(conn: &Connection, chunk_id: &str, channel_id: &str) -> Result<Chunk> {
    conn.query_row(
        "SELECT chunk_id, channel_id, routing_hash, sequence, chunk_index, total_chunks,
                size, signature, author_pubkey, encrypted_payload
         FROM chunks WHERE chunk_id = ?1 AND channel_id = ?2",
        rusqlite::params![chunk_id, channel_id],
        row_to_chunk,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("chunk".into()),
        other => DbError::Sqlite(other),
    })
}

/// All chunks of a channel, ordered for assembly: `(sequence, chunk_index)`
/// ascending.
pub fn list_for_channel(conn: &Connection, channel_id: &str) -> Result<Vec<Chunk>> {
    let mut stmt = conn.prepare(
        "SELECT chunk_id, channel_id, routing_hash, sequence, chunk_index, total_chunks,
                size, signature, author_pubkey, encrypted_payload
         FROM chunks WHERE channel_id = ?1
         ORDER BY sequence ASC, chunk_index ASC",
    )?;
    let rows = stmt
        .query_map([channel_id], row_to_chunk)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Chunks of one message (all indexes sharing a sequence).
pub fn list_for_sequence(conn: &Connection, channel_id: &str, sequence: u64) -> Result<Vec<Chunk>> {
    let mut stmt = conn.prepare(
        "SELECT chunk_id, channel_id, routing_hash, sequence, chunk_index, total_chunks,
                size, signature, author_pubkey, encrypted_payload
         FROM chunks WHERE channel_id = ?1 AND sequence = ?2
         ORDER BY chunk_index ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![channel_id, sequence as i64], row_to_chunk)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Find a chunk by id alone (used when answering a relay pull, where the
/// channel is implied by the id).
pub fn find_by_id(conn: &Connection, chunk_id: &str) -> Result<Chunk> {
    conn.query_row(
        "SELECT chunk_id, channel_id, routing_hash, sequence, chunk_index, total_chunks,
                size, signature, author_pubkey, encrypted_payload
         FROM chunks WHERE chunk_id = ?1 LIMIT 1",
        [chunk_id],
        row_to_chunk,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("chunk".into()),
        other => DbError::Sqlite(other),
    })
}

/// Find a chunk by routing metadata (used for `chunk_request_meta`).
pub fn find_by_meta(
    conn: &Connection,
    routing_hash: &str,
    sequence: u64,
    chunk_index: u32,
) -> Result<Chunk> {
    conn.query_row(
        "SELECT chunk_id, channel_id, routing_hash, sequence, chunk_index, total_chunks,
                size, signature, author_pubkey, encrypted_payload
         FROM chunks WHERE routing_hash = ?1 AND sequence = ?2 AND chunk_index = ?3",
        rusqlite::params![routing_hash, sequence as i64, chunk_index],
        row_to_chunk,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("chunk".into()),
        other => DbError::Sqlite(other),
    })
}

/// The ids of every locally held chunk, for periodic re-announce.
pub fn all_ids(conn: &Connection) -> Result<Vec<(String, String, String)>> {
    let mut stmt =
        conn.prepare("SELECT chunk_id, channel_id, routing_hash FROM chunks")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete all chunks of a channel (manual purge).
pub fn purge_channel(conn: &Connection, channel_id: &str) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM chunks WHERE channel_id = ?1", [channel_id])?;
    Ok(deleted)
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        chunk_id: row.get(0)?,
        channel_id: row.get(1)?,
        routing_hash: row.get(2)?,
        sequence: row.get::<_, i64>(3)? as u64,
        chunk_index: row.get(4)?,
        total_chunks: row.get(5)?,
        size: row.get::<_, i64>(6)? as u64,
        signature: row.get(7)?,
        author_pubkey: row.get(8)?,
        encrypted_payload: row.get(9)?,
    })
}

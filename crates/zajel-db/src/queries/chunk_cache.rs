//! Relay-side chunk cache (server).
//!
//! Rows hold the serialized chunk JSON, capped at the shared sealed-chunk
//! limit. Eviction is TTL by `cached_at` plus LRU by `last_accessed` once
//! the cache exceeds its byte budget. Source entries are managed
//! separately and outlive cache rows.

use rusqlite::Connection;

use zajel_types::chunk::MAX_SEALED_CHUNK_SIZE;

use crate::{DbError, Result};

/// A cached chunk row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub chunk_id: String,
    pub channel_id: String,
    pub data: Vec<u8>,
    pub cached_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
}

/// Store a chunk in the cache.
///
/// Rejects rows above the shared size limit — the same limit the client
/// splits against.
pub fn store(
    conn: &Connection,
    chunk_id: &str,
    channel_id: &str,
    data: &[u8],
    now: u64,
) -> Result<()> {
    if data.len() > MAX_SEALED_CHUNK_SIZE + 4096 {
        // The JSON envelope adds framing on top of the sealed payload.
        return Err(DbError::Constraint(format!(
            "cache row is {} bytes, limit {}",
            data.len(),
            MAX_SEALED_CHUNK_SIZE + 4096
        )));
    }
    conn.execute(
        "INSERT OR REPLACE INTO chunk_cache
             (chunk_id, channel_id, data, cached_at, last_accessed, access_count)
         VALUES (?1, ?2, ?3, ?4, ?4, 0)",
        rusqlite::params![chunk_id, channel_id, data, now as i64],
    )?;
    Ok(())
}

/// Cache lookup. A hit updates `last_accessed` and bumps `access_count`.
pub fn fetch(conn: &Connection, chunk_id: &str, now: u64) -> Result<Option<CacheRow>> {
    let row = conn
        .query_row(
            "SELECT chunk_id, channel_id, data, cached_at, last_accessed, access_count
             FROM chunk_cache WHERE chunk_id = ?1",
            [chunk_id],
            |row| {
                Ok(CacheRow {
                    chunk_id: row.get(0)?,
                    channel_id: row.get(1)?,
                    data: row.get(2)?,
                    cached_at: row.get::<_, i64>(3)? as u64,
                    last_accessed: row.get::<_, i64>(4)? as u64,
                    access_count: row.get::<_, i64>(5)? as u64,
                })
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(DbError::Sqlite(other)),
        })?;

    if row.is_some() {
        conn.execute(
            "UPDATE chunk_cache SET last_accessed = ?2, access_count = access_count + 1
             WHERE chunk_id = ?1",
            rusqlite::params![chunk_id, now as i64],
        )?;
    }
    Ok(row)
}

/// Peek at a row without touching access bookkeeping (tests, eviction).
pub fn peek(conn: &Connection, chunk_id: &str) -> Result<Option<CacheRow>> {
    conn.query_row(
        "SELECT chunk_id, channel_id, data, cached_at, last_accessed, access_count
         FROM chunk_cache WHERE chunk_id = ?1",
        [chunk_id],
        |row| {
            Ok(CacheRow {
                chunk_id: row.get(0)?,
                channel_id: row.get(1)?,
                data: row.get(2)?,
                cached_at: row.get::<_, i64>(3)? as u64,
                last_accessed: row.get::<_, i64>(4)? as u64,
                access_count: row.get::<_, i64>(5)? as u64,
            })
        },
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(DbError::Sqlite(other)),
    })
}

/// Total bytes currently cached.
pub fn total_bytes(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(data)), 0) FROM chunk_cache",
        [],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

/// Delete rows older than the TTL. Returns the number evicted.
pub fn evict_expired(conn: &Connection, ttl_secs: u64, now: u64) -> Result<usize> {
    let cutoff = now.saturating_sub(ttl_secs);
    let deleted = conn.execute(
        "DELETE FROM chunk_cache WHERE cached_at < ?1",
        [cutoff as i64],
    )?;
    Ok(deleted)
}

/// Evict least-recently-used rows until the cache fits the byte budget.
/// Returns the number evicted.
pub fn evict_lru_to_budget(conn: &Connection, budget_bytes: u64) -> Result<usize> {
    let mut evicted = 0usize;
    while total_bytes(conn)? > budget_bytes {
        let victim: Option<String> = conn
            .query_row(
                "SELECT chunk_id FROM chunk_cache ORDER BY last_accessed ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(DbError::Sqlite(other)),
            })?;
        match victim {
            Some(chunk_id) => {
                conn.execute("DELETE FROM chunk_cache WHERE chunk_id = ?1", [&chunk_id])?;
                evicted += 1;
            }
            None => break,
        }
    }
    Ok(evicted)
}

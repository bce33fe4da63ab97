//! Channel table queries.
//!
//! The manifest is stored as its JSON wire form; private key material
//! never lands here (secure storage owns it).

use rusqlite::Connection;

use zajel_types::channel::{Channel, ChannelManifest, ChannelRole};

use crate::{DbError, Result};

/// Insert or replace a channel.
pub fn upsert(conn: &Connection, channel: &Channel) -> Result<()> {
    let manifest_json = serde_json::to_string(&channel.manifest)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let role = role_str(channel.role);

    conn.execute(
        "INSERT OR REPLACE INTO channels (id, role, manifest, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![channel.id, role, manifest_json, channel.created_at as i64],
    )?;
    Ok(())
}

/// Get a channel by id.
pub fn get(conn: &Connection, id: &str) -> Result<Channel> {
    conn.query_row(
        "SELECT id, role, manifest, created_at FROM channels WHERE id = ?1",
        [id],
        row_to_channel,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("channel".into()),
        other => DbError::Sqlite(other),
    })
}

/// List all channels.
pub fn list(conn: &Connection) -> Result<Vec<Channel>> {
    let mut stmt =
        conn.prepare("SELECT id, role, manifest, created_at FROM channels ORDER BY created_at")?;
    let rows = stmt
        .query_map([], row_to_channel)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Remove a channel row (chunks are purged separately).
pub fn remove(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM channels WHERE id = ?1", [id])?;
    Ok(())
}

fn role_str(role: ChannelRole) -> &'static str {
    match role {
        ChannelRole::Owner => "owner",
        ChannelRole::Admin => "admin",
        ChannelRole::Subscriber => "subscriber",
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let role: String = row.get(1)?;
    let manifest_json: String = row.get(2)?;
    let manifest: ChannelManifest = serde_json::from_str(&manifest_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;
    Ok(Channel {
        id: row.get(0)?,
        role: match role.as_str() {
            "owner" => ChannelRole::Owner,
            "admin" => ChannelRole::Admin,
            _ => ChannelRole::Subscriber,
        },
        manifest,
        created_at: row.get::<_, i64>(3)? as u64,
    })
}

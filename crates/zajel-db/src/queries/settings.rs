//! Settings key-value queries.

use rusqlite::Connection;

use crate::{DbError, Result};

/// Get a setting value.
pub fn get(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("setting {key}")),
        other => DbError::Sqlite(other),
    })
}

/// Get a setting, or a default when absent or empty.
pub fn get_or(conn: &Connection, key: &str, default: &str) -> String {
    match get(conn, key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Set a setting value.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

//! SQL schema definitions.

/// Complete schema for the Zajel v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Identity & trusted peers
-- ============================================================

CREATE TABLE IF NOT EXISTS identity (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    stable_id TEXT NOT NULL,
    secret_blob BLOB,
    wrapped INTEGER NOT NULL DEFAULT 0,
    username TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS peers (
    stable_id TEXT PRIMARY KEY,
    public_key TEXT NOT NULL,
    previous_public_key TEXT,
    key_rotated_at INTEGER,
    key_change_acknowledged INTEGER NOT NULL DEFAULT 1,
    trusted_at INTEGER NOT NULL,
    alias TEXT,
    blocked_since INTEGER
);

-- ============================================================
-- 1:1 messages (device-local; there is no central store)
-- ============================================================

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    peer_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'text',
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_peer ON messages(peer_id, created_at);

-- ============================================================
-- Channels & chunks
-- ============================================================

CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    manifest TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    routing_hash TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    size INTEGER NOT NULL,
    signature TEXT NOT NULL,
    author_pubkey TEXT NOT NULL,
    encrypted_payload BLOB NOT NULL,
    PRIMARY KEY (chunk_id, channel_id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_channel ON chunks(channel_id);
CREATE INDEX IF NOT EXISTS idx_chunks_channel_seq ON chunks(channel_id, sequence);
CREATE INDEX IF NOT EXISTS idx_chunks_routing ON chunks(routing_hash);

-- ============================================================
-- Relay-server chunk cache & source index
-- ============================================================

CREATE TABLE IF NOT EXISTS chunk_cache (
    chunk_id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON chunk_cache(last_accessed);
CREATE INDEX IF NOT EXISTS idx_cache_cached_at ON chunk_cache(cached_at);

CREATE TABLE IF NOT EXISTS chunk_sources (
    chunk_id TEXT NOT NULL,
    peer_id TEXT NOT NULL,
    announced_at INTEGER NOT NULL,
    PRIMARY KEY (chunk_id, peer_id)
);

CREATE INDEX IF NOT EXISTS idx_sources_chunk ON chunk_sources(chunk_id);
CREATE INDEX IF NOT EXISTS idx_sources_peer ON chunk_sources(peer_id);

-- ============================================================
-- Settings & misc
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

//! The rendezvous registry: meeting-point buckets and dead-drop queues.
//!
//! Two maps with different TTLs: daily points live 48 hours, hourly tokens
//! 3 hours. Registration at a token first collects the *other* peers'
//! entries (their dead drops, and for hourly tokens a live-match push to
//! the counterparty), then replaces this peer's own entry — at most one
//! entry per peer per token, and a peer never sees its own dead drop or
//! match.

use std::collections::HashMap;

use tracing::debug;

use zajel_types::signaling::LiveMatch;

/// TTL for daily meeting points: 48 hours.
pub const DAILY_TTL_SECS: u64 = 48 * 3600;

/// TTL for hourly tokens: 3 hours.
pub const HOURLY_TTL_SECS: u64 = 3 * 3600;

/// One registration at one token.
#[derive(Clone, Debug)]
pub struct RendezvousEntry {
    pub peer_id: String,
    pub dead_drop: Option<String>,
    pub relay_id: String,
    pub expires_at: u64,
}

/// Result of registering a token set.
#[derive(Debug, Default)]
pub struct RegistrationResult {
    /// Other peers currently registered at shared tokens.
    pub live_matches: Vec<LiveMatch>,
    /// Their dead drops.
    pub dead_drops: Vec<String>,
    /// Pushes owed to the other side (`rendezvous_match`), hourly only.
    pub notify: Vec<(String, LiveMatch)>,
}

/// The registry. The WS dispatcher wraps it in a mutex.
#[derive(Default)]
pub struct RendezvousRegistry {
    daily: HashMap<String, Vec<RendezvousEntry>>,
    hourly: HashMap<String, Vec<RendezvousEntry>>,
}

impl RendezvousRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer's daily points.
    pub fn register_daily_points(
        &mut self,
        peer_id: &str,
        tokens: &[String],
        dead_drop: Option<String>,
        relay_id: &str,
        now: u64,
    ) -> RegistrationResult {
        let mut result = RegistrationResult::default();
        for token in tokens {
            collect_and_replace(
                &mut self.daily,
                token,
                peer_id,
                dead_drop.clone(),
                relay_id,
                now + DAILY_TTL_SECS,
                now,
                &mut result,
                false,
            );
        }
        result
    }

    /// Register a peer's hourly tokens. Live matches additionally earn a
    /// push to the counterparty.
    pub fn register_hourly_tokens(
        &mut self,
        peer_id: &str,
        tokens: &[String],
        dead_drop: Option<String>,
        relay_id: &str,
        now: u64,
    ) -> RegistrationResult {
        let mut result = RegistrationResult::default();
        for token in tokens {
            collect_and_replace(
                &mut self.hourly,
                token,
                peer_id,
                dead_drop.clone(),
                relay_id,
                now + HOURLY_TTL_SECS,
                now,
                &mut result,
                true,
            );
        }
        result
    }

    /// Remove expired entries from both maps.
    pub fn cleanup(&mut self, now: u64) -> usize {
        let mut removed = 0usize;
        for map in [&mut self.daily, &mut self.hourly] {
            map.retain(|_, entries| {
                let before = entries.len();
                entries.retain(|e| e.expires_at > now);
                removed += before - entries.len();
                !entries.is_empty()
            });
        }
        removed
    }

    /// Entries currently registered at a token (diagnostics, tests).
    pub fn entries_at(&self, token: &str) -> usize {
        self.daily
            .get(token)
            .or_else(|| self.hourly.get(token))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total live entries.
    pub fn total_entries(&self) -> usize {
        self.daily.values().map(Vec::len).sum::<usize>()
            + self.hourly.values().map(Vec::len).sum::<usize>()
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_and_replace(
    map: &mut HashMap<String, Vec<RendezvousEntry>>,
    token: &str,
    peer_id: &str,
    dead_drop: Option<String>,
    relay_id: &str,
    expires_at: u64,
    now: u64,
    result: &mut RegistrationResult,
    push_matches: bool,
) {
    let entries = map.entry(token.to_string()).or_default();

    // Collect the other peers' live entries first.
    for entry in entries.iter() {
        if entry.peer_id == peer_id || entry.expires_at <= now {
            continue;
        }
        debug!(token = %token, other = %entry.peer_id, "rendezvous match");
        result.live_matches.push(LiveMatch {
            peer_id: entry.peer_id.clone(),
            relay_id: entry.relay_id.clone(),
            dead_drop: entry.dead_drop.clone(),
        });
        if let Some(drop) = &entry.dead_drop {
            result.dead_drops.push(drop.clone());
        }
        if push_matches {
            result.notify.push((
                entry.peer_id.clone(),
                LiveMatch {
                    peer_id: peer_id.to_string(),
                    relay_id: relay_id.to_string(),
                    dead_drop: dead_drop.clone(),
                },
            ));
        }
    }

    // Then replace this peer's entry: at most one per peer per token.
    entries.retain(|e| e.peer_id != peer_id && e.expires_at > now);
    entries.push(RendezvousEntry {
        peer_id: peer_id.to_string(),
        dead_drop,
        relay_id: relay_id.to_string(),
        expires_at,
    });
}

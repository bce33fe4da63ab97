//! UI-facing event payloads.

use serde::{Deserialize, Serialize};

/// Emitted when a peer is discovered at a meeting point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFoundEvent {
    /// The matched peer's id, hex-encoded.
    pub peer_id: String,
    /// The meeting-point token the match occurred at. May be empty when
    /// the match arrived as a push without token context.
    pub meeting_point: String,
    /// Whether the peer is live (vs. a dead drop).
    pub live: bool,
}

impl std::fmt::Display for PeerFoundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Token may be empty or shorter than the preview width.
        let preview: String = self.meeting_point.chars().take(10).collect();
        write!(
            f,
            "peer {} at {}{} ({})",
            self.peer_id,
            preview,
            if self.meeting_point.chars().count() > 10 { "…" } else { "" },
            if self.live { "live" } else { "dead drop" }
        )
    }
}

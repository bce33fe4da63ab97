//! The peer connection state machine.
//!
//! ```text
//! Disconnected -> Discovering -> Introducing -> DataChannelOpening
//!     -> HandshakePending -> Connected -> Disconnected
//! ```
//!
//! Any state may fall back to `Disconnected` on channel close. The
//! `HandshakePending -> Connected` edge additionally requires the
//! post-await existence check in the manager.

use serde::{Deserialize, Serialize};

/// Connection lifecycle states for one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerConnectionState {
    /// No connection, no activity.
    Disconnected,
    /// Rendezvous registration in flight.
    Discovering,
    /// Live match or dead-drop path being pursued.
    Introducing,
    /// Data channel negotiated, waiting for open.
    DataChannelOpening,
    /// Channel open, handshake exchange running.
    HandshakePending,
    /// Session established.
    Connected,
}

impl PeerConnectionState {
    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition(self, next: Self) -> bool {
        use PeerConnectionState::*;
        // Closing the channel resets from anywhere.
        if next == Disconnected {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Discovering)
                | (Discovering, Introducing)
                | (Introducing, DataChannelOpening)
                // Inbound connections skip discovery.
                | (Disconnected, DataChannelOpening)
                | (DataChannelOpening, HandshakePending)
                | (HandshakePending, Connected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PeerConnectionState::*;

    #[test]
    fn test_happy_path() {
        let path = [
            Disconnected,
            Discovering,
            Introducing,
            DataChannelOpening,
            HandshakePending,
            Connected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn test_disconnect_from_anywhere() {
        for state in [
            Discovering,
            Introducing,
            DataChannelOpening,
            HandshakePending,
            Connected,
        ] {
            assert!(state.can_transition(Disconnected));
        }
    }

    #[test]
    fn test_no_skipping_handshake() {
        assert!(!DataChannelOpening.can_transition(Connected));
        assert!(!Discovering.can_transition(Connected));
        assert!(!Disconnected.can_transition(Connected));
    }

    #[test]
    fn test_inbound_skips_discovery() {
        assert!(Disconnected.can_transition(DataChannelOpening));
    }

    #[test]
    fn test_no_backwards_progress() {
        assert!(!Connected.can_transition(HandshakePending));
        assert!(!HandshakePending.can_transition(Discovering));
    }
}

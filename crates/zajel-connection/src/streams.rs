//! Typed inbound streams and the prefix router.
//!
//! Each inbound plaintext message is routed by prefix at this layer so
//! consumers never filter. Every stream is a dedicated single-consumer
//! channel: a registered consumer always receives its messages, buffered
//! until it polls. Broadcast-with-filter is deliberately not used here —
//! broadcast streams drop messages when no listener is attached.
//!
//! | Prefix | Stripped | Stream |
//! |---|---|---|
//! | `link_*` (in peer id) | no | `linked_device` |
//! | `ginv:` | yes | `group_invitations` |
//! | `grp:` | yes | `group_data` |
//! | `typ:` | yes | `typing` |
//! | `rcpt:` | yes | `receipts` |
//! | (none) | — | `peer_messages` |
//!
//! All messages also mirror to the legacy `messages` stream during the
//! migration; new consumers must not use it.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

/// An inbound plaintext message after routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    /// Transport peer id the message arrived from.
    pub peer_id: String,
    /// Message body with the routing prefix stripped.
    pub body: String,
}

/// The single-consumer receiving ends, handed out exactly once.
pub struct TypedReceivers {
    pub group_invitations: mpsc::UnboundedReceiver<Inbound>,
    pub group_data: mpsc::UnboundedReceiver<Inbound>,
    pub typing: mpsc::UnboundedReceiver<Inbound>,
    pub receipts: mpsc::UnboundedReceiver<Inbound>,
    pub peer_messages: mpsc::UnboundedReceiver<Inbound>,
    pub linked_device: mpsc::UnboundedReceiver<Inbound>,
    /// Legacy mirror of every message. Deprecated; removed once all
    /// consumers are on the typed streams.
    pub messages: mpsc::UnboundedReceiver<Inbound>,
}

/// The routing half. Owned by the connection manager.
pub struct StreamRouter {
    group_invitations: mpsc::UnboundedSender<Inbound>,
    group_data: mpsc::UnboundedSender<Inbound>,
    typing: mpsc::UnboundedSender<Inbound>,
    receipts: mpsc::UnboundedSender<Inbound>,
    peer_messages: mpsc::UnboundedSender<Inbound>,
    linked_device: mpsc::UnboundedSender<Inbound>,
    messages: mpsc::UnboundedSender<Inbound>,
    disposed: AtomicBool,
}

impl StreamRouter {
    /// Create the router and its receivers.
    pub fn new() -> (Self, TypedReceivers) {
        let (ginv_tx, ginv_rx) = mpsc::unbounded_channel();
        let (grp_tx, grp_rx) = mpsc::unbounded_channel();
        let (typ_tx, typ_rx) = mpsc::unbounded_channel();
        let (rcpt_tx, rcpt_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (legacy_tx, legacy_rx) = mpsc::unbounded_channel();

        (
            Self {
                group_invitations: ginv_tx,
                group_data: grp_tx,
                typing: typ_tx,
                receipts: rcpt_tx,
                peer_messages: peer_tx,
                linked_device: link_tx,
                messages: legacy_tx,
                disposed: AtomicBool::new(false),
            },
            TypedReceivers {
                group_invitations: ginv_rx,
                group_data: grp_rx,
                typing: typ_rx,
                receipts: rcpt_rx,
                peer_messages: peer_rx,
                linked_device: link_rx,
                messages: legacy_rx,
            },
        )
    }

    /// Route one decrypted message. A no-op after [`Self::dispose`].
    pub fn route(&self, peer_id: &str, plaintext: &str) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        // Every message mirrors to the legacy stream during migration.
        let _ = self.messages.send(Inbound {
            peer_id: peer_id.to_string(),
            body: plaintext.to_string(),
        });

        if peer_id.starts_with("link_") {
            let _ = self.linked_device.send(Inbound {
                peer_id: peer_id.to_string(),
                body: plaintext.to_string(),
            });
            return;
        }

        let (sender, body) = if let Some(rest) = plaintext.strip_prefix("ginv:") {
            (&self.group_invitations, rest)
        } else if let Some(rest) = plaintext.strip_prefix("grp:") {
            (&self.group_data, rest)
        } else if let Some(rest) = plaintext.strip_prefix("typ:") {
            (&self.typing, rest)
        } else if let Some(rest) = plaintext.strip_prefix("rcpt:") {
            (&self.receipts, rest)
        } else {
            (&self.peer_messages, plaintext)
        };

        let _ = sender.send(Inbound {
            peer_id: peer_id.to_string(),
            body: body.to_string(),
        });
    }

    /// Dispose the router. Routing afterwards is a silent no-op, and
    /// disposing twice is fine.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!("stream router disposed");
        }
    }

    /// Whether the router was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

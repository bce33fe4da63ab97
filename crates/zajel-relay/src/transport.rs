//! The data-channel transport seam.
//!
//! Production clients plug WebRTC data channels in behind [`DataChannel`];
//! everything in this workspace is written against the trait. The
//! [`memory_pair`] transport gives tests two linked channels with
//! controllable open/close behavior and FIFO delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{RelayError, Result};

/// A bidirectional, ordered, reliable byte-frame channel to one peer.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Wait until the channel is open. Returns immediately once open.
    async fn wait_open(&self) -> Result<()>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Send one frame. FIFO order is preserved by the transport.
    async fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Receive the next frame; `None` once the channel is closed and
    /// drained.
    async fn recv(&self) -> Option<Vec<u8>>;

    /// Close the channel.
    fn close(&self);
}

/// Opens data channels to peers. The production implementation drives
/// WebRTC signaling; tests hand out memory channels.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Open a channel to the peer with the given id.
    async fn open_channel(&self, peer_id: &str) -> Result<Arc<dyn DataChannel>>;
}

/// One end of an in-memory channel pair.
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    open: Arc<AtomicBool>,
    peer_open: Arc<AtomicBool>,
}

/// Create a linked pair of open in-memory channels.
pub fn memory_pair() -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    let open_a = Arc::new(AtomicBool::new(true));
    let open_b = Arc::new(AtomicBool::new(true));

    let a = Arc::new(MemoryChannel {
        tx: tx_b,
        rx: Mutex::new(rx_a),
        open: open_a.clone(),
        peer_open: open_b.clone(),
    });
    let b = Arc::new(MemoryChannel {
        tx: tx_a,
        rx: Mutex::new(rx_b),
        open: open_b,
        peer_open: open_a,
    });
    (a, b)
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn wait_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RelayError::Transport("channel closed".into()))
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.peer_open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(RelayError::Transport("channel closed".into()));
        }
        self.tx
            .send(frame)
            .map_err(|_| RelayError::Transport("peer gone".into()))
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// A factory that hands out pre-linked memory channels by peer id.
#[derive(Default)]
pub struct MemoryFactory {
    channels: Mutex<std::collections::HashMap<String, Arc<MemoryChannel>>>,
}

impl MemoryFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register the local end for a peer; returns the remote end.
    pub async fn link(&self, peer_id: &str) -> Arc<MemoryChannel> {
        let (local, remote) = memory_pair();
        self.channels
            .lock()
            .await
            .insert(peer_id.to_string(), local);
        remote
    }
}

#[async_trait]
impl ChannelFactory for MemoryFactory {
    async fn open_channel(&self, peer_id: &str) -> Result<Arc<dyn DataChannel>> {
        self.channels
            .lock()
            .await
            .get(peer_id)
            .cloned()
            .map(|c| c as Arc<dyn DataChannel>)
            .ok_or_else(|| RelayError::Transport(format!("no route to {peer_id}")))
    }
}

//! The signaling WebSocket client.
//!
//! Owns the connection to one signaling server: a writer task draining an
//! outbound queue and a reader task that correlates `rendezvous_result`
//! responses with in-flight registrations (FIFO) and forwards every other
//! server push to the daemon loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use zajel_rendezvous::service::Matchmaker;
use zajel_rendezvous::RendezvousError;
use zajel_sync::service::SignalSink;
use zajel_sync::SyncError;
use zajel_types::signaling::{RegisterRendezvous, RendezvousResult, SignalMessage};

/// How long a rendezvous registration waits for its result before giving
/// up (retried next cycle).
pub const RENDEZVOUS_WAIT: Duration = Duration::from_secs(60);

type PendingQueue = Arc<Mutex<VecDeque<oneshot::Sender<RendezvousResult>>>>;

/// Handle to the signaling connection.
#[derive(Clone)]
pub struct SignalingClient {
    out_tx: mpsc::UnboundedSender<SignalMessage>,
    pending_rendezvous: PendingQueue,
}

impl SignalingClient {
    /// Connect to a signaling server.
    ///
    /// Returns the client and the stream of server pushes
    /// (`rendezvous_match`, chunk messages); `rendezvous_result` frames
    /// are consumed internally.
    pub async fn connect(
        url: &str,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<SignalMessage>)> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalMessage>();

        // Writer task.
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message.to_json() {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize outbound frame"),
                }
            }
        });

        // Reader task feeds the dispatcher.
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match SignalMessage::from_json(&text) {
                    Ok(message) => {
                        if in_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed server frame"),
                }
            }
        });

        Ok(Self::from_transport(out_tx, in_rx))
    }

    /// Build a client over raw message channels.
    ///
    /// Used by tests and alternative transports: `out_tx` receives every
    /// outbound message, `in_rx` feeds inbound ones.
    pub fn from_transport(
        out_tx: mpsc::UnboundedSender<SignalMessage>,
        mut in_rx: mpsc::UnboundedReceiver<SignalMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let pending_rendezvous: PendingQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let pending = Arc::clone(&pending_rendezvous);
        tokio::spawn(async move {
            while let Some(message) = in_rx.recv().await {
                match message {
                    SignalMessage::RendezvousResult(result) => {
                        let waiter = pending.lock().await.pop_front();
                        match waiter {
                            Some(tx) => {
                                // A timed-out waiter already dropped its
                                // receiver; that is fine.
                                let _ = tx.send(result);
                            }
                            None => {
                                debug!("rendezvous_result with no waiter; dropping")
                            }
                        }
                    }
                    other => {
                        if push_tx.send(other).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (
            Self {
                out_tx,
                pending_rendezvous,
            },
            push_rx,
        )
    }

    /// Queue one outbound message.
    pub fn send(&self, message: SignalMessage) -> Result<(), String> {
        self.out_tx
            .send(message)
            .map_err(|_| "signaling connection closed".to_string())
    }
}

#[async_trait]
impl Matchmaker for SignalingClient {
    async fn register_rendezvous(
        &self,
        registration: RegisterRendezvous,
    ) -> zajel_rendezvous::Result<RendezvousResult> {
        let (tx, rx) = oneshot::channel();
        self.pending_rendezvous.lock().await.push_back(tx);

        self.send(SignalMessage::RegisterRendezvous(registration))
            .map_err(RendezvousError::Signaling)?;

        match tokio::time::timeout(RENDEZVOUS_WAIT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(RendezvousError::Signaling("connection closed".into())),
            Err(_) => Err(RendezvousError::Signaling(
                "rendezvous result timed out".into(),
            )),
        }
    }
}

#[async_trait]
impl SignalSink for SignalingClient {
    async fn send(&self, message: SignalMessage) -> zajel_sync::Result<()> {
        SignalingClient::send(self, message).map_err(SyncError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zajel_types::signaling::{ChunkNotFound, LiveMatch};

    fn registration() -> RegisterRendezvous {
        RegisterRendezvous {
            peer_id: "a1b2c3d4e5f60718".into(),
            daily_points: vec!["day_T1".into()],
            hourly_tokens: vec!["hr_T1".into()],
            dead_drop: "ZHJvcA==".into(),
            relay_id: "relay-1".into(),
        }
    }

    #[tokio::test]
    async fn test_rendezvous_result_correlated() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (client, _pushes) = SignalingClient::from_transport(out_tx, in_rx);

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.register_rendezvous(registration()).await })
        };

        // The registration went out.
        let sent = out_rx.recv().await.expect("outbound");
        assert!(matches!(sent, SignalMessage::RegisterRendezvous(_)));

        // Server answers.
        in_tx
            .send(SignalMessage::RendezvousResult(RendezvousResult {
                live_matches: vec![LiveMatch {
                    peer_id: "bob".into(),
                    relay_id: "relay-2".into(),
                    dead_drop: None,
                }],
                dead_drops: vec![],
            }))
            .expect("inbound");

        let result = task.await.expect("join").expect("result");
        assert_eq!(result.live_matches.len(), 1);
    }

    #[tokio::test]
    async fn test_pushes_forwarded() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_client, mut pushes) = SignalingClient::from_transport(out_tx, in_rx);

        in_tx
            .send(SignalMessage::ChunkNotFound(ChunkNotFound {
                chunk_id: "c1".into(),
            }))
            .expect("inbound");

        let pushed = pushes.recv().await.expect("push");
        assert!(matches!(pushed, SignalMessage::ChunkNotFound(_)));
    }

    #[tokio::test]
    async fn test_results_resolve_fifo() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (client, _pushes) = SignalingClient::from_transport(out_tx, in_rx);

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.register_rendezvous(registration()).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.register_rendezvous(registration()).await })
        };
        tokio::task::yield_now().await;

        in_tx
            .send(SignalMessage::RendezvousResult(RendezvousResult {
                live_matches: vec![],
                dead_drops: vec!["Zmlyc3Q=".into()],
            }))
            .expect("first result");
        in_tx
            .send(SignalMessage::RendezvousResult(RendezvousResult {
                live_matches: vec![],
                dead_drops: vec!["c2Vjb25k".into()],
            }))
            .expect("second result");

        let r1 = first.await.expect("join").expect("result");
        let r2 = second.await.expect("join").expect("result");
        assert_eq!(r1.dead_drops, vec!["Zmlyc3Q=".to_string()]);
        assert_eq!(r2.dead_drops, vec!["c2Vjb25k".to_string()]);
    }

    #[tokio::test]
    async fn test_send_after_close_errors() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (client, _pushes) = SignalingClient::from_transport(out_tx, in_rx);

        drop(out_rx);
        assert!(SignalingClient::send(
            &client,
            SignalMessage::ChunkNotFound(ChunkNotFound {
                chunk_id: "x".into()
            })
        )
        .is_err());
    }
}

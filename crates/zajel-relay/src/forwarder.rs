//! The relay-peer side: source-id registration and introduction
//! forwarding.
//!
//! A peer acting as a relay keeps a map from source ids to the data
//! channels of the peers that handshook with it. Introductions are looked
//! up in that map and forwarded verbatim; the relay never sees inside the
//! sealed payload. An unknown target earns an `introduction_error` back to
//! the sender.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::transport::DataChannel;
use crate::wire::{RelayFrame, TARGET_NOT_FOUND};
use crate::Result;

/// The source-id routing table of a relay peer.
#[derive(Default)]
pub struct RelayForwarder {
    routes: Mutex<HashMap<String, Arc<dyn DataChannel>>>,
}

impl RelayForwarder {
    /// Create an empty forwarder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered sources.
    pub async fn route_count(&self) -> usize {
        self.routes.lock().await.len()
    }

    /// Handle one inbound control frame from a connected peer.
    ///
    /// `channel` is the channel the frame arrived on; it becomes the
    /// route target once the peer handshakes.
    pub async fn handle_frame(
        &self,
        channel: &Arc<dyn DataChannel>,
        frame_bytes: &[u8],
    ) -> Result<()> {
        let frame = match RelayFrame::from_bytes(frame_bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed relay frame");
                return Ok(());
            }
        };

        match frame {
            RelayFrame::RelayHandshake { source_id } => {
                debug!(source = %source_id, "relay handshake");
                self.routes
                    .lock()
                    .await
                    .insert(source_id, Arc::clone(channel));
                Ok(())
            }
            RelayFrame::Introduction {
                target_source_id,
                payload,
            } => {
                let target = self.routes.lock().await.get(&target_source_id).cloned();
                match target {
                    Some(target_channel) => {
                        let from_source_id = self.source_for(channel).await.unwrap_or_default();
                        let forward = RelayFrame::IntroductionForward {
                            from_source_id,
                            payload,
                        };
                        target_channel.send(forward.to_bytes()?).await
                    }
                    None => {
                        debug!(target = %target_source_id, "introduction target unknown");
                        let error = RelayFrame::IntroductionError {
                            error: TARGET_NOT_FOUND.into(),
                        };
                        channel.send(error.to_bytes()?).await
                    }
                }
            }
            // Forwards and errors are terminal frames; a relay never
            // receives them from clients.
            RelayFrame::IntroductionForward { .. } | RelayFrame::IntroductionError { .. } => {
                warn!("unexpected terminal frame at relay; dropping");
                Ok(())
            }
        }
    }

    /// Remove a disconnecting peer's routes.
    pub async fn remove_channel(&self, channel: &Arc<dyn DataChannel>) {
        self.routes
            .lock()
            .await
            .retain(|_, c| !Arc::ptr_eq(c, channel));
    }

    async fn source_for(&self, channel: &Arc<dyn DataChannel>) -> Option<String> {
        self.routes
            .lock()
            .await
            .iter()
            .find(|(_, c)| Arc::ptr_eq(c, channel))
            .map(|(source, _)| source.clone())
    }
}

//! The background sync pass.
//!
//! Platform schedulers (foreground timers, mobile background tasks) call
//! [`run_sync_pass`] on their own cadence. The pass is re-entrant and
//! idempotent: announcing the same chunks twice is harmless, pending
//! requests are simply re-issued, and a failure in one channel is recorded
//! and never aborts the others.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use zajel_db::queries::chunks;

use crate::service::{ChunkSyncService, SignalSink};

/// Aggregate result of one sync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Channels the pass looked at.
    pub channels_checked: usize,
    /// Chunks downloaded so far by the service (cumulative).
    pub chunks_downloaded: usize,
    /// Per-channel error descriptions.
    pub errors: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Run one sync pass over the given channels.
///
/// Per channel: re-announce its local chunks, then re-issue any pending
/// requests so a server that restarted re-learns them.
pub async fn run_sync_pass<T: SignalSink>(
    service: &ChunkSyncService<T>,
    channel_ids: &[String],
) -> SyncReport {
    let started = Instant::now();
    let mut report = SyncReport::default();

    for channel_id in channel_ids {
        report.channels_checked += 1;
        if let Err(e) = sync_channel(service, channel_id).await {
            warn!(channel = %channel_id, error = %e, "channel sync failed; continuing");
            report.errors.push(format!("{channel_id}: {e}"));
        }
    }

    // Re-issue pending requests outside the per-channel loop; these may
    // belong to channels not in the list anymore.
    for (chunk_id, channel_id) in service.pending_entries().await {
        if let Err(e) = service.request_chunk(&chunk_id, channel_id).await {
            report.errors.push(format!("pending {chunk_id}: {e}"));
        }
    }

    report.chunks_downloaded = service.downloaded_count().await;
    report.duration_ms = started.elapsed().as_millis() as u64;
    report
}

async fn sync_channel<T: SignalSink>(
    service: &ChunkSyncService<T>,
    channel_id: &str,
) -> crate::Result<()> {
    let refs = {
        let db = service.db_handle();
        let db = db.lock().await;
        chunks::list_for_channel(&db, channel_id)?
            .into_iter()
            .map(|c| (c.chunk_id, c.routing_hash))
            .collect::<Vec<_>>()
    };
    service.announce_channel(channel_id, refs).await
}

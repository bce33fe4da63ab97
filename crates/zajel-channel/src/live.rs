//! Live streaming over a broadcast channel.
//!
//! A live stream moves `Idle -> Live -> Ended`. While live, frames are
//! fanned out to subscribers directly and optionally recorded; on end, the
//! recording can be converted to VOD chunks in batches of
//! [`FRAMES_PER_CHUNK`] frames. The frame buffer is capped at
//! [`MAX_BUFFERED_FRAMES`] to bound memory; once full, recording stops and
//! the stream keeps running.

use serde::{Deserialize, Serialize};
use tracing::warn;

use zajel_crypto::ed25519::SigningKey;
use zajel_crypto::kdf::SessionKey;
use zajel_types::chunk::{Chunk, ChunkPayload, ContentType};

use crate::chunker::split_into_chunks;
use crate::{ChannelError, Result};

/// Frames batched into one VOD chunk message.
pub const FRAMES_PER_CHUNK: usize = 50;

/// Maximum recorded frames held in memory.
pub const MAX_BUFFERED_FRAMES: usize = 10_000;

/// Live-stream lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Live,
    Ended,
}

/// A single recorded media frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Capture timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Encoded frame bytes.
    #[serde(with = "zajel_types::chunk::base64_bytes")]
    pub data: Vec<u8>,
}

/// A live stream on one channel.
pub struct LiveStream {
    channel_id: String,
    state: StreamState,
    frames: Vec<Frame>,
    dropped_frames: u64,
}

impl LiveStream {
    /// Create an idle stream for a channel.
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            state: StreamState::Idle,
            frames: Vec::new(),
            dropped_frames: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Number of recorded frames.
    pub fn recorded_frames(&self) -> usize {
        self.frames.len()
    }

    /// Frames dropped after the buffer cap was reached.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Go live. Only an idle stream can start.
    pub fn start(&mut self) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(ChannelError::StreamState(format!(
                "cannot start from {:?}",
                self.state
            )));
        }
        self.state = StreamState::Live;
        Ok(())
    }

    /// Record a frame while live. Frames beyond the cap are counted and
    /// dropped.
    pub fn record_frame(&mut self, frame: Frame) -> Result<()> {
        if self.state != StreamState::Live {
            return Err(ChannelError::StreamState(format!(
                "cannot record in {:?}",
                self.state
            )));
        }
        if self.frames.len() >= MAX_BUFFERED_FRAMES {
            if self.dropped_frames == 0 {
                warn!(channel = %self.channel_id, "frame buffer full; dropping further frames");
            }
            self.dropped_frames += 1;
            return Ok(());
        }
        self.frames.push(frame);
        Ok(())
    }

    /// End the stream. Returns the recorded frames for optional VOD
    /// conversion.
    pub fn end(&mut self) -> Result<Vec<Frame>> {
        if self.state != StreamState::Live {
            return Err(ChannelError::StreamState(format!(
                "cannot end from {:?}",
                self.state
            )));
        }
        self.state = StreamState::Ended;
        Ok(std::mem::take(&mut self.frames))
    }
}

/// Convert recorded frames to VOD chunks.
///
/// Frames are batched [`FRAMES_PER_CHUNK`] at a time; each batch is
/// serialized as a video payload and run through the chunk engine with its
/// own sequence number, starting at `first_sequence`.
pub fn frames_to_vod_chunks(
    frames: &[Frame],
    channel_id: &str,
    first_sequence: u64,
    routing_hash: &str,
    content_key: &SessionKey,
    author: &SigningKey,
) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();

    for (batch_index, batch) in frames.chunks(FRAMES_PER_CHUNK).enumerate() {
        let body = serde_json::to_vec(batch)
            .map_err(|e| ChannelError::Encoding(format!("vod batch: {e}")))?;

        let payload = ChunkPayload {
            kind: ContentType::Video,
            payload: body,
            metadata: {
                let mut meta = serde_json::Map::new();
                meta.insert("vod_batch".into(), serde_json::json!(batch_index));
                meta.insert("frames".into(), serde_json::json!(batch.len()));
                meta
            },
            timestamp: batch.first().map(|f| f.timestamp_ms / 1000).unwrap_or(0),
            reply_to: None,
        };

        chunks.extend(split_into_chunks(
            &payload,
            channel_id,
            first_sequence + batch_index as u64,
            routing_hash,
            content_key,
            author,
        )?);
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zajel_crypto::x25519::X25519StaticSecret;

    fn frame(n: u64) -> Frame {
        Frame {
            timestamp_ms: n * 33,
            data: vec![n as u8; 128],
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut stream = LiveStream::new("abcd");
        assert_eq!(stream.state(), StreamState::Idle);

        stream.start().expect("start");
        assert_eq!(stream.state(), StreamState::Live);

        stream.record_frame(frame(1)).expect("record");
        let frames = stream.end().expect("end");
        assert_eq!(stream.state(), StreamState::Ended);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut stream = LiveStream::new("abcd");
        stream.start().expect("start");
        assert!(stream.start().is_err());
    }

    #[test]
    fn test_cannot_record_when_idle_or_ended() {
        let mut stream = LiveStream::new("abcd");
        assert!(stream.record_frame(frame(1)).is_err());

        stream.start().expect("start");
        stream.end().expect("end");
        assert!(stream.record_frame(frame(2)).is_err());
    }

    #[test]
    fn test_frame_buffer_cap() {
        let mut stream = LiveStream::new("abcd");
        stream.start().expect("start");

        for n in 0..(MAX_BUFFERED_FRAMES as u64 + 25) {
            stream
                .record_frame(Frame {
                    timestamp_ms: n,
                    data: vec![0u8; 4],
                })
                .expect("record");
        }

        assert_eq!(stream.recorded_frames(), MAX_BUFFERED_FRAMES);
        assert_eq!(stream.dropped_frames(), 25);
    }

    #[test]
    fn test_vod_conversion_batches() {
        let frames: Vec<Frame> = (0..(FRAMES_PER_CHUNK as u64 * 2 + 10)).map(frame).collect();

        let content_key =
            zajel_crypto::kdf::derive_content_key(&X25519StaticSecret::random(), 0).expect("key");
        let author = SigningKey::generate();

        let chunks =
            frames_to_vod_chunks(&frames, "abcd", 100, "rh", &content_key, &author)
                .expect("convert");

        // Three batches (50 + 50 + 10), each with at least one chunk, and
        // batch sequences run 100, 101, 102.
        let sequences: std::collections::BTreeSet<u64> =
            chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, [100u64, 101, 102].into_iter().collect());
    }

    #[test]
    fn test_vod_batches_round_trip() {
        let frames: Vec<Frame> = (0..10).map(frame).collect();
        let secret = X25519StaticSecret::random();
        let content_key = zajel_crypto::kdf::derive_content_key(&secret, 0).expect("key");
        let author = SigningKey::generate();

        let chunks = frames_to_vod_chunks(&frames, "abcd", 1, "rh", &content_key, &author)
            .expect("convert");

        let payload = crate::chunker::assemble(&chunks, &content_key).expect("assemble");
        assert_eq!(payload.kind, ContentType::Video);
        let restored: Vec<Frame> = serde_json::from_slice(&payload.payload).expect("frames");
        assert_eq!(restored, frames);
    }

    #[test]
    fn test_empty_frames_no_chunks() {
        let content_key =
            zajel_crypto::kdf::derive_content_key(&X25519StaticSecret::random(), 0).expect("key");
        let author = SigningKey::generate();
        let chunks =
            frames_to_vod_chunks(&[], "abcd", 1, "rh", &content_key, &author).expect("convert");
        assert!(chunks.is_empty());
    }
}

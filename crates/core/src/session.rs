//! Call Session Tracker
//!
//! A [`CallSession`] holds the audio buffered for one media stream between its
//! `start` and `stop` events. Sessions are owned by the connection that created
//! them and are never shared.

use bytes::{Bytes, BytesMut};
use serde::Deserialize;

/// Number of inbound chunks batched into one outbound media event.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

/// Audio encoding announced by the vendor in the `start` event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// State for one live media stream.
#[derive(Debug)]
pub struct CallSession {
    session_id: String,
    stream_sid: String,
    media_format: Option<MediaFormat>,
    audio_buffer: Vec<Bytes>,
    flush_threshold: usize,
    active: bool,
}

impl CallSession {
    /// Opens a session. A threshold of zero is treated as one.
    pub fn new(
        session_id: impl Into<String>,
        stream_sid: impl Into<String>,
        media_format: Option<MediaFormat>,
        flush_threshold: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stream_sid: stream_sid.into(),
            media_format,
            audio_buffer: Vec::with_capacity(flush_threshold.max(1)),
            flush_threshold: flush_threshold.max(1),
            active: true,
        }
    }

    /// The vendor call SID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn media_format(&self) -> Option<&MediaFormat> {
        self.media_format.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn buffered_chunks(&self) -> usize {
        self.audio_buffer.len()
    }

    /// Appends a decoded chunk.
    ///
    /// When the buffer reaches the flush threshold the chunks are concatenated
    /// in arrival order, the buffer is emptied, and the batch is returned.
    /// Chunks pushed after [`release`](Self::release) are dropped.
    pub fn push_chunk(&mut self, chunk: Bytes) -> Option<Bytes> {
        if !self.active {
            return None;
        }
        self.audio_buffer.push(chunk);
        if self.audio_buffer.len() < self.flush_threshold {
            return None;
        }

        let total = self.audio_buffer.iter().map(Bytes::len).sum();
        let mut batch = BytesMut::with_capacity(total);
        for chunk in self.audio_buffer.drain(..) {
            batch.extend_from_slice(&chunk);
        }
        Some(batch.freeze())
    }

    /// Discards buffered audio and marks the session inactive.
    ///
    /// Returns how many chunks were dropped; calling it again returns zero.
    pub fn release(&mut self) -> usize {
        let dropped = self.audio_buffer.len();
        self.audio_buffer.clear();
        self.active = false;
        dropped
    }
}

/// Whether a recognition result is final or a partial guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechResultType {
    Recognition,
    Hypothesis,
}

/// One speech-recognition result for the caller's audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechResult {
    pub transcript: String,
    pub confidence: f32,
    pub result_type: SpeechResultType,
}

impl SpeechResult {
    pub fn new(transcript: impl Into<String>, confidence: f32, result_type: SpeechResultType) -> Self {
        Self {
            transcript: transcript.into(),
            confidence: confidence.clamp(0.0, 1.0),
            result_type,
        }
    }

    pub fn is_final(&self) -> bool {
        self.result_type == SpeechResultType::Recognition
    }

    /// The transcript to forward to the agent, if this result warrants a reply.
    pub fn actionable_transcript(&self) -> Option<&str> {
        (self.is_final() && !self.transcript.trim().is_empty()).then_some(self.transcript.as_str())
    }
}

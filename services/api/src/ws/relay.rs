//! Per-connection media relay state machine.
//!
//! One [`MediaRelay`] lives for the lifetime of one websocket connection and
//! moves `Idle -> Streaming -> Closed`. It buffers inbound audio, forwards
//! finalized speech to the agent, and produces the events to send back.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use callbridge_core::{agent_bridge::AgentBridge, session::CallSession};
use tracing::{debug, info, warn};

use super::protocol::{
    ConfigureBody, InboundMessage, MarkBody, OutboundMedia, OutboundMessage, RecognitionOptions,
    SpeechPayload, StartPayload, StopPayload,
};
use crate::config::Config;

const SPEECH_MODEL: &str = "phone_call";

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub language: String,
    pub speech_model: String,
    pub flush_threshold: usize,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.voice.language.clone(),
            speech_model: SPEECH_MODEL.to_string(),
            flush_threshold: config.media_flush_chunks,
        }
    }
}

#[derive(Debug)]
enum RelayState {
    Idle,
    Streaming(CallSession),
    Closed,
}

pub struct MediaRelay {
    bridge: Arc<dyn AgentBridge>,
    settings: RelaySettings,
    state: RelayState,
}

impl MediaRelay {
    pub fn new(bridge: Arc<dyn AgentBridge>, settings: RelaySettings) -> Self {
        Self {
            bridge,
            settings,
            state: RelayState::Idle,
        }
    }

    /// The live session, if a stream has started and not stopped.
    pub fn session(&self) -> Option<&CallSession> {
        match &self.state {
            RelayState::Streaming(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, RelayState::Closed)
    }

    /// Parses and handles one text frame. Malformed frames are logged and dropped.
    pub async fn handle_text(&mut self, text: &str) -> Option<OutboundMessage> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                warn!(error = %e, "Dropping malformed media stream message");
                None
            }
        }
    }

    pub async fn handle(&mut self, msg: InboundMessage) -> Option<OutboundMessage> {
        if self.is_closed() {
            debug!("Ignoring event on closed media stream");
            return None;
        }

        match msg {
            InboundMessage::Connected { protocol } => {
                info!(?protocol, "Media stream connected");
                None
            }
            InboundMessage::Start { start } => Some(self.start(start)),
            InboundMessage::Media { media } => self.media(&media.payload),
            InboundMessage::Speech { speech } => self.speech(speech).await,
            InboundMessage::Mark { mark } => {
                debug!(name = ?mark.map(|m| m.name), "Mark acknowledged");
                None
            }
            InboundMessage::Stop { stop } => {
                self.stop(stop);
                None
            }
            InboundMessage::Other => {
                debug!("Ignoring unhandled media stream event");
                None
            }
        }
    }

    /// Releases any live session. Safe to call more than once.
    pub fn close(&mut self) {
        if let RelayState::Streaming(session) = &mut self.state {
            let dropped = session.release();
            info!(call_sid = %session.session_id(), dropped_chunks = dropped, "Media stream closed");
        }
        self.state = RelayState::Closed;
    }

    fn start(&mut self, start: StartPayload) -> OutboundMessage {
        if let RelayState::Streaming(previous) = &mut self.state {
            warn!(
                previous_call_sid = %previous.session_id(),
                call_sid = %start.call_sid,
                "Second start on one connection; replacing session"
            );
            previous.release();
        }

        let session = CallSession::new(
            start.call_sid,
            start.stream_sid,
            start.media_format,
            self.settings.flush_threshold,
        );
        info!(
            call_sid = %session.session_id(),
            stream_sid = %session.stream_sid(),
            media_format = ?session.media_format(),
            "Media stream started"
        );
        let reply = OutboundMessage::Configure {
            stream_sid: session.stream_sid().to_string(),
            configure: ConfigureBody {
                kind: "speech".to_string(),
                options: RecognitionOptions {
                    language: self.settings.language.clone(),
                    model: self.settings.speech_model.clone(),
                },
            },
        };
        self.state = RelayState::Streaming(session);
        reply
    }

    fn media(&mut self, payload: &str) -> Option<OutboundMessage> {
        let RelayState::Streaming(session) = &mut self.state else {
            debug!("Media before start; dropping chunk");
            return None;
        };

        let chunk = match STANDARD.decode(payload) {
            Ok(decoded) => Bytes::from(decoded),
            Err(e) => {
                warn!(call_sid = %session.session_id(), error = %e, "Skipping undecodable audio chunk");
                return None;
            }
        };

        let batch = session.push_chunk(chunk)?;
        debug!(call_sid = %session.session_id(), bytes = batch.len(), "Flushing audio batch");
        Some(OutboundMessage::Media {
            stream_sid: session.stream_sid().to_string(),
            media: OutboundMedia {
                payload: STANDARD.encode(&batch),
            },
        })
    }

    async fn speech(&mut self, speech: SpeechPayload) -> Option<OutboundMessage> {
        let RelayState::Streaming(session) = &self.state else {
            debug!("Speech before start; ignoring");
            return None;
        };
        let result = speech.first_result()?;

        let Some(transcript) = result.actionable_transcript() else {
            debug!(
                call_sid = %session.session_id(),
                result_type = ?result.result_type,
                "Ignoring non-final or empty speech result"
            );
            return None;
        };

        info!(call_sid = %session.session_id(), %transcript, confidence = result.confidence, "Forwarding speech to agent");
        let reply = self.bridge.send(transcript, session.session_id()).await;

        Some(OutboundMessage::Mark {
            stream_sid: session.stream_sid().to_string(),
            mark: MarkBody {
                name: "response".to_string(),
                value: reply.text,
            },
        })
    }

    fn stop(&mut self, stop: Option<StopPayload>) {
        let RelayState::Streaming(session) = &self.state else {
            debug!("Stop without an active stream");
            return;
        };

        let named = stop.and_then(|s| s.call_sid);
        if let Some(call_sid) = named.as_deref() {
            if call_sid != session.session_id() {
                warn!(%call_sid, tracked = %session.session_id(), "Ignoring stop for another call");
                return;
            }
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use callbridge_core::agent_bridge::AgentReply;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct CountingBridge {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentBridge for CountingBridge {
        async fn send(&self, transcript: &str, session_id: &str) -> AgentReply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AgentReply::new(format!("{session_id}: {transcript}"))
        }
    }

    fn relay() -> (MediaRelay, Arc<CountingBridge>) {
        let bridge = Arc::new(CountingBridge::default());
        let relay = MediaRelay::new(
            bridge.clone(),
            RelaySettings {
                language: "en-GB".into(),
                speech_model: SPEECH_MODEL.into(),
                flush_threshold: 10,
            },
        );
        (relay, bridge)
    }

    fn start_event(call_sid: &str) -> String {
        json!({
            "event": "start",
            "start": {
                "callSid": call_sid,
                "streamSid": "MZ1",
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            }
        })
        .to_string()
    }

    fn media_event(bytes: &[u8]) -> String {
        json!({ "event": "media", "media": { "payload": STANDARD.encode(bytes), "track": "inbound" } })
            .to_string()
    }

    fn speech_event(kind: &str, transcript: &str) -> String {
        json!({
            "event": "speech",
            "speech": { "type": kind, "alternatives": [{ "transcript": transcript, "confidence": 0.9 }] }
        })
        .to_string()
    }

    async fn started() -> (MediaRelay, Arc<CountingBridge>) {
        let (mut relay, bridge) = relay();
        relay.handle_text(&start_event("CA1")).await;
        (relay, bridge)
    }

    #[tokio::test]
    async fn test_start_replies_with_configure() {
        let (mut relay, _) = relay();
        let reply = relay.handle_text(&start_event("CA1")).await.unwrap();

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "event": "configure",
                "streamSid": "MZ1",
                "configure": { "type": "speech", "options": { "language": "en-GB", "model": "phone_call" } }
            })
        );
        let session = relay.session().unwrap();
        assert_eq!(session.session_id(), "CA1");
        assert_eq!(session.media_format().unwrap().sample_rate, 8000);
    }

    #[tokio::test]
    async fn test_ten_media_events_flush_once() {
        let (mut relay, _) = started().await;
        let mut outputs = Vec::new();
        for i in 0..10u8 {
            if let Some(out) = relay.handle_text(&media_event(&[i])).await {
                outputs.push(out);
            }
        }

        assert_eq!(outputs.len(), 1);
        let expected = STANDARD.encode((0..10u8).collect::<Vec<_>>());
        assert_eq!(
            outputs[0],
            OutboundMessage::Media {
                stream_sid: "MZ1".into(),
                media: OutboundMedia { payload: expected },
            }
        );
        assert_eq!(relay.session().unwrap().buffered_chunks(), 0);
    }

    #[tokio::test]
    async fn test_nine_media_events_emit_nothing() {
        let (mut relay, _) = started().await;
        for i in 0..9u8 {
            assert!(relay.handle_text(&media_event(&[i])).await.is_none());
        }
        assert_eq!(relay.session().unwrap().buffered_chunks(), 9);
    }

    #[tokio::test]
    async fn test_media_before_start_is_dropped() {
        let (mut relay, _) = relay();
        assert!(relay.handle_text(&media_event(b"x")).await.is_none());
        assert!(relay.session().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_skipped() {
        let (mut relay, _) = started().await;
        let bad = json!({ "event": "media", "media": { "payload": "%%%not base64" } }).to_string();
        assert!(relay.handle_text(&bad).await.is_none());
        assert_eq!(relay.session().unwrap().buffered_chunks(), 0);
    }

    #[tokio::test]
    async fn test_final_speech_calls_agent_once_and_marks_reply() {
        let (mut relay, bridge) = started().await;
        let reply = relay
            .handle_text(&speech_event("recognition", "I have chest pain"))
            .await
            .unwrap();

        assert_eq!(bridge.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            reply,
            OutboundMessage::Mark {
                stream_sid: "MZ1".into(),
                mark: MarkBody {
                    name: "response".into(),
                    value: "CA1: I have chest pain".into(),
                },
            }
        );
    }

    #[tokio::test]
    async fn test_hypothesis_and_blank_speech_call_nothing() {
        let (mut relay, bridge) = started().await;
        assert!(relay.handle_text(&speech_event("hypothesis", "I have")).await.is_none());
        assert!(relay.handle_text(&speech_event("recognition", "   ")).await.is_none());
        let empty = json!({ "event": "speech", "speech": { "type": "recognition", "alternatives": [] } });
        assert!(relay.handle_text(&empty.to_string()).await.is_none());
        assert_eq!(bridge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_double_stop_is_harmless() {
        let (mut relay, _) = started().await;
        relay.handle_text(&media_event(b"abc")).await;

        let stop = json!({ "event": "stop", "stop": { "callSid": "CA1" } }).to_string();
        assert!(relay.handle_text(&stop).await.is_none());
        assert!(relay.is_closed());
        assert!(relay.session().is_none());

        assert!(relay.handle_text(&stop).await.is_none());
        relay.close();
        assert!(relay.is_closed());
    }

    #[tokio::test]
    async fn test_stop_for_other_call_is_ignored() {
        let (mut relay, _) = started().await;
        let stop = json!({ "event": "stop", "stop": { "callSid": "CA999" } }).to_string();
        relay.handle_text(&stop).await;
        assert!(!relay.is_closed());
        assert_eq!(relay.session().unwrap().session_id(), "CA1");
    }

    #[tokio::test]
    async fn test_events_after_close_are_ignored() {
        let (mut relay, bridge) = started().await;
        relay.close();
        assert!(relay.handle_text(&start_event("CA2")).await.is_none());
        assert!(relay.handle_text(&speech_event("recognition", "hello")).await.is_none());
        assert_eq!(bridge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_start_replaces_session() {
        let (mut relay, _) = started().await;
        relay.handle_text(&media_event(b"abc")).await;
        relay.handle_text(&start_event("CA2")).await.unwrap();

        let session = relay.session().unwrap();
        assert_eq!(session.session_id(), "CA2");
        assert_eq!(session.buffered_chunks(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_keeps_relay_alive() {
        let (mut relay, _) = started().await;
        assert!(relay.handle_text("{not json").await.is_none());
        assert!(relay.handle_text(r#"{"event":"media"}"#).await.is_none());
        assert_eq!(relay.session().unwrap().session_id(), "CA1");
    }

    #[tokio::test]
    async fn test_connected_and_unknown_events_produce_nothing() {
        let (mut relay, _) = relay();
        assert!(relay.handle_text(r#"{"event":"connected","protocol":"Call"}"#).await.is_none());
        assert!(relay.handle_text(r#"{"event":"dtmf"}"#).await.is_none());
        assert!(!relay.is_closed());
    }
}

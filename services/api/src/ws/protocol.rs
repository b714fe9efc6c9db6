//! Defines the media stream message protocol between the vendor and the relay.

use callbridge_core::session::{MediaFormat, SpeechResult, SpeechResultType};
use serde::{Deserialize, Serialize};

/// Events sent by the vendor over the media stream.
#[derive(Deserialize, Debug)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Speech {
        speech: SpeechPayload,
    },
    Mark {
        #[serde(default)]
        mark: Option<MarkPayload>,
    },
    Stop {
        #[serde(default)]
        stop: Option<StopPayload>,
    },
    /// Any event this relay does not act on.
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub call_sid: String,
    pub stream_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Deserialize, Debug)]
pub struct MediaPayload {
    /// Base64 audio.
    pub payload: String,
}

#[derive(Deserialize, Debug)]
pub struct SpeechPayload {
    #[serde(rename = "type")]
    pub result_type: SpeechResultType,
    #[serde(default)]
    pub alternatives: Vec<SpeechAlternative>,
}

#[derive(Deserialize, Debug)]
pub struct SpeechAlternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

impl SpeechPayload {
    /// The best alternative, if the recognizer sent any.
    pub fn first_result(&self) -> Option<SpeechResult> {
        self.alternatives
            .first()
            .map(|alt| SpeechResult::new(alt.transcript.clone(), alt.confidence, self.result_type))
    }
}

#[derive(Deserialize, Debug)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    #[serde(default)]
    pub call_sid: Option<String>,
}

/// Events the relay sends back to the vendor.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Asks for speech recognition on the stream.
    Configure {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        configure: ConfigureBody,
    },
    /// A batch of buffered audio.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// The agent's reply to a finalized utterance.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkBody,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConfigureBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub options: RecognitionOptions,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub language: String,
    pub model: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MarkBody {
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_event_parses_vendor_shape() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "accountSid": "AC1",
                "callSid": "CA1",
                "streamSid": "MZ1",
                "tracks": ["inbound"],
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            }
        }))
        .unwrap();

        match msg {
            InboundMessage::Start { start } => {
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_other() {
        let msg: InboundMessage = serde_json::from_str(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Other));
    }

    #[test]
    fn test_stop_without_payload() {
        let msg: InboundMessage = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Stop { stop: None }));
    }

    #[test]
    fn test_speech_first_alternative() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "event": "speech",
            "speech": {
                "type": "recognition",
                "alternatives": [
                    { "transcript": "help", "confidence": 0.92 },
                    { "transcript": "kelp", "confidence": 0.11 }
                ]
            }
        }))
        .unwrap();

        let InboundMessage::Speech { speech } = msg else {
            panic!("expected speech");
        };
        let result = speech.first_result().unwrap();
        assert_eq!(result.transcript, "help");
        assert!(result.is_final());
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let mark = OutboundMessage::Mark {
            stream_sid: "MZ1".into(),
            mark: MarkBody {
                name: "response".into(),
                value: "Stay calm".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&mark).unwrap(),
            json!({ "event": "mark", "streamSid": "MZ1", "mark": { "name": "response", "value": "Stay calm" } })
        );

        let configure = OutboundMessage::Configure {
            stream_sid: "MZ1".into(),
            configure: ConfigureBody {
                kind: "speech".into(),
                options: RecognitionOptions {
                    language: "en-GB".into(),
                    model: "phone_call".into(),
                },
            },
        };
        assert_eq!(
            serde_json::to_value(&configure).unwrap(),
            json!({
                "event": "configure",
                "streamSid": "MZ1",
                "configure": { "type": "speech", "options": { "language": "en-GB", "model": "phone_call" } }
            })
        );
    }
}

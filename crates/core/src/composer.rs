//! Voice Response Composer
//!
//! Turns one voice webhook into the markup document the vendor executes next:
//! forward finalized speech to the agent and speak the reply, greet a fresh
//! call, and always keep the realtime media stream attached.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::{
    agent_bridge::{AgentBridge, AgentReply},
    twiml::{Gather, Say, Stream, VoiceResponse},
};

pub const DEFAULT_GREETING: &str = "You have reached Emergency Medical Services. An AI assistant will help you while waiting for a medical professional to take your call.";
pub const CONTINUATION_PROMPT: &str = "I am listening, please continue.";
pub const APOLOGY_PROMPT: &str = "Sorry, an error has occurred. How may I assist you?";
pub const LIVENESS_PROMPT: &str = "This is a test of the GET route.";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("speech result received without a CallSid")]
    MissingCallSid,
    #[error("agent task failed: {0}")]
    AgentTask(#[from] JoinError),
}

/// Spoken prompts and the voice that reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    pub language: String,
    pub voice: String,
    pub greeting: String,
    pub continuation_prompt: String,
    pub apology: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language: "en-GB".to_string(),
            voice: "Google.en-GB-Standard-B".to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            continuation_prompt: CONTINUATION_PROMPT.to_string(),
            apology: APOLOGY_PROMPT.to_string(),
        }
    }
}

/// Form fields the vendor posts to the voice webhook. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallWebhook {
    pub call_sid: Option<String>,
    pub call_status: Option<String>,
    pub speech_result: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl CallWebhook {
    /// The finalized transcript, if one was posted and is not blank.
    pub fn transcript(&self) -> Option<&str> {
        self.speech_result
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref().filter(|sid| !sid.is_empty())
    }

    pub fn is_completed(&self) -> bool {
        self.call_status.as_deref() == Some("completed")
    }
}

pub struct VoiceComposer {
    bridge: Arc<dyn AgentBridge>,
    settings: VoiceSettings,
    action_path: String,
    stream_url: String,
    reply_deadline: Duration,
}

impl VoiceComposer {
    pub fn new(
        bridge: Arc<dyn AgentBridge>,
        settings: VoiceSettings,
        action_path: impl Into<String>,
        stream_url: impl Into<String>,
        reply_deadline: Duration,
    ) -> Self {
        Self {
            bridge,
            settings,
            action_path: action_path.into(),
            stream_url: stream_url.into(),
            reply_deadline,
        }
    }

    /// Composes the reply document, substituting the apology document on failure.
    pub async fn respond(&self, webhook: &CallWebhook) -> String {
        match self.compose(webhook).await {
            Ok(document) => document,
            Err(err) => {
                error!(call_sid = ?webhook.call_sid(), error = %err, "Failed to compose voice response");
                self.apology()
            }
        }
    }

    pub async fn compose(&self, webhook: &CallWebhook) -> Result<String, ComposeError> {
        let mut response = VoiceResponse::new();

        if let Some(transcript) = webhook.transcript() {
            let call_sid = webhook.call_sid().ok_or(ComposeError::MissingCallSid)?;
            info!(%call_sid, %transcript, "Forwarding caller speech to agent");

            let reply = self.ask_agent(transcript, call_sid).await?;
            let prompt = if reply.is_empty() {
                self.settings.continuation_prompt.clone()
            } else {
                reply.text
            };
            response = response.gather(self.listen_again(prompt));
        } else if !webhook.is_completed() {
            info!(call_sid = ?webhook.call_sid(), "Greeting caller");
            response = response.gather(self.listen_again(self.settings.greeting.clone()));
        }

        Ok(response.connect_stream(self.media_stream()).render())
    }

    /// The document sent when composing fails.
    pub fn apology(&self) -> String {
        VoiceResponse::new()
            .gather(self.listen_again(self.settings.apology.clone()))
            .connect_stream(self.media_stream())
            .render()
    }

    /// Static document for manual reachability checks.
    pub fn liveness(&self) -> String {
        VoiceResponse::new()
            .say(self.speak(LIVENESS_PROMPT.to_string()))
            .render()
    }

    async fn ask_agent(&self, transcript: &str, call_sid: &str) -> Result<AgentReply, ComposeError> {
        let bridge = Arc::clone(&self.bridge);
        let (transcript, call_sid) = (transcript.to_owned(), call_sid.to_owned());
        let mut task = tokio::spawn(async move { bridge.send(&transcript, &call_sid).await });

        match tokio::time::timeout(self.reply_deadline, &mut task).await {
            Ok(joined) => Ok(joined?),
            Err(_) => {
                task.abort();
                warn!(deadline_ms = self.reply_deadline.as_millis() as u64, "Agent reply deadline expired");
                Ok(AgentReply::default())
            }
        }
    }

    fn speak(&self, text: String) -> Say {
        Say::new(text, &self.settings.voice, &self.settings.language)
    }

    fn listen_again(&self, prompt: String) -> Gather {
        Gather::speech(&self.action_path, &self.settings.language).with_prompt(self.speak(prompt))
    }

    fn media_stream(&self) -> Stream {
        let transcription = json!({
            "enable": true,
            "languageCode": self.settings.language,
        });
        Stream::inbound(&self.stream_url).with_parameter("transcriptionConfig", transcription.to_string())
    }
}

//! Agent Bridge Client
//!
//! Forwards a caller transcript to the conversational agent runtime and turns
//! its JSON answer into a single reply string that can be spoken on the call.
//! Failures never escape this module: every error path degrades to
//! [`FALLBACK_REPLY`] so a live phone call is never interrupted.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Spoken when the agent cannot be reached or its answer cannot be used.
pub const FALLBACK_REPLY: &str = "I'm sorry, I cannot process your request right now.";

/// Channel tag attached to every turn so the agent knows the caller is on a phone.
const SOURCE_TAG: &str = "twilio";

/// A reply produced by the agent for one transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
}

impl AgentReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn fallback() -> Self {
        Self::new(FALLBACK_REPLY)
    }

    /// True when there is nothing worth speaking.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("agent endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("request to agent endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agent reply could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid agent endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("agent endpoint cannot carry a path: {0}")]
    NotABase(String),
}

/// Sends a transcript to a conversational agent and returns what it said.
///
/// Implementations must not fail: transport problems are absorbed into a
/// degraded reply. The strategy is chosen once at startup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentBridge: Send + Sync {
    async fn send(&self, transcript: &str, session_id: &str) -> AgentReply;
}

/// The conversation turn posted to the agent runtime.
///
/// `userId` and `roomId` are derived from the call SID so that every turn of
/// the same call lands in the same conversation.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn<'a> {
    pub text: &'a str,
    pub user_id: String,
    pub room_id: String,
    pub source: &'static str,
}

impl<'a> ConversationTurn<'a> {
    pub fn new(transcript: &'a str, session_id: &str) -> Self {
        Self {
            text: transcript,
            user_id: format!("twilio-user-{session_id}"),
            room_id: format!("twilio-room-{session_id}"),
            source: SOURCE_TAG,
        }
    }
}

/// Accepted reply shapes: a list of messages (first one wins) or a single message.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplyPayload {
    Messages(Vec<ReplyMessage>),
    Message(ReplyMessage),
}

#[derive(Debug, Default, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<ReplyContent>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyContent {
    #[serde(default)]
    text: Option<String>,
}

impl ReplyMessage {
    fn into_text(self) -> Option<String> {
        non_blank(self.text).or_else(|| self.content.and_then(|c| non_blank(c.text)))
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

/// Decodes an agent response body.
///
/// Looks for `text`, then `content.text`, and falls back to [`FALLBACK_REPLY`]
/// when the body is well-formed JSON without either field.
pub fn decode_reply(body: &[u8]) -> Result<AgentReply, serde_json::Error> {
    let message = match serde_json::from_slice::<ReplyPayload>(body)? {
        ReplyPayload::Messages(messages) => messages.into_iter().next(),
        ReplyPayload::Message(message) => Some(message),
    };
    Ok(message
        .and_then(ReplyMessage::into_text)
        .map(AgentReply::new)
        .unwrap_or_else(AgentReply::fallback))
}

/// Builds `{base}/{agent_id}/message`, percent-encoding the agent id.
pub fn message_endpoint(base_url: &str, agent_id: &str) -> Result<Url, BridgeError> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| BridgeError::NotABase(base_url.to_string()))?
        .pop_if_empty()
        .push(agent_id)
        .push("message");
    Ok(url)
}

/// Talks to the agent runtime's REST message endpoint.
pub struct HttpAgentBridge {
    client: Client,
    endpoint: Url,
}

impl HttpAgentBridge {
    /// Creates a bridge for one agent.
    ///
    /// `timeout` bounds the whole request; expiry is reported as a transport
    /// error and answered with the fallback reply.
    pub fn new(base_url: &str, agent_id: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let endpoint = message_endpoint(base_url, agent_id)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Posts one turn and decodes the reply, surfacing every failure.
    pub async fn try_send(
        &self,
        transcript: &str,
        session_id: &str,
    ) -> Result<AgentReply, BridgeError> {
        let turn = ConversationTurn::new(transcript, session_id);
        info!(endpoint = %self.endpoint, session_id, "Forwarding transcript to agent");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&turn)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Status { status, body });
        }

        let body = response.bytes().await?;
        Ok(decode_reply(&body)?)
    }
}

#[async_trait]
impl AgentBridge for HttpAgentBridge {
    async fn send(&self, transcript: &str, session_id: &str) -> AgentReply {
        match self.try_send(transcript, session_id).await {
            Ok(reply) => {
                info!(session_id, reply = %reply.text, "Agent replied");
                reply
            }
            Err(e) => {
                warn!(session_id, error = %e, "Agent bridge failed; using fallback reply");
                AgentReply::fallback()
            }
        }
    }
}

/// Repeats the caller back. Lets a phone number be exercised without an agent runtime.
pub struct EchoAgentBridge;

#[async_trait]
impl AgentBridge for EchoAgentBridge {
    async fn send(&self, transcript: &str, _session_id: &str) -> AgentReply {
        AgentReply::new(format!("You said: {}", transcript.trim()))
    }
}

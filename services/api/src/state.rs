//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds everything the
//! handlers and websocket sessions share. It is built once in the composition
//! root and handed to the router behind an `Arc`.

use std::sync::Arc;

use callbridge_core::{
    agent_bridge::{AgentBridge, BridgeError, EchoAgentBridge, HttpAgentBridge},
    composer::VoiceComposer,
    signature::SignatureValidator,
};
use tracing::info;

use crate::{
    config::{AgentConfig, BridgeMode, Config},
    router::{MEDIA_STREAM_PATH, WEBHOOK_PATH},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub composer: Arc<VoiceComposer>,
    pub bridge: Arc<dyn AgentBridge>,
    pub validator: Arc<SignatureValidator>,
}

impl AppState {
    pub fn new(config: Config, bridge: Arc<dyn AgentBridge>) -> Self {
        let composer = VoiceComposer::new(
            Arc::clone(&bridge),
            config.voice.clone(),
            config.public_path(WEBHOOK_PATH),
            config.media_stream_url(MEDIA_STREAM_PATH),
            config.reply_deadline(),
        );
        let validator = SignatureValidator::new(config.twilio.auth_token.clone());

        Self {
            config: Arc::new(config),
            composer: Arc::new(composer),
            bridge,
            validator: Arc::new(validator),
        }
    }
}

/// Selects the agent bridge once, before the server starts.
pub fn build_bridge(agent: &AgentConfig) -> Result<Arc<dyn AgentBridge>, BridgeError> {
    match agent.mode {
        BridgeMode::Http => {
            let bridge = HttpAgentBridge::new(&agent.api_url, &agent.agent_id, agent.timeout)?;
            info!(endpoint = %bridge.endpoint(), "Using HTTP agent bridge");
            Ok(Arc::new(bridge))
        }
        BridgeMode::Echo => {
            info!("Using echo agent bridge");
            Ok(Arc::new(EchoAgentBridge))
        }
    }
}

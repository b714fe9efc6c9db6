use std::{fmt, net::SocketAddr, time::Duration};

use callbridge_core::{composer::VoiceSettings, session::DEFAULT_FLUSH_THRESHOLD};
use tracing::Level;
use url::Url;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which agent bridge the server talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeMode {
    Http,
    Echo,
}

/// Vendor account credentials and the public address the vendor calls back on.
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
    pub webhook_base_url: Url,
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("phone_number", &self.phone_number)
            .field("webhook_base_url", &self.webhook_base_url.as_str())
            .finish()
    }
}

impl TwilioConfig {
    /// Loads the four required vendor variables. Blank values count as missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_base = required("WEBHOOK_BASE_URL")?;
        Ok(Self {
            account_sid: required("TWILIO_ACCOUNT_SID")?,
            auth_token: required("TWILIO_AUTH_TOKEN")?,
            phone_number: required("TWILIO_PHONE_NUMBER")?,
            webhook_base_url: parse_base_url(&webhook_base)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub mode: BridgeMode,
    pub api_url: String,
    pub agent_id: String,
    pub timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub twilio: TwilioConfig,
    pub agent: AgentConfig,
    pub voice: VoiceSettings,
    pub validate_webhooks: bool,
    pub verify_account: bool,
    pub media_flush_chunks: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let twilio = TwilioConfig::from_env()?;

        let mode = match optional("AGENT_BRIDGE", "http").to_lowercase().as_str() {
            "http" => BridgeMode::Http,
            "echo" => BridgeMode::Echo,
            other => {
                return Err(ConfigError::InvalidValue(
                    "AGENT_BRIDGE".to_string(),
                    format!("'{}' is not one of http, echo", other),
                ));
            }
        };
        let agent = AgentConfig {
            mode,
            api_url: optional("AGENT_API_URL", "http://localhost:3000"),
            agent_id: optional("AGENT_ID", "First Help Agent"),
            timeout: Duration::from_millis(parse_var("AGENT_TIMEOUT_MS", 8000u64)?),
        };

        let defaults = VoiceSettings::default();
        let voice = VoiceSettings {
            language: optional("TWILIO_SPEECH_LANGUAGE", &defaults.language),
            voice: optional("TWILIO_TTS_VOICE", &defaults.voice),
            greeting: optional("TWILIO_GREETING_MESSAGE", &defaults.greeting),
            ..defaults
        };

        let media_flush_chunks = parse_var("MEDIA_FLUSH_CHUNKS", DEFAULT_FLUSH_THRESHOLD)?;
        if media_flush_chunks == 0 {
            return Err(ConfigError::InvalidValue(
                "MEDIA_FLUSH_CHUNKS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            log_level,
            twilio,
            agent,
            voice,
            validate_webhooks: parse_var("TWILIO_VALIDATE_WEBHOOKS", true)?,
            verify_account: parse_var("TWILIO_VERIFY_ACCOUNT", true)?,
            media_flush_chunks,
        })
    }

    /// `path` as the vendor sees it, under any path prefix in the base URL.
    pub fn public_path(&self, path: &str) -> String {
        let prefix = self.twilio.webhook_base_url.path().trim_end_matches('/');
        format!("{prefix}{path}")
    }

    /// The URL the vendor used to reach `path_and_query`, as it signs it.
    pub fn webhook_url(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.twilio.webhook_base_url.origin().ascii_serialization(),
            self.public_path(path_and_query)
        )
    }

    /// The websocket URL handed to the vendor in the stream directive.
    pub fn media_stream_url(&self, path: &str) -> String {
        let base = &self.twilio.webhook_base_url;
        let scheme = if base.scheme() == "http" { "ws" } else { "wss" };
        let host = base.host_str().unwrap_or_default();
        let path = self.public_path(path);
        match base.port() {
            Some(port) => format!("{scheme}://{host}:{port}{path}"),
            None => format!("{scheme}://{host}{path}"),
        }
    }

    /// Deadline for one agent round trip inside the voice webhook.
    pub fn reply_deadline(&self) -> Duration {
        self.agent.timeout + Duration::from_secs(1)
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

/// Accepts `https://host[:port][/path]` or a bare `host[:port]`, which is served over https.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| ConfigError::InvalidValue("WEBHOOK_BASE_URL".to_string(), e.to_string()))?;
    if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue(
            "WEBHOOK_BASE_URL".to_string(),
            format!("'{}' is not an http(s) URL", raw),
        ));
    }
    Ok(url)
}

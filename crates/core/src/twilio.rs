//! Vendor REST client for outbound SMS, outbound calls and credential checks.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Error)]
pub enum TwilioError {
    #[error("Twilio API error ({status}): {message}")]
    Api { status: StatusCode, message: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid API URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type TwilioResult<T> = Result<T, TwilioError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
    pub media_urls: Vec<String>,
}

/// What the vendor should execute once the callee answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// An inline markup document.
    Twiml(String),
    /// A URL the vendor fetches the document from.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    pub to: String,
    pub target: CallTarget,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub sid: String,
    pub friendly_name: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
struct CreatedResource {
    sid: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: Client,
    api_base: Url,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioClient {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> TwilioResult<Self> {
        Self::with_api_base(TWILIO_API_BASE, account_sid, auth_token, from_number)
    }

    /// Builds a client against another API host.
    pub fn with_api_base(
        api_base: &str,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> TwilioResult<Self> {
        Ok(Self {
            http: Client::new(),
            api_base: Url::parse(api_base)?,
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
        })
    }

    /// Fetches the account record, proving the credentials work.
    pub async fn verify_account(&self) -> TwilioResult<AccountInfo> {
        let url = self.account_url(".json")?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let account: AccountInfo = Self::check(response).await?.json().await?;
        info!(account_sid = %account.sid, status = ?account.status, "Twilio account verified");
        Ok(account)
    }

    /// Sends an SMS (or MMS when media URLs are given). Returns the message SID.
    pub async fn send_sms(&self, message: &SmsMessage) -> TwilioResult<String> {
        let mut form = vec![
            ("To", message.to.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", message.body.as_str()),
        ];
        form.extend(message.media_urls.iter().map(|media| ("MediaUrl", media.as_str())));

        let sid = self.create("/Messages.json", &form).await?;
        info!(message_sid = %sid, to = %message.to, "SMS queued");
        Ok(sid)
    }

    /// Places an outbound call. Returns the call SID.
    pub async fn place_call(&self, options: &CallOptions) -> TwilioResult<String> {
        let mut form = vec![("To", options.to.as_str()), ("From", self.from_number.as_str())];
        match &options.target {
            CallTarget::Twiml(document) => form.push(("Twiml", document.as_str())),
            CallTarget::Url(url) => form.push(("Url", url.as_str())),
        }

        let sid = self.create("/Calls.json", &form).await?;
        info!(call_sid = %sid, to = %options.to, "Outbound call placed");
        Ok(sid)
    }

    async fn create(&self, resource: &str, form: &[(&str, &str)]) -> TwilioResult<String> {
        let url = self.account_url(resource)?;
        debug!(%url, "POST to Twilio");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;
        let created: CreatedResource = Self::check(response).await?.json().await?;
        Ok(created.sid)
    }

    fn account_url(&self, suffix: &str) -> TwilioResult<Url> {
        let path = format!("/2010-04-01/Accounts/{}{}", self.account_sid, suffix);
        Ok(self.api_base.join(&path)?)
    }

    async fn check(response: reqwest::Response) -> TwilioResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.message)
            .unwrap_or(body);
        Err(TwilioError::Api { status, message })
    }
}

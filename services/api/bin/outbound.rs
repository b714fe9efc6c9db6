//! Command-line access to the vendor REST operations: send an SMS or place a call.

use anyhow::Context;
use callbridge_api::config::TwilioConfig;
use callbridge_core::twilio::{CallOptions, CallTarget, SmsMessage, TwilioClient};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Send SMS or place calls from the relay's Twilio number")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a text message.
    Sms {
        /// Destination number in E.164 form.
        #[arg(long)]
        to: String,
        #[arg(long)]
        body: String,
        /// Attach media by URL; may be repeated.
        #[arg(long = "media-url")]
        media_urls: Vec<String>,
    },
    /// Place an outbound call.
    Call {
        #[arg(long)]
        to: String,
        /// Inline markup document to execute when answered.
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        twiml: Option<String>,
        /// URL the vendor fetches the markup document from.
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let twilio = TwilioConfig::from_env().context("Failed to load Twilio configuration")?;
    let client = TwilioClient::new(twilio.account_sid, twilio.auth_token, twilio.phone_number)?;

    match cli.command {
        Command::Sms {
            to,
            body,
            media_urls,
        } => {
            let sid = client
                .send_sms(&SmsMessage {
                    to,
                    body,
                    media_urls,
                })
                .await
                .context("Failed to send SMS")?;
            info!(message_sid = %sid, "SMS sent");
            println!("{sid}");
        }
        Command::Call { to, twiml, url } => {
            let target = match (twiml, url) {
                (Some(document), _) => CallTarget::Twiml(document),
                (None, Some(url)) => CallTarget::Url(url),
                (None, None) => anyhow::bail!("either --twiml or --url is required"),
            };
            let sid = client
                .place_call(&CallOptions { to, target })
                .await
                .context("Failed to place call")?;
            info!(call_sid = %sid, "Call placed");
            println!("{sid}");
        }
    }
    Ok(())
}

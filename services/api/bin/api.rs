//! Main Entrypoint for the Call Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Verifying the vendor credentials.
//! 3. Selecting the agent bridge and building the shared state.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use callbridge_api::{
    config::Config,
    router::create_router,
    state::{AppState, build_bridge},
};
use callbridge_core::twilio::TwilioClient;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(twilio = ?config.twilio, "Configuration loaded. Initializing application state...");

    // --- 3. Verify vendor credentials ---
    if config.verify_account {
        let client = TwilioClient::new(
            config.twilio.account_sid.clone(),
            config.twilio.auth_token.clone(),
            config.twilio.phone_number.clone(),
        )?;
        client
            .verify_account()
            .await
            .context("Failed to verify Twilio account")?;
    } else {
        info!("Skipping Twilio account verification");
    }

    // --- 4. Initialize Shared Services ---
    let bridge = build_bridge(&config.agent).context("Failed to build agent bridge")?;
    let bind_address = config.bind_address;
    let webhook_url = config.webhook_url(callbridge_api::router::WEBHOOK_PATH);
    let validate_webhooks = config.validate_webhooks;
    let app_state = Arc::new(AppState::new(config, bridge));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        %bind_address,
        %webhook_url,
        validate_webhooks,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}

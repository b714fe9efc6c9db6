//! Axum Router Configuration

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware::require_twilio_signature, state::AppState, ws::ws_handler};

/// Voice webhook path; also the `action` of every gather.
pub const WEBHOOK_PATH: &str = "/api/twilio/call";
pub const HEALTH_PATH: &str = "/api/twilio/test";
pub const DEPRECATED_STREAM_PATH: &str = "/api/twilio/stream/{call_sid}";
pub const MEDIA_STREAM_PATH: &str = "/twilio/media";

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let signed = from_fn_with_state(Arc::clone(&app_state), require_twilio_signature);

    let voice_webhook = if app_state.config.validate_webhooks {
        post(handlers::voice_webhook).layer(signed.clone())
    } else {
        post(handlers::voice_webhook)
    };

    Router::new()
        .route(HEALTH_PATH, get(handlers::health))
        .route(WEBHOOK_PATH, get(handlers::voice_test).merge(voice_webhook))
        .route(
            DEPRECATED_STREAM_PATH,
            post(handlers::deprecated_stream).layer(signed),
        )
        .route(MEDIA_STREAM_PATH, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

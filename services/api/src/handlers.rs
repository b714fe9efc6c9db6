//! Axum handlers for the vendor-facing HTTP routes.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Path, State, rejection::FormRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use callbridge_core::{composer::CallWebhook, signature::SignatureError};
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

pub enum ApiError {
    Forbidden(SignatureError),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason.to_string()).into_response(),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
        }
    }
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        Self::Forbidden(err)
    }
}

/// A markup document with the content type the vendor expects.
pub struct Twiml(pub String);

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.0).into_response()
    }
}

/// JSON liveness check.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "message": "Twilio call relay is running",
    }))
}

/// Static document for checking the webhook is reachable from a browser.
pub async fn voice_test(State(state): State<Arc<AppState>>) -> Twiml {
    Twiml(state.composer.liveness())
}

/// The voice webhook. Always answers with a valid document.
pub async fn voice_webhook(
    State(state): State<Arc<AppState>>,
    form: Result<Form<CallWebhook>, FormRejection>,
) -> Twiml {
    let webhook = match form {
        Ok(Form(webhook)) => webhook,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable voice webhook form");
            return Twiml(state.composer.apology());
        }
    };

    info!(
        call_sid = ?webhook.call_sid(),
        call_status = ?webhook.call_status,
        from = ?webhook.from,
        has_speech = webhook.transcript().is_some(),
        "Voice webhook received"
    );
    Twiml(state.composer.respond(&webhook).await)
}

/// Superseded by the media relay websocket; kept so old call flows get an answer.
pub async fn deprecated_stream(Path(call_sid): Path<String>) -> Result<impl IntoResponse, ApiError> {
    if call_sid.trim().is_empty() {
        return Err(ApiError::BadRequest("call_sid is required".to_string()));
    }
    warn!(%call_sid, "Deprecated stream endpoint called");
    Ok(Json(json!({
        "status": "deprecated",
        "message": "Audio is relayed over the media stream websocket",
        "callSid": call_sid,
    })))
}

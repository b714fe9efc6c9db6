use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use callbridge_core::signature::SIGNATURE_HEADER;
use tracing::debug;

use crate::{handlers::ApiError, state::AppState};

/// Webhook bodies are small form posts; anything bigger is not from the vendor.
const MAX_WEBHOOK_BODY: usize = 64 * 1024;

/// Rejects requests whose signature header does not match the body and public URL.
///
/// The body is buffered for validation and handed on unchanged.
pub async fn require_twilio_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_WEBHOOK_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {e}")))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let url = state.config.webhook_url(path_and_query);
    let claimed = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    state.validator.validate(&url, &body_bytes, claimed)?;
    debug!(%url, "Signed webhook accepted");

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

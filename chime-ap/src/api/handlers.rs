//! HTTP request handlers

use crate::api::server::AppContext;
use crate::status::StatusSnapshot;
use axum::{extract::State, http::StatusCode, Json};
use chime_common::{NotificationEvent, SubmitOutcome};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    accepting: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "chime-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        accepting: !ctx.pipeline.is_closed(),
    })
}

// ============================================================================
// Event Submission
// ============================================================================

/// POST /api/v1/events
///
/// Every gate decision is a normal response carrying the outcome. Only an
/// admitted event gets `202 Accepted`; a closed pipeline gets `503`.
pub async fn submit_event(
    State(ctx): State<AppContext>,
    Json(notification): Json<NotificationEvent>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    if notification.event_type.trim().is_empty() {
        return Err(bad_request("event_type must not be empty"));
    }
    if notification.sound_id.trim().is_empty() {
        return Err(bad_request("sound_id must not be empty"));
    }
    debug!(event_type = %notification.event_type, "Submit via HTTP");

    let outcome = ctx.pipeline.submit(notification);
    let status = match outcome {
        SubmitOutcome::Admitted { .. } => StatusCode::ACCEPTED,
        SubmitOutcome::Closed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

// ============================================================================
// Status
// ============================================================================

/// GET /api/v1/status
pub async fn get_status(State(ctx): State<AppContext>) -> Json<StatusSnapshot> {
    Json(ctx.pipeline.status())
}

//! Annotator-facing endpoints
//!
//! Thin wrappers around [`SessionCoordinator`](crate::coordinator::SessionCoordinator);
//! each handler takes the session lock, runs one event to completion and
//! answers with its result.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::{NextImage, Page, SessionStatus, StopNotice};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/labels request
#[derive(Debug, Deserialize)]
pub struct SubmitLabelRequest {
    pub name: String,
}

/// POST /api/labels response
#[derive(Debug, Serialize)]
pub struct LabelsResponse {
    pub labels: Vec<String>,
}

/// POST /api/next request; `label` is the label for the image on screen
#[derive(Debug, Default, Deserialize)]
pub struct NextRequest {
    #[serde(default)]
    pub label: Option<String>,
}

/// GET /api/page
pub async fn get_page(State(state): State<AppState>) -> Json<Page> {
    Json(state.session.lock().await.page())
}

/// POST /api/labels
pub async fn submit_label(
    State(state): State<AppState>,
    Json(request): Json<SubmitLabelRequest>,
) -> Json<LabelsResponse> {
    let labels = state.session.lock().await.submit_label(&request.name);
    Json(LabelsResponse { labels })
}

/// POST /api/next
///
/// An empty body is the same as `{}`: no label for the current image.
pub async fn next_image(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> ApiResult<Json<NextImage>> {
    let request: NextRequest = if body.iter().all(u8::is_ascii_whitespace) {
        NextRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid next request: {}", e)))?
    };

    let label = request
        .label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());
    let next = state.session.lock().await.request_next(label);
    debug!(?next, "Next image answered");
    Ok(Json(next))
}

/// POST /api/stop
pub async fn stop(State(state): State<AppState>) -> Json<StopNotice> {
    Json(state.session.lock().await.request_stop())
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.lock().await.status())
}

/// Build annotator routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/page", get(get_page))
        .route("/api/labels", post(submit_label))
        .route("/api/next", post(next_image))
        .route("/api/stop", post(stop))
        .route("/api/status", get(status))
}

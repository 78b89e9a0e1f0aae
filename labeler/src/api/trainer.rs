//! Inbound notifications from the training service
//!
//! Bodies are read as raw bytes and parsed as JSON whatever the
//! `Content-Type` header says.

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use labeler_common::protocol::RankedImage;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /retrieve_query response
#[derive(Debug, Serialize)]
pub struct ReorderResponse {
    pub received: usize,
    /// Ranked names that matched a remaining candidate
    pub placed: usize,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: String,
}

/// POST /retrieve_query
///
/// Body: JSON list of `{filename, score?}`, best first.
pub async fn retrieve_query(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ReorderResponse>> {
    let ranked: Vec<RankedImage> = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ranking: {}", e)))?;
    let names: Vec<String> = ranked.into_iter().map(|r| r.filename).collect();

    let placed = state.session.lock().await.reorder(&names);
    Ok(Json(ReorderResponse {
        received: names.len(),
        placed,
    }))
}

/// POST /early_stopping
pub async fn early_stopping(State(state): State<AppState>) -> Json<AckResponse> {
    state.session.lock().await.early_stop();
    Json(AckResponse {
        status: "ok".to_string(),
    })
}

/// Build trainer-facing routes
pub fn trainer_routes() -> Router<AppState> {
    Router::new()
        .route("/retrieve_query", post(retrieve_query))
        .route("/early_stopping", post(early_stopping))
}

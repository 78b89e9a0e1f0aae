//! labeler library interface
//!
//! Exposes the session pieces and the router for integration testing.

pub mod api;
pub mod buffer;
pub mod catalog;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod store;

pub use crate::error::{ApiError, ApiResult, SessionError};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::coordinator::SessionCoordinator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The one annotation session; every event runs under this lock
    pub session: Arc<Mutex<SessionCoordinator>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(session: SessionCoordinator) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::session_routes())
        .merge(api::trainer_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

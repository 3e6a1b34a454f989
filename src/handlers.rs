use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::ThrottlerError;
use crate::fetcher::PostFetcher;
use crate::health::HealthChecker;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub fetcher: PostFetcher,
}

impl AppState {
    pub fn shared(fetcher: PostFetcher) -> SharedState {
        Arc::new(Self { fetcher })
    }
}

/// Fetch a post through the admission controller and return the upstream body
pub async fn get_post(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ThrottlerError> {
    state.fetcher.fetch_resource(id).await
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let status = HealthChecker::new(state.fetcher.admission())
        .check_health()
        .await;

    let code = if status.store.error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    match state.fetcher.admission().store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "disconnected",
                "error": err.to_string()
            })),
        ),
    }
}

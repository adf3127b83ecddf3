pub mod health;
pub mod metrics;
pub mod task;
pub mod user;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::middleware::auth::require_bearer;
use crate::services::{queue::QueueError, status_store::StoreError};

/// Build the health and API routes.
///
/// Task reads and the status stream are public; everything that creates,
/// mutates or identifies goes through the bearer middleware.
pub fn api_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/user", get(user::user_info))
        .route("/api/task", post(task::create_task))
        .route("/api/task/{id}", axum::routing::patch(task::update_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let public = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/task/{id}", get(task::get_task))
        .route("/api/task/{id}/sse", get(task::task_events));

    protected.merge(public).with_state(state)
}

/// Handler error. Bodies stay generic; details go to the log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Conflict(&'static str),

    #[error("validation failed: {0}")]
    Validation(#[from] garde::Report),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Conflict(message) => (StatusCode::CONFLICT, (*message).to_string()),
            Self::Validation(report) => (StatusCode::UNPROCESSABLE_ENTITY, report.to_string()),
            Self::Store(e) => {
                tracing::error!(error = %e, "Task status store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable".to_string(),
                )
            }
            Self::Queue(e) => {
                tracing::error!(error = %e, "Failed to enqueue task");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

//! API route definitions

mod alerts;
mod health;
mod opportunities;
mod sync;

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Create all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(opportunities::routes())
        .merge(alerts::routes())
        .merge(sync::routes())
        .merge(health::routes())
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

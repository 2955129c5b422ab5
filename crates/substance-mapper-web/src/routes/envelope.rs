//! Structured response envelope shared by every endpoint.
//!
//! Mapping endpoints never return an opaque 500: every error path still
//! carries a `status` field and either a `message` or the best-effort
//! partial result, because human reviewers downstream decide their next
//! step from the detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use substance_mapper::MapperError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                status: "success",
                data: Some(data),
                message: None,
                timestamp: Utc::now(),
            }),
        )
    }

    pub fn error(code: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            code,
            Json(Self {
                status: "error",
                data: None,
                message: Some(message.into()),
                timestamp: Utc::now(),
            }),
        )
    }

}

/// HTTP status for each error kind of the core taxonomy.
pub fn status_for(err: &MapperError) -> StatusCode {
    match err {
        MapperError::Validation(_) => StatusCode::BAD_REQUEST,
        MapperError::NotFound(_) => StatusCode::NOT_FOUND,
        MapperError::InvalidTransition(_) => StatusCode::CONFLICT,
        MapperError::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        MapperError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        MapperError::Encoding(_) | MapperError::Persistence(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Shorthand for the common "map error to envelope" tail position.
pub fn error_response<T: Serialize>(err: MapperError) -> Response {
    ApiResponse::<T>::error(status_for(&err), err.to_string()).into_response()
}

//! Human review endpoints over the certification store.
//!
//! - `POST /substance/correct/{id}` — apply a correction (reviewer required)
//! - `POST /substance/approve/{id}` — terminal confirmation
//! - `GET  /substance/review-queue` — records awaiting human attention

use crate::routes::envelope::{error_response, status_for, ApiResponse};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use substance_mapper::{Certification, CertificationStore, Correction};
use uuid::Uuid;

fn require_store(state: &AppState) -> Result<Arc<dyn CertificationStore>, Response> {
    state.store.clone().ok_or_else(|| {
        ApiResponse::<Certification>::error(
            StatusCode::SERVICE_UNAVAILABLE,
            "running without a database; review operations are unavailable",
        )
        .into_response()
    })
}

pub async fn correct(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(correction): Json<Correction>,
) -> Response {
    let store = match require_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    match store.apply_correction(id, &correction).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => {
            ApiResponse::<Certification>::error(status_for(&e), e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> Response {
    let store = match require_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    match store.approve(id, &request.reviewer).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => error_response::<Certification>(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewQueueParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn review_queue(
    State(state): State<AppState>,
    Query(params): Query<ReviewQueueParams>,
) -> Response {
    let store = match require_store(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    match store.list_pending_review(params.limit).await {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response::<Vec<Certification>>(e),
    }
}

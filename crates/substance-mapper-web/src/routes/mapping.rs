//! Substance mapping endpoints.
//!
//! - `POST /substance/map`        — single name
//! - `POST /substance/map-batch`  — list of names with aggregate counts
//! - `POST /substance/map-file`   — multipart upload (.csv/.xlsx/.xls)

use crate::routes::envelope::{error_response, ApiResponse};
use crate::state::AppState;
use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use substance_mapper::{ConfidenceBand, FileMappingResult, MapperError, MappingResult};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct MapRequest {
    pub substance_name: String,
}

pub async fn map_one(
    State(state): State<AppState>,
    Json(request): Json<MapRequest>,
) -> Response {
    match state.service.map_one(&request.substance_name).await {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => error_response::<MappingResult>(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MapBatchRequest {
    pub substance_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MapBatchResponse {
    pub results: Vec<MappingResult>,
    pub mapped_count: usize,
    pub needs_review_count: usize,
    pub not_mapped_count: usize,
    pub error_count: usize,
}

impl MapBatchResponse {
    fn from_results(results: Vec<MappingResult>) -> Self {
        let mut mapped = 0;
        let mut review = 0;
        let mut unmapped = 0;
        let mut errors = 0;
        for r in &results {
            match r.band {
                ConfidenceBand::Mapped => mapped += 1,
                ConfidenceBand::NeedsReview => review += 1,
                ConfidenceBand::NotMapped => unmapped += 1,
            }
            if r.error.is_some() {
                errors += 1;
            }
        }
        Self {
            results,
            mapped_count: mapped,
            needs_review_count: review,
            not_mapped_count: unmapped,
            error_count: errors,
        }
    }
}

pub async fn map_batch(
    State(state): State<AppState>,
    Json(request): Json<MapBatchRequest>,
) -> Response {
    match state.service.map_batch(&request.substance_names).await {
        Ok(results) => ApiResponse::ok(MapBatchResponse::from_results(results)).into_response(),
        Err(e) => error_response::<MapBatchResponse>(e),
    }
}

pub async fn map_file(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    // First file part wins; everything else in the form is ignored.
    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let filename = match field.file_name() {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((filename, bytes.to_vec()));
                        break;
                    }
                    Err(e) => {
                        return error_response::<FileMappingResult>(MapperError::Validation(
                            format!("failed to read upload: {e}"),
                        ));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response::<FileMappingResult>(MapperError::Validation(format!(
                    "malformed multipart body: {e}"
                )));
            }
        }
    }

    let Some((filename, bytes)) = upload else {
        return error_response::<FileMappingResult>(MapperError::Validation(
            "no file part in request".into(),
        ));
    };

    match state.service.map_file(&bytes, &filename).await {
        Ok(aggregate) => ApiResponse::ok(aggregate).into_response(),
        Err(e) => {
            warn!("file mapping failed for {}: {}", filename, e);
            error_response::<FileMappingResult>(e)
        }
    }
}

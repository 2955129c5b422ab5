//! Readiness probe.
//!
//! The orchestrating system checks this before routing mapping traffic;
//! a process that reached the serving loop has already loaded the model
//! and built the index (startup fails otherwise), so the flags report
//! what is actually held in memory.

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub model_loaded: bool,
    pub regulation_data_loaded: bool,
    pub index_ready: bool,
    pub corpus_size: usize,
    pub persistence_available: bool,
    pub encoder_id: String,
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let corpus_size = state.service.corpus_size();
    Json(StatusResponse {
        model_loaded: true,
        regulation_data_loaded: corpus_size > 0,
        index_ready: corpus_size > 0,
        corpus_size,
        persistence_available: state.service.has_store(),
        encoder_id: state.service.encoder_id().to_string(),
    })
}

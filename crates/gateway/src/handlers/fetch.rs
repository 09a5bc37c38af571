//! Fetch trigger handlers

use axum::{extract::State, Json};
use moodmap_common::{errors::Result, fetch::FetchStatusSnapshot, FetchOutcome};

use crate::AppState;

/// Run one fetch step; refusals are reported in the body, not as errors
pub async fn advance(State(state): State<AppState>) -> Result<Json<FetchOutcome>> {
    let outcome = state.coordinator.advance_once().await?;

    tracing::info!(outcome = outcome.label(), "Fetch step requested");

    Ok(Json(outcome))
}

/// Current fetch progress
pub async fn status(State(state): State<AppState>) -> Result<Json<FetchStatusSnapshot>> {
    Ok(Json(state.coordinator.status().await?))
}

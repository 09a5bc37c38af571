//! Country and mood rating handlers

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::middleware::client_ip::ClientIp;
use crate::AppState;
use moodmap_common::{
    countries::{CountrySnapshot, CountrySummary},
    errors::{AppError, Result},
    RatingOutcome,
};

/// Body of a mood submission
#[derive(Debug, Deserialize, Validate)]
pub struct MoodRequest {
    #[validate(range(min = 1, max = 10))]
    pub mood_score: i64,
}

#[derive(Debug, Serialize)]
pub struct MoodResponse {
    pub status: &'static str,
    pub updated: bool,
    pub user_mood_average: Option<f64>,
    pub user_mood_count: u64,
}

/// Every country on the map
pub async fn list_countries(State(state): State<AppState>) -> Result<Json<Vec<CountrySummary>>> {
    Ok(Json(state.countries.list().await?))
}

/// One country with its newest posts
pub async fn get_country(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CountrySnapshot>> {
    Ok(Json(state.countries.snapshot(&name, Utc::now()).await?))
}

/// Submit or overwrite the caller's mood rating for a country
pub async fn submit_mood(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ClientIp(ip): ClientIp,
    Json(request): Json<MoodRequest>,
) -> Result<Json<MoodResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("mood_score".to_string()),
    })?;

    match state
        .ratings
        .record_rating(&name, request.mood_score, &ip, Utc::now())
        .await?
    {
        RatingOutcome::Recorded { updated, summary } => Ok(Json(MoodResponse {
            status: if updated { "updated" } else { "created" },
            updated,
            user_mood_average: summary.average,
            user_mood_count: summary.count,
        })),
        RatingOutcome::RateLimited { wait } => Err(AppError::RateLimited {
            wait_secs: wait.as_secs_f64(),
        }),
    }
}

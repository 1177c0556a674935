use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use super::extract::{ApiJson, AuthUser};
use super::AppState;
use crate::db::AchievementStatus;
use crate::error::AppResult;
use crate::progress::{self, ActivityResult, ExperienceResult, ProgressView};

#[derive(Debug, Deserialize)]
pub struct ExperienceRequest {
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn get_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ProgressView>> {
    Ok(Json(progress::progress(&state.pool, &state.rules, user_id).await?))
}

async fn activity(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ActivityResult>> {
    let result = progress::record_activity(&state.pool, &state.rules, user_id, Utc::now()).await?;
    Ok(Json(result))
}

async fn experience(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ExperienceRequest>,
) -> AppResult<Json<ExperienceResult>> {
    let result = progress::add_experience(
        &state.pool,
        &state.rules,
        user_id,
        req.amount,
        req.reason.as_deref(),
        Utc::now(),
    )
    .await?;
    Ok(Json(result))
}

async fn achievements(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<AchievementStatus>>> {
    Ok(Json(progress::achievements(&state.pool, user_id).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/progress", get(get_progress))
        .route("/api/progress/activity", post(activity))
        .route("/api/progress/experience", post(experience))
        .route("/api/progress/achievements", get(achievements))
}

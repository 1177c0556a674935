use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use super::extract::{Admin, ApiJson, ApiPath, AuthUser};
use super::AppState;
use crate::ads::{self, AdReward, AvailableAd};
use crate::db::AdStats;
use crate::error::AppResult;
use crate::model::{Ad, NewAd};

#[derive(Debug, Serialize)]
pub struct ClickResponse {
    pub ad_id: i64,
    pub target_url: Option<String>,
}

/// GET /api/ads
async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<AvailableAd>>> {
    Ok(Json(ads::available_ads(&state.pool, user_id, Utc::now()).await?))
}

/// POST /api/ads (admin)
async fn create(
    State(state): State<Arc<AppState>>,
    _admin: Admin,
    ApiJson(new_ad): ApiJson<NewAd>,
) -> AppResult<(StatusCode, Json<Ad>)> {
    let ad = ads::create_ad(&state.pool, &new_ad, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(ad)))
}

/// POST /api/ads/{id}/view
async fn view(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiPath(ad_id): ApiPath<i64>,
) -> AppResult<Json<AdReward>> {
    let reward = ads::record_view(&state.pool, &state.rules, user_id, ad_id, Utc::now()).await?;
    Ok(Json(reward))
}

/// POST /api/ads/{id}/click
async fn click(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiPath(ad_id): ApiPath<i64>,
) -> AppResult<Json<ClickResponse>> {
    let target_url = ads::record_click(&state.pool, user_id, ad_id, Utc::now()).await?;
    Ok(Json(ClickResponse { ad_id, target_url }))
}

/// GET /api/ads/{id}/stats (admin)
async fn stats(
    State(state): State<Arc<AppState>>,
    _admin: Admin,
    ApiPath(ad_id): ApiPath<i64>,
) -> AppResult<Json<AdStats>> {
    Ok(Json(ads::ad_stats(&state.pool, ad_id).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/ads", get(list).post(create))
        .route("/api/ads/{id}/view", post(view))
        .route("/api/ads/{id}/click", post(click))
        .route("/api/ads/{id}/stats", get(stats))
}

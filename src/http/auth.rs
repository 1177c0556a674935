use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use super::extract::ApiJson;
use super::AppState;
use crate::auth::{self, SignIn};
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub init_data: String,
}

/// POST /api/auth/telegram
async fn sign_in(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SignInRequest>,
) -> AppResult<Json<SignIn>> {
    let signed = auth::sign_in(
        &state.pool,
        state.identity.as_deref(),
        &state.auth,
        &req.init_data,
        Utc::now(),
    )
    .await?;
    Ok(Json(signed))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/auth/telegram", post(sign_in))
}

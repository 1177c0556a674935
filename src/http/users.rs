use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::extract::{ApiJson, ApiQuery, AuthUser};
use super::AppState;
use crate::auth::{self, ConnectCode};
use crate::db::{self, LeaderboardEntry};
use crate::error::{AppError, AppResult};
use crate::model::{NotificationSettings, User};

const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
const MAX_LEADERBOARD_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: User,
    pub bot_linked: bool,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub linked: bool,
    #[serde(flatten)]
    pub settings: NotificationSettings,
}

/// Partial update; omitted topics keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct NotificationsPatch {
    pub level_up: Option<bool>,
    pub achievements: Option<bool>,
    pub streak: Option<bool>,
    pub ads: Option<bool>,
}

impl NotificationsPatch {
    fn apply(&self, mut settings: NotificationSettings) -> NotificationSettings {
        if let Some(v) = self.level_up {
            settings.level_up = v;
        }
        if let Some(v) = self.achievements {
            settings.achievements = v;
        }
        if let Some(v) = self.streak {
            settings.streak = v;
        }
        if let Some(v) = self.ads {
            settings.ads = v;
        }
        settings
    }
}

async fn load_user(state: &AppState, user_id: i64) -> AppResult<User> {
    db::get_user(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {user_id} not found")))
}

/// GET /api/users/me
async fn me(State(state): State<Arc<AppState>>, AuthUser(user_id): AuthUser) -> AppResult<Json<MeResponse>> {
    let user = load_user(&state, user_id).await?;
    let bot_linked = db::find_chat_for_user(&state.pool, user_id).await?.is_some();
    Ok(Json(MeResponse { user, bot_linked }))
}

/// GET /api/users/leaderboard?limit=
async fn leaderboard(
    State(state): State<Arc<AppState>>,
    AuthUser(_): AuthUser,
    ApiQuery(q): ApiQuery<LeaderboardQuery>,
) -> AppResult<Json<Vec<LeaderboardEntry>>> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    Ok(Json(db::leaderboard(&state.pool, limit).await?))
}

/// POST /api/users/me/connect-code
async fn connect_code(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<(StatusCode, Json<ConnectCode>)> {
    let code = auth::issue_connect_code(
        &state.pool,
        user_id,
        state.auth.connect_code_ttl_secs,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(code)))
}

/// GET /api/users/me/notifications
async fn get_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<NotificationsResponse>> {
    let response = match db::find_chat_for_user(&state.pool, user_id).await? {
        Some(chat) => NotificationsResponse {
            linked: true,
            settings: chat.settings(),
        },
        None => NotificationsResponse {
            linked: false,
            settings: NotificationSettings::default(),
        },
    };
    Ok(Json(response))
}

/// PATCH /api/users/me/notifications
async fn patch_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiJson(patch): ApiJson<NotificationsPatch>,
) -> AppResult<Json<NotificationsResponse>> {
    let chat = db::find_chat_for_user(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("no Telegram chat is linked to this user"))?;
    let settings = patch.apply(chat.settings());
    db::update_user_notifications(&state.pool, user_id, &settings).await?;
    Ok(Json(NotificationsResponse {
        linked: true,
        settings,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users/me", get(me))
        .route("/api/users/leaderboard", get(leaderboard))
        .route("/api/users/me/connect-code", post(connect_code))
        .route(
            "/api/users/me/notifications",
            get(get_notifications).patch(patch_notifications),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_keeps_omitted_topics() {
        let patch: NotificationsPatch = serde_json::from_str(r#"{"streak":false}"#).unwrap();
        let out = patch.apply(NotificationSettings::default());
        assert!(!out.streak);
        assert!(out.level_up && out.achievements && out.ads);
    }
}

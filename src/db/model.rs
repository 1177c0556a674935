//! View models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! lives in the service modules.

use serde::Serialize;

use crate::model::Achievement;

/// Fields used to create or refresh a user from Telegram identity data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub tg_user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

/// Catalog entry annotated with the caller's unlock time.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AchievementStatus {
    #[serde(flatten)]
    pub achievement: Achievement,
    pub unlocked: bool,
    pub unlocked_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub level: i64,
    pub experience: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AdStats {
    pub ad_id: i64,
    pub views: i64,
    pub rewarded_views: i64,
    pub clicks: i64,
}

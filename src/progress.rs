//! Progress service: experience, levels, streaks and achievement unlocks.
//!
//! Every mutation runs in one transaction together with the outbox rows it
//! produces, so a crossed threshold is notified exactly once.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::achievements::{newly_unlocked, UserStats};
use crate::db::{self, AchievementStatus, Pool, Tx};
use crate::error::{AppError, AppResult};
use crate::leveling::{self, LevelUp, ProgressSummary, Rules, StreakChange};
use crate::model::UserLevel;
use crate::notify::Notification;

/// Largest experience grant accepted from a single client call.
pub const MAX_EXPERIENCE_GRANT: i64 = 1_000;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnlockedAchievement {
    pub id: i64,
    pub code: String,
    pub icon: String,
    pub name: String,
    pub reward_points: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExperienceResult {
    pub experience: i64,
    pub level: i64,
    pub level_ups: Vec<LevelUp>,
    pub achievements_unlocked: Vec<UnlockedAchievement>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActivityResult {
    pub change: StreakChange,
    pub streak: i64,
    pub longest_streak: i64,
    pub milestone: bool,
    pub experience_awarded: i64,
    pub experience: i64,
    pub level: i64,
    pub level_ups: Vec<LevelUp>,
    pub achievements_unlocked: Vec<UnlockedAchievement>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressView {
    pub user_id: i64,
    #[serde(flatten)]
    pub summary: ProgressSummary,
    pub streak: i64,
    pub longest_streak: i64,
    pub last_active_date: Option<NaiveDate>,
    pub ads_watched: i64,
    pub achievements_unlocked: usize,
}

/// Add experience inside `tx`, queueing one level-up notification per
/// crossed threshold.
pub(crate) async fn grant_experience_tx(
    tx: &mut Tx<'_>,
    ul: &mut UserLevel,
    amount: i64,
    rules: &Rules,
    now: i64,
) -> anyhow::Result<Vec<LevelUp>> {
    let mut state = ul.level_state();
    let ups = leveling::apply_experience(&mut state, amount, rules);
    ul.experience = state.experience;
    ul.level = state.level;
    for up in &ups {
        db::enqueue_notification_tx(tx, ul.user_id, &Notification::LevelUp { level: up.level }, now)
            .await?;
    }
    Ok(ups)
}

/// Unlock every newly satisfied achievement inside `tx`, crediting reward
/// points and queueing notifications.
pub(crate) async fn unlock_achievements_tx(
    tx: &mut Tx<'_>,
    ul: &UserLevel,
    now: i64,
) -> anyhow::Result<Vec<UnlockedAchievement>> {
    let catalog = db::list_achievements(&mut **tx).await?;
    let unlocked_ids = db::unlocked_achievement_ids(&mut **tx, ul.user_id).await?;
    let stats = UserStats::from(ul);

    let mut unlocked = Vec::new();
    for ach in newly_unlocked(&catalog, &unlocked_ids, &stats) {
        if !db::insert_user_achievement_tx(tx, ul.user_id, ach.id, now).await? {
            continue;
        }
        if ach.reward_points > 0 {
            db::credit_user_tx(tx, ul.user_id, ach.reward_points, 0).await?;
        }
        db::enqueue_notification_tx(
            tx,
            ul.user_id,
            &Notification::AchievementUnlocked {
                icon: ach.icon.clone(),
                name: ach.name.clone(),
                description: ach.description.clone(),
            },
            now,
        )
        .await?;
        info!(user_id = ul.user_id, code = %ach.code, "achievement unlocked");
        unlocked.push(UnlockedAchievement {
            id: ach.id,
            code: ach.code.clone(),
            icon: ach.icon.clone(),
            name: ach.name.clone(),
            reward_points: ach.reward_points,
        });
    }
    Ok(unlocked)
}

async fn require_user(pool: &Pool, user_id: i64) -> AppResult<()> {
    match db::get_user(pool, user_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::not_found(format!("user {user_id} not found"))),
    }
}

#[instrument(skip(pool, rules, now))]
pub async fn add_experience(
    pool: &Pool,
    rules: &Rules,
    user_id: i64,
    amount: i64,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<ExperienceResult> {
    if amount <= 0 {
        return Err(AppError::invalid("amount must be positive"));
    }
    if amount > MAX_EXPERIENCE_GRANT {
        return Err(AppError::invalid(format!(
            "amount must be at most {MAX_EXPERIENCE_GRANT}"
        )));
    }
    require_user(pool, user_id).await?;

    let ts = now.timestamp();
    let mut tx = pool.begin().await?;
    let mut ul = db::load_user_level_tx(&mut tx, user_id, ts).await?;
    let level_ups = grant_experience_tx(&mut tx, &mut ul, amount, rules, ts).await?;
    ul.updated_at = ts;
    db::save_user_level_tx(&mut tx, &ul).await?;
    let achievements_unlocked = unlock_achievements_tx(&mut tx, &ul, ts).await?;
    tx.commit().await?;

    info!(
        user_id,
        amount,
        reason = reason.unwrap_or("unspecified"),
        level = ul.level,
        level_ups = level_ups.len(),
        "experience added"
    );
    Ok(ExperienceResult {
        experience: ul.experience,
        level: ul.level,
        level_ups,
        achievements_unlocked,
    })
}

/// Daily check-in. The first activity of a UTC day updates the streak and
/// grants `daily_experience`; later calls on the same day change nothing.
#[instrument(skip(pool, rules, now))]
pub async fn record_activity(
    pool: &Pool,
    rules: &Rules,
    user_id: i64,
    now: DateTime<Utc>,
) -> AppResult<ActivityResult> {
    require_user(pool, user_id).await?;

    let ts = now.timestamp();
    let today = now.date_naive();
    let mut tx = pool.begin().await?;
    let mut ul = db::load_user_level_tx(&mut tx, user_id, ts).await?;

    let mut streak = ul.streak_state();
    let change = leveling::apply_activity(&mut streak, today);
    let mut result = ActivityResult {
        change,
        streak: streak.streak,
        longest_streak: streak.longest_streak,
        milestone: false,
        experience_awarded: 0,
        experience: ul.experience,
        level: ul.level,
        level_ups: Vec::new(),
        achievements_unlocked: Vec::new(),
    };
    if !change.is_new_day() {
        tx.commit().await?;
        return Ok(result);
    }

    ul.streak = streak.streak;
    ul.longest_streak = streak.longest_streak;
    ul.last_active_date = streak.last_active_date;
    ul.updated_at = ts;

    if rules.daily_experience > 0 {
        result.level_ups =
            grant_experience_tx(&mut tx, &mut ul, rules.daily_experience, rules, ts).await?;
        result.experience_awarded = rules.daily_experience;
    }
    if leveling::is_milestone(ul.streak, rules) {
        result.milestone = true;
        db::enqueue_notification_tx(
            &mut tx,
            user_id,
            &Notification::StreakMilestone { days: ul.streak },
            ts,
        )
        .await?;
    }
    db::save_user_level_tx(&mut tx, &ul).await?;
    result.achievements_unlocked = unlock_achievements_tx(&mut tx, &ul, ts).await?;
    tx.commit().await?;

    info!(user_id, streak = ul.streak, change = ?change, "activity recorded");
    result.experience = ul.experience;
    result.level = ul.level;
    Ok(result)
}

pub async fn progress(pool: &Pool, rules: &Rules, user_id: i64) -> AppResult<ProgressView> {
    require_user(pool, user_id).await?;
    let ul = db::ensure_user_level(pool, user_id, Utc::now().timestamp()).await?;
    let unlocked = db::unlocked_achievement_ids(pool, user_id).await?;
    Ok(ProgressView {
        user_id,
        summary: leveling::progress_summary(&ul.level_state(), rules),
        streak: ul.streak,
        longest_streak: ul.longest_streak,
        last_active_date: ul.last_active_date,
        ads_watched: ul.ads_watched,
        achievements_unlocked: unlocked.len(),
    })
}

pub async fn achievements(pool: &Pool, user_id: i64) -> AppResult<Vec<AchievementStatus>> {
    require_user(pool, user_id).await?;
    Ok(db::achievements_for_user(pool, user_id).await?)
}

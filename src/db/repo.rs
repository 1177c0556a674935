use super::model::{AchievementStatus, AdStats, LeaderboardEntry, NewUser};
use crate::achievements::Criteria;
use crate::model::{
    Achievement, Ad, NewAd, NotificationSettings, OutboxTask, RewardType, TelegramUser, Topic,
    User, UserLevel,
};
use crate::notify::Notification;
use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;
pub type Tx<'a> = Transaction<'a, Sqlite>;

const USER_COLUMNS: &str = "id, tg_user_id, username, first_name, last_name, language_code, \
     external_id, balance, points, level, created_at";
const LEVEL_COLUMNS: &str = "user_id, experience, level, streak, longest_streak, \
     last_active_date, ads_watched, updated_at";
const CHAT_COLUMNS: &str = "chat_id, user_id, username, notify_level_up, notify_achievements, \
     notify_streak, notify_ads, created_at";
const AD_COLUMNS: &str = "id, title, description, media_url, target_url, reward_type, \
     reward_amount, min_level, max_level, languages, daily_limit, active, created_at";
const ACHIEVEMENT_COLUMNS: &str = "id, code, icon, name, description, criteria, reward_points";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Migrated in-memory database on a single connection, so every query sees
/// the same data.
pub async fn init_memory_pool() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent
/// directory exists. Non-file URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ping(pool: &Pool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

// ---------------------------------------------------------------------------
// users

#[instrument(skip_all)]
pub async fn upsert_user(pool: &Pool, new: &NewUser, now: i64) -> Result<User> {
    let sql = format!(
        "INSERT INTO users (tg_user_id, username, first_name, last_name, language_code, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(tg_user_id) DO UPDATE SET username = excluded.username, \
         first_name = excluded.first_name, last_name = excluded.last_name, \
         language_code = excluded.language_code \
         RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(new.tg_user_id)
        .bind(&new.username)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.language_code)
        .bind(now)
        .fetch_one(pool)
        .await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn get_user<'e, E>(ex: E, user_id: i64) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(user_id)
        .fetch_optional(ex)
        .await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn find_user_by_tg_id(pool: &Pool, tg_user_id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tg_user_id = ?");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(tg_user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn set_user_external_id(pool: &Pool, user_id: i64, external_id: &str) -> Result<()> {
    sqlx::query("UPDATE users SET external_id = ? WHERE id = ?")
        .bind(external_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to persist external identity id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn credit_user_tx(
    tx: &mut Tx<'_>,
    user_id: i64,
    points: i64,
    balance: i64,
) -> Result<()> {
    sqlx::query("UPDATE users SET points = points + ?, balance = balance + ? WHERE id = ?")
        .bind(points)
        .bind(balance)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn leaderboard(pool: &Pool, limit: i64) -> Result<Vec<LeaderboardEntry>> {
    let rows = sqlx::query_as::<_, LeaderboardEntry>(
        "SELECT u.id AS user_id, u.username, u.first_name, l.level, l.experience \
         FROM user_levels l JOIN users u ON u.id = l.user_id \
         ORDER BY l.experience DESC, u.id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// user levels

/// Fetch the level row, creating a default one on first use.
#[instrument(skip_all)]
pub async fn load_user_level_tx(tx: &mut Tx<'_>, user_id: i64, now: i64) -> Result<UserLevel> {
    sqlx::query("INSERT OR IGNORE INTO user_levels (user_id, updated_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    let sql = format!("SELECT {LEVEL_COLUMNS} FROM user_levels WHERE user_id = ?");
    let level = sqlx::query_as::<_, UserLevel>(&sql)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(level)
}

pub async fn ensure_user_level(pool: &Pool, user_id: i64, now: i64) -> Result<UserLevel> {
    let mut tx = pool.begin().await?;
    let level = load_user_level_tx(&mut tx, user_id, now).await?;
    tx.commit().await?;
    Ok(level)
}

#[instrument(skip_all)]
pub async fn get_user_level<'e, E>(ex: E, user_id: i64) -> Result<Option<UserLevel>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {LEVEL_COLUMNS} FROM user_levels WHERE user_id = ?");
    let level = sqlx::query_as::<_, UserLevel>(&sql)
        .bind(user_id)
        .fetch_optional(ex)
        .await?;
    Ok(level)
}

/// Persist counters and mirror the level onto `users.level`.
#[instrument(skip_all)]
pub async fn save_user_level_tx(tx: &mut Tx<'_>, ul: &UserLevel) -> Result<()> {
    sqlx::query(
        "UPDATE user_levels SET experience = ?, level = ?, streak = ?, longest_streak = ?, \
         last_active_date = ?, ads_watched = ?, updated_at = ? WHERE user_id = ?",
    )
    .bind(ul.experience)
    .bind(ul.level)
    .bind(ul.streak)
    .bind(ul.longest_streak)
    .bind(ul.last_active_date)
    .bind(ul.ads_watched)
    .bind(ul.updated_at)
    .bind(ul.user_id)
    .execute(&mut **tx)
    .await?;
    sqlx::query("UPDATE users SET level = ? WHERE id = ?")
        .bind(ul.level)
        .bind(ul.user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// achievements

fn achievement_from_row(row: &SqliteRow) -> Result<Achievement> {
    let raw: String = row.try_get("criteria")?;
    let id: i64 = row.try_get("id")?;
    let criteria: Criteria = serde_json::from_str(&raw)
        .with_context(|| format!("achievement {id} has invalid criteria {raw}"))?;
    Ok(Achievement {
        id,
        code: row.try_get("code")?,
        icon: row.try_get("icon")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        criteria,
        reward_points: row.try_get("reward_points")?,
    })
}

#[instrument(skip_all)]
pub async fn list_achievements<'e, E>(ex: E) -> Result<Vec<Achievement>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {ACHIEVEMENT_COLUMNS} FROM achievements ORDER BY id");
    let rows = sqlx::query(&sql).fetch_all(ex).await?;
    rows.iter().map(achievement_from_row).collect()
}

#[instrument(skip_all)]
pub async fn unlocked_achievement_ids<'e, E>(ex: E, user_id: i64) -> Result<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT achievement_id FROM user_achievements WHERE user_id = ? ORDER BY achievement_id",
    )
    .bind(user_id)
    .fetch_all(ex)
    .await?;
    Ok(ids)
}

/// Returns false when the achievement was already unlocked.
#[instrument(skip_all)]
pub async fn insert_user_achievement_tx(
    tx: &mut Tx<'_>,
    user_id: i64,
    achievement_id: i64,
    now: i64,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO user_achievements (user_id, achievement_id, unlocked_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(achievement_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn achievements_for_user(pool: &Pool, user_id: i64) -> Result<Vec<AchievementStatus>> {
    let rows = sqlx::query(
        "SELECT a.id, a.code, a.icon, a.name, a.description, a.criteria, a.reward_points, \
                ua.unlocked_at \
         FROM achievements a \
         LEFT JOIN user_achievements ua ON ua.achievement_id = a.id AND ua.user_id = ? \
         ORDER BY a.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| -> Result<AchievementStatus> {
            let unlocked_at: Option<i64> = row.try_get("unlocked_at")?;
            Ok(AchievementStatus {
                achievement: achievement_from_row(row)?,
                unlocked: unlocked_at.is_some(),
                unlocked_at,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// telegram chats

#[instrument(skip_all)]
pub async fn register_chat(
    pool: &Pool,
    chat_id: i64,
    username: Option<&str>,
    now: i64,
) -> Result<TelegramUser> {
    let sql = format!(
        "INSERT INTO telegram_users (chat_id, username, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(chat_id) DO UPDATE SET username = COALESCE(excluded.username, telegram_users.username) \
         RETURNING {CHAT_COLUMNS}"
    );
    let chat = sqlx::query_as::<_, TelegramUser>(&sql)
        .bind(chat_id)
        .bind(username)
        .bind(now)
        .fetch_one(pool)
        .await?;
    Ok(chat)
}

#[instrument(skip_all)]
pub async fn get_chat(pool: &Pool, chat_id: i64) -> Result<Option<TelegramUser>> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM telegram_users WHERE chat_id = ?");
    let chat = sqlx::query_as::<_, TelegramUser>(&sql)
        .bind(chat_id)
        .fetch_optional(pool)
        .await?;
    Ok(chat)
}

#[instrument(skip_all)]
pub async fn link_chat(pool: &Pool, chat_id: i64, user_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    if !link_chat_tx(&mut tx, chat_id, user_id).await? {
        return Err(anyhow!("chat {} is not registered", chat_id));
    }
    tx.commit().await?;
    Ok(())
}

/// Point `chat_id` at `user_id`. Returns false when the chat is unknown.
pub async fn link_chat_tx(tx: &mut Tx<'_>, chat_id: i64, user_id: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE telegram_users SET user_id = ? WHERE chat_id = ?")
        .bind(user_id)
        .bind(chat_id)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Most recently registered chat linked to `user_id`.
#[instrument(skip_all)]
pub async fn find_chat_for_user(pool: &Pool, user_id: i64) -> Result<Option<TelegramUser>> {
    let sql = format!(
        "SELECT {CHAT_COLUMNS} FROM telegram_users WHERE user_id = ? \
         ORDER BY created_at DESC, chat_id DESC LIMIT 1"
    );
    let chat = sqlx::query_as::<_, TelegramUser>(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(chat)
}

#[instrument(skip_all)]
pub async fn set_chat_notification(
    pool: &Pool,
    chat_id: i64,
    topic: Topic,
    enabled: bool,
) -> Result<()> {
    let sql = format!(
        "UPDATE telegram_users SET {} = ? WHERE chat_id = ?",
        topic.column()
    );
    sqlx::query(&sql)
        .bind(enabled)
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply settings to every chat linked to `user_id`; returns the number of chats.
#[instrument(skip_all)]
pub async fn update_user_notifications(
    pool: &Pool,
    user_id: i64,
    settings: &NotificationSettings,
) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE telegram_users SET notify_level_up = ?, notify_achievements = ?, \
         notify_streak = ?, notify_ads = ? WHERE user_id = ?",
    )
    .bind(settings.level_up)
    .bind(settings.achievements)
    .bind(settings.streak)
    .bind(settings.ads)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// sessions and connect codes

pub async fn insert_session(
    pool: &Pool,
    token_hash: &str,
    user_id: i64,
    expires_at: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn session_user_id(pool: &Pool, token_hash: &str, now: i64) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM sessions WHERE token_hash = ? AND expires_at > ?",
    )
    .bind(token_hash)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn purge_expired_sessions(pool: &Pool, now: i64) -> Result<u64> {
    let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn insert_connect_code(
    pool: &Pool,
    code: &str,
    user_id: i64,
    expires_at: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO connect_codes (code, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(code)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete the code and return its user when it exists and has not expired.
#[instrument(skip_all)]
pub async fn consume_connect_code(pool: &Pool, code: &str, now: i64) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let user_id = consume_connect_code_tx(&mut tx, code, now).await?;
    tx.commit().await?;
    Ok(user_id)
}

/// Transactional [`consume_connect_code`]. Expired codes are purged too.
pub async fn consume_connect_code_tx(tx: &mut Tx<'_>, code: &str, now: i64) -> Result<Option<i64>> {
    let row = sqlx::query_as::<_, (i64, i64)>(
        "DELETE FROM connect_codes WHERE code = ? RETURNING user_id, expires_at",
    )
    .bind(code)
    .fetch_optional(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM connect_codes WHERE expires_at < ?")
        .bind(now)
        .execute(&mut **tx)
        .await?;
    Ok(row
        .filter(|(_, expires_at)| *expires_at >= now)
        .map(|(user_id, _)| user_id))
}

// ---------------------------------------------------------------------------
// ads

fn ad_from_row(row: &SqliteRow) -> Result<Ad> {
    let id: i64 = row.try_get("id")?;
    let reward: String = row.try_get("reward_type")?;
    let reward_type = RewardType::parse(&reward)
        .ok_or_else(|| anyhow!("ad {} has unknown reward type {}", id, reward))?;
    let languages: String = row.try_get("languages")?;
    let languages: Vec<String> = serde_json::from_str(&languages)
        .with_context(|| format!("ad {id} languages is not a JSON array"))?;
    Ok(Ad {
        id,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        media_url: row.try_get("media_url")?,
        target_url: row.try_get("target_url")?,
        reward_type,
        reward_amount: row.try_get("reward_amount")?,
        min_level: row.try_get("min_level")?,
        max_level: row.try_get("max_level")?,
        languages,
        daily_limit: row.try_get("daily_limit")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

#[instrument(skip_all)]
pub async fn insert_ad(pool: &Pool, ad: &NewAd, now: i64) -> Result<Ad> {
    let sql = format!(
        "INSERT INTO ads (title, description, media_url, target_url, reward_type, reward_amount, \
         min_level, max_level, languages, daily_limit, active, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {AD_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(&ad.title)
        .bind(&ad.description)
        .bind(&ad.media_url)
        .bind(&ad.target_url)
        .bind(ad.reward_type.as_str())
        .bind(ad.reward_amount)
        .bind(ad.min_level)
        .bind(ad.max_level)
        .bind(serde_json::to_string(&ad.languages)?)
        .bind(ad.daily_limit)
        .bind(ad.active)
        .bind(now)
        .fetch_one(pool)
        .await?;
    ad_from_row(&row)
}

#[instrument(skip_all)]
pub async fn get_ad<'e, E>(ex: E, ad_id: i64) -> Result<Option<Ad>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {AD_COLUMNS} FROM ads WHERE id = ?");
    let row = sqlx::query(&sql).bind(ad_id).fetch_optional(ex).await?;
    row.as_ref().map(ad_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_active_ads(pool: &Pool) -> Result<Vec<Ad>> {
    let sql = format!("SELECT {AD_COLUMNS} FROM ads WHERE active = 1 ORDER BY id");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(ad_from_row).collect()
}

#[instrument(skip_all)]
pub async fn count_ad_views_since<'e, E>(ex: E, user_id: i64, ad_id: i64, since: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let cnt = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM ad_views WHERE user_id = ? AND ad_id = ? AND viewed_at >= ?",
    )
    .bind(user_id)
    .bind(ad_id)
    .bind(since)
    .fetch_one(ex)
    .await?;
    Ok(cnt)
}

pub async fn insert_ad_view_tx(
    tx: &mut Tx<'_>,
    ad_id: i64,
    user_id: i64,
    now: i64,
    rewarded: bool,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO ad_views (ad_id, user_id, viewed_at, rewarded) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(ad_id)
    .bind(user_id)
    .bind(now)
    .bind(rewarded)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

pub async fn insert_ad_click(pool: &Pool, ad_id: i64, user_id: i64, now: i64) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO ad_clicks (ad_id, user_id, clicked_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(ad_id)
    .bind(user_id)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn ad_stats(pool: &Pool, ad_id: i64) -> Result<AdStats> {
    let row = sqlx::query(
        "SELECT \
           (SELECT COUNT(*) FROM ad_views WHERE ad_id = ?) AS views, \
           (SELECT COUNT(*) FROM ad_views WHERE ad_id = ? AND rewarded = 1) AS rewarded_views, \
           (SELECT COUNT(*) FROM ad_clicks WHERE ad_id = ?) AS clicks",
    )
    .bind(ad_id)
    .bind(ad_id)
    .bind(ad_id)
    .fetch_one(pool)
    .await?;
    Ok(AdStats {
        ad_id,
        views: row.get("views"),
        rewarded_views: row.get("rewarded_views"),
        clicks: row.get("clicks"),
    })
}

// ---------------------------------------------------------------------------
// notification outbox

#[instrument(skip_all)]
pub async fn enqueue_notification(
    pool: &Pool,
    user_id: i64,
    notification: &Notification,
    due_at: i64,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = enqueue_notification_tx(&mut tx, user_id, notification, due_at).await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn enqueue_notification_tx(
    tx: &mut Tx<'_>,
    user_id: i64,
    notification: &Notification,
    due_at: i64,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO outbox (user_id, kind, payload, attempt, due_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(notification.kind())
    .bind(serde_json::to_string(notification)?)
    .bind(due_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_notification(pool: &Pool, now: i64) -> Result<Option<OutboxTask>> {
    let row = sqlx::query(
        "SELECT id, user_id, kind, payload, attempt, due_at FROM outbox \
         WHERE due_at <= ? ORDER BY due_at ASC, id ASC LIMIT 1",
    )
    .bind(now)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(OutboxTask {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: row.get("kind"),
        payload: row.get("payload"),
        attempt: row.get("attempt"),
        due_at: row.get("due_at"),
    }))
}

#[instrument(skip_all)]
pub async fn delete_outbox(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_cap_secs` (0 = no cap
/// beyond the shift limit).
pub fn backoff_delay_secs(attempt: i32, max_cap_secs: i64) -> i64 {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    }
}

#[instrument(skip_all)]
pub async fn backoff_outbox_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
    now: i64,
) -> Result<()> {
    let secs = backoff_delay_secs(attempt, max_cap_secs);
    sqlx::query("UPDATE outbox SET attempt = ?, due_at = ? WHERE id = ?")
        .bind(attempt + 1)
        .bind(now + secs)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_outbox(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NewUser {
        NewUser {
            tg_user_id: 123,
            username: Some("alice".into()),
            first_name: "Alice".into(),
            last_name: None,
            language_code: Some("en".into()),
        }
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("db.sqlite");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        assert_eq!(
            prepare_sqlite_url(&url),
            format!("sqlite://{}?mode=rwc", path.display())
        );
        assert!(td.path().join("nested").exists());
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_delay_secs(0, 300), 5);
        assert_eq!(backoff_delay_secs(3, 300), 40);
        assert_eq!(backoff_delay_secs(10, 300), 300);
        assert_eq!(backoff_delay_secs(20, 0), 5 * 1024);
    }

    #[tokio::test]
    async fn upsert_user_refreshes_profile() {
        let pool = init_memory_pool().await.unwrap();
        let first = upsert_user(&pool, &alice(), 10).await.unwrap();
        let mut renamed = alice();
        renamed.username = Some("alice2".into());
        let second = upsert_user(&pool, &renamed, 20).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("alice2"));
        assert_eq!(second.created_at, 10);
        assert_eq!(second.level, 1);
    }

    #[tokio::test]
    async fn connect_codes_are_single_use() {
        let pool = init_memory_pool().await.unwrap();
        let user = upsert_user(&pool, &alice(), 0).await.unwrap();
        insert_connect_code(&pool, "ABCD1234", user.id, 100).await.unwrap();
        assert_eq!(consume_connect_code(&pool, "ABCD1234", 50).await.unwrap(), Some(user.id));
        assert_eq!(consume_connect_code(&pool, "ABCD1234", 50).await.unwrap(), None);

        insert_connect_code(&pool, "EXPIRED1", user.id, 100).await.unwrap();
        assert_eq!(consume_connect_code(&pool, "EXPIRED1", 101).await.unwrap(), None);
    }

    #[tokio::test]
    async fn chat_registration_and_settings() {
        let pool = init_memory_pool().await.unwrap();
        let user = upsert_user(&pool, &alice(), 0).await.unwrap();
        let chat = register_chat(&pool, 555, Some("alice"), 1).await.unwrap();
        assert_eq!(chat.user_id, None);
        assert!(chat.settings().allows(Topic::Streak));

        link_chat(&pool, 555, user.id).await.unwrap();
        set_chat_notification(&pool, 555, Topic::Streak, false).await.unwrap();
        let chat = find_chat_for_user(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(chat.chat_id, 555);
        assert!(!chat.settings().allows(Topic::Streak));
        assert!(link_chat(&pool, 777, user.id).await.is_err());
    }

    #[tokio::test]
    async fn seeded_achievements_parse() {
        let pool = init_memory_pool().await.unwrap();
        let catalog = list_achievements(&pool).await.unwrap();
        assert!(catalog.iter().any(|a| a.code == "first_steps" && a.criteria == Criteria::Level(2)));
    }

    #[tokio::test]
    async fn sessions_expire() {
        let pool = init_memory_pool().await.unwrap();
        let user = upsert_user(&pool, &alice(), 0).await.unwrap();
        insert_session(&pool, "hash", user.id, 100).await.unwrap();
        assert_eq!(session_user_id(&pool, "hash", 99).await.unwrap(), Some(user.id));
        assert_eq!(session_user_id(&pool, "hash", 100).await.unwrap(), None);
        assert_eq!(purge_expired_sessions(&pool, 100).await.unwrap(), 1);
    }
}

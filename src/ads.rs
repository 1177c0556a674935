//! Ad-reward service: targeting, view/click logging and reward grants.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::db::{self, AdStats, Pool};
use crate::error::{AppError, AppResult};
use crate::leveling::{LevelUp, Rules};
use crate::model::{Ad, NewAd, RewardType};
use crate::notify::Notification;
use crate::progress::{grant_experience_tx, unlock_achievements_tx, UnlockedAchievement};

const SECONDS_PER_DAY: i64 = 86_400;

/// Start of the UTC day containing `ts`.
pub fn utc_day_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(SECONDS_PER_DAY)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AvailableAd {
    #[serde(flatten)]
    pub ad: Ad,
    pub views_today: i64,
    pub remaining_today: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdReward {
    pub ad_id: i64,
    pub reward_type: RewardType,
    pub amount: i64,
    pub views_today: i64,
    pub remaining_today: i64,
    pub level: i64,
    pub experience: i64,
    pub level_ups: Vec<LevelUp>,
    pub achievements_unlocked: Vec<UnlockedAchievement>,
}

fn validate_new_ad(ad: &NewAd) -> AppResult<()> {
    if ad.title.trim().is_empty() {
        return Err(AppError::invalid("title must be non-empty"));
    }
    if ad.reward_amount <= 0 {
        return Err(AppError::invalid("reward_amount must be positive"));
    }
    if ad.min_level < 1 {
        return Err(AppError::invalid("min_level must be >= 1"));
    }
    if ad.max_level.is_some_and(|max| max < ad.min_level) {
        return Err(AppError::invalid("max_level must be >= min_level"));
    }
    if ad.daily_limit < 1 {
        return Err(AppError::invalid("daily_limit must be >= 1"));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_ad(pool: &Pool, new_ad: &NewAd, now: DateTime<Utc>) -> AppResult<Ad> {
    validate_new_ad(new_ad)?;
    let ad = db::insert_ad(pool, new_ad, now.timestamp()).await?;
    info!(ad_id = ad.id, title = %ad.title, "ad created");
    Ok(ad)
}

async fn active_ad(pool: &Pool, ad_id: i64) -> AppResult<Ad> {
    match db::get_ad(pool, ad_id).await? {
        Some(ad) if ad.active => Ok(ad),
        _ => Err(AppError::not_found(format!("ad {ad_id} not found"))),
    }
}

/// Active ads targeted at the user that still have views left today.
#[instrument(skip(pool, now))]
pub async fn available_ads(
    pool: &Pool,
    user_id: i64,
    now: DateTime<Utc>,
) -> AppResult<Vec<AvailableAd>> {
    let user = db::get_user(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {user_id} not found")))?;
    let since = utc_day_start(now.timestamp());

    let mut out = Vec::new();
    for ad in db::list_active_ads(pool).await? {
        if !ad.targets(user.level, user.language_code.as_deref()) {
            continue;
        }
        let views_today = db::count_ad_views_since(pool, user_id, ad.id, since).await?;
        if views_today >= ad.daily_limit {
            continue;
        }
        let remaining_today = ad.daily_limit - views_today;
        out.push(AvailableAd {
            ad,
            views_today,
            remaining_today,
        });
    }
    Ok(out)
}

/// Log a completed view and grant the ad's reward.
#[instrument(skip(pool, rules, now))]
pub async fn record_view(
    pool: &Pool,
    rules: &Rules,
    user_id: i64,
    ad_id: i64,
    now: DateTime<Utc>,
) -> AppResult<AdReward> {
    let ad = active_ad(pool, ad_id).await?;
    let user = db::get_user(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {user_id} not found")))?;
    if !ad.targets(user.level, user.language_code.as_deref()) {
        return Err(AppError::Forbidden(format!(
            "ad {ad_id} is not available for this user"
        )));
    }

    let ts = now.timestamp();
    let mut tx = pool.begin().await?;
    // Write before reading so the transaction holds the write lock when it
    // counts. Concurrent viewers queue on the lock instead of failing to
    // upgrade a read snapshot. Over the limit, dropping `tx` undoes the insert.
    db::insert_ad_view_tx(&mut tx, ad_id, user_id, ts, true).await?;
    let views_today =
        db::count_ad_views_since(&mut *tx, user_id, ad_id, utc_day_start(ts)).await?;
    if views_today > ad.daily_limit {
        return Err(AppError::LimitReached(format!(
            "daily limit of {} views reached for ad {}",
            ad.daily_limit, ad_id
        )));
    }

    let mut ul = db::load_user_level_tx(&mut tx, user_id, ts).await?;
    ul.ads_watched += 1;
    ul.updated_at = ts;
    let level_ups = match ad.reward_type {
        RewardType::Experience => {
            grant_experience_tx(&mut tx, &mut ul, ad.reward_amount, rules, ts).await?
        }
        RewardType::Points => {
            db::credit_user_tx(&mut tx, user_id, ad.reward_amount, 0).await?;
            Vec::new()
        }
        RewardType::Balance => {
            db::credit_user_tx(&mut tx, user_id, 0, ad.reward_amount).await?;
            Vec::new()
        }
    };
    db::enqueue_notification_tx(
        &mut tx,
        user_id,
        &Notification::AdReward {
            title: ad.title.clone(),
            reward_type: ad.reward_type,
            amount: ad.reward_amount,
        },
        ts,
    )
    .await?;
    db::save_user_level_tx(&mut tx, &ul).await?;
    let achievements_unlocked = unlock_achievements_tx(&mut tx, &ul, ts).await?;
    tx.commit().await?;

    info!(
        user_id,
        ad_id,
        reward_type = ad.reward_type.as_str(),
        amount = ad.reward_amount,
        "ad reward granted"
    );
    Ok(AdReward {
        ad_id,
        reward_type: ad.reward_type,
        amount: ad.reward_amount,
        views_today,
        remaining_today: ad.daily_limit - views_today,
        level: ul.level,
        experience: ul.experience,
        level_ups,
        achievements_unlocked,
    })
}

#[instrument(skip(pool, now))]
pub async fn record_click(
    pool: &Pool,
    user_id: i64,
    ad_id: i64,
    now: DateTime<Utc>,
) -> AppResult<Option<String>> {
    let ad = active_ad(pool, ad_id).await?;
    db::insert_ad_click(pool, ad_id, user_id, now.timestamp()).await?;
    Ok(ad.target_url)
}

pub async fn ad_stats(pool: &Pool, ad_id: i64) -> AppResult<AdStats> {
    if db::get_ad(pool, ad_id).await?.is_none() {
        return Err(AppError::not_found(format!("ad {ad_id} not found")));
    }
    Ok(db::ad_stats(pool, ad_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ad() -> NewAd {
        serde_json::from_str(r#"{"title":"Promo","reward_type":"points","reward_amount":5}"#)
            .unwrap()
    }

    #[test]
    fn day_start_truncates_to_midnight() {
        assert_eq!(utc_day_start(86_400 * 3 + 5), 86_400 * 3);
        assert_eq!(utc_day_start(86_400 * 3), 86_400 * 3);
    }

    #[test]
    fn new_ad_defaults_and_validation() {
        let ad = new_ad();
        assert_eq!(ad.min_level, 1);
        assert_eq!(ad.daily_limit, 5);
        assert!(ad.active);
        assert!(validate_new_ad(&ad).is_ok());

        let bad = NewAd { max_level: Some(0), ..new_ad() };
        assert!(matches!(validate_new_ad(&bad), Err(AppError::Invalid(_))));
        let bad = NewAd { reward_amount: 0, ..new_ad() };
        assert!(matches!(validate_new_ad(&bad), Err(AppError::Invalid(_))));
        let bad = NewAd { title: " ".into(), ..new_ad() };
        assert!(matches!(validate_new_ad(&bad), Err(AppError::Invalid(_))));
    }
}

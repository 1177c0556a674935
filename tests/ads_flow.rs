use chrono::{DateTime, TimeZone, Utc};
use tg_progress::ads;
use tg_progress::db::{self, NewUser};
use tg_progress::error::AppError;
use tg_progress::leveling::{LevelUp, Rules};
use tg_progress::model::{NewAd, RewardType};

async fn setup() -> (sqlx::SqlitePool, i64) {
    let pool = db::init_memory_pool().await.unwrap();
    let user = db::upsert_user(
        &pool,
        &NewUser {
            tg_user_id: 4242,
            username: None,
            first_name: "Viewer".into(),
            last_name: None,
            language_code: Some("en".into()),
        },
        0,
    )
    .await
    .unwrap();
    db::ensure_user_level(&pool, user.id, 0).await.unwrap();
    (pool, user.id)
}

fn at(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap()
}

fn ad(title: &str, reward_type: RewardType, amount: i64) -> NewAd {
    NewAd {
        title: title.into(),
        description: String::new(),
        media_url: None,
        target_url: Some("https://example.org/promo".into()),
        reward_type,
        reward_amount: amount,
        min_level: 1,
        max_level: None,
        languages: Vec::new(),
        daily_limit: 2,
        active: true,
    }
}

#[tokio::test]
async fn views_grant_rewards_until_daily_limit() {
    let (pool, user_id) = setup().await;
    let rules = Rules::default();
    let promo = ads::create_ad(&pool, &ad("Promo", RewardType::Experience, 60), at(1, 0))
        .await
        .unwrap();

    let first = ads::record_view(&pool, &rules, user_id, promo.id, at(1, 9))
        .await
        .unwrap();
    assert_eq!(first.experience, 60);
    assert_eq!(first.views_today, 1);
    assert_eq!(first.remaining_today, 1);
    assert!(first.level_ups.is_empty());

    let second = ads::record_view(&pool, &rules, user_id, promo.id, at(1, 10))
        .await
        .unwrap();
    assert_eq!(second.experience, 120);
    assert_eq!(second.level_ups, vec![LevelUp { level: 2 }]);
    assert_eq!(second.remaining_today, 0);

    let available = ads::available_ads(&pool, user_id, at(1, 11)).await.unwrap();
    assert!(available.is_empty());

    let err = ads::record_view(&pool, &rules, user_id, promo.id, at(1, 23))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LimitReached(_)));

    // A new UTC day resets the limit.
    let next_day = ads::record_view(&pool, &rules, user_id, promo.id, at(2, 0))
        .await
        .unwrap();
    assert_eq!(next_day.views_today, 1);
    assert_eq!(next_day.experience, 180);

    let ul = db::get_user_level(&pool, user_id).await.unwrap().unwrap();
    assert_eq!(ul.ads_watched, 3);

    let stats = ads::ad_stats(&pool, promo.id).await.unwrap();
    assert_eq!(stats.views, 3);
    assert_eq!(stats.rewarded_views, 3);
    assert_eq!(stats.clicks, 0);
}

#[tokio::test]
async fn point_and_balance_rewards_credit_the_user() {
    let (pool, user_id) = setup().await;
    let rules = Rules::default();
    let points = ads::create_ad(&pool, &ad("Points", RewardType::Points, 7), at(1, 0))
        .await
        .unwrap();
    let balance = ads::create_ad(&pool, &ad("Coins", RewardType::Balance, 3), at(1, 0))
        .await
        .unwrap();

    ads::record_view(&pool, &rules, user_id, points.id, at(1, 9))
        .await
        .unwrap();
    let reward = ads::record_view(&pool, &rules, user_id, balance.id, at(1, 9))
        .await
        .unwrap();
    assert_eq!(reward.reward_type, RewardType::Balance);
    assert_eq!(reward.experience, 0);

    let user = db::get_user(&pool, user_id).await.unwrap().unwrap();
    assert_eq!(user.points, 7);
    assert_eq!(user.balance, 3);

    let kinds: Vec<String> = sqlx::query_scalar("SELECT kind FROM outbox ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(kinds, vec!["ad_reward", "ad_reward"]);
}

#[tokio::test]
async fn targeting_hides_and_rejects_ads() {
    let (pool, user_id) = setup().await;
    let rules = Rules::default();
    let russian = ads::create_ad(
        &pool,
        &NewAd {
            languages: vec!["ru".into()],
            ..ad("Russian only", RewardType::Points, 1)
        },
        at(1, 0),
    )
    .await
    .unwrap();
    let veterans = ads::create_ad(
        &pool,
        &NewAd {
            min_level: 5,
            ..ad("Veterans", RewardType::Points, 1)
        },
        at(1, 0),
    )
    .await
    .unwrap();
    let open = ads::create_ad(&pool, &ad("Everyone", RewardType::Points, 1), at(1, 0))
        .await
        .unwrap();

    let available = ads::available_ads(&pool, user_id, at(1, 9)).await.unwrap();
    let ids: Vec<i64> = available.iter().map(|a| a.ad.id).collect();
    assert_eq!(ids, vec![open.id]);
    assert_eq!(available[0].remaining_today, 2);

    for ad_id in [russian.id, veterans.id] {
        let err = ads::record_view(&pool, &rules, user_id, ad_id, at(1, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}

#[tokio::test]
async fn clicks_and_inactive_ads() {
    let (pool, user_id) = setup().await;
    let rules = Rules::default();
    let promo = ads::create_ad(&pool, &ad("Promo", RewardType::Points, 1), at(1, 0))
        .await
        .unwrap();
    let paused = ads::create_ad(
        &pool,
        &NewAd {
            active: false,
            ..ad("Paused", RewardType::Points, 1)
        },
        at(1, 0),
    )
    .await
    .unwrap();

    let url = ads::record_click(&pool, user_id, promo.id, at(1, 9))
        .await
        .unwrap();
    assert_eq!(url.as_deref(), Some("https://example.org/promo"));
    assert_eq!(ads::ad_stats(&pool, promo.id).await.unwrap().clicks, 1);

    let err = ads::record_view(&pool, &rules, user_id, paused.id, at(1, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let err = ads::record_click(&pool, user_id, 999, at(1, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = ads::create_ad(
        &pool,
        &NewAd {
            daily_limit: 0,
            ..ad("Broken", RewardType::Points, 1)
        },
        at(1, 0),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Invalid(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_views_respect_daily_limit() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("ads.db").display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let user = db::upsert_user(
        &pool,
        &NewUser {
            tg_user_id: 5151,
            username: None,
            first_name: "Racer".into(),
            last_name: None,
            language_code: Some("en".into()),
        },
        0,
    )
    .await
    .unwrap();
    db::ensure_user_level(&pool, user.id, 0).await.unwrap();
    let mut once = ad("Once", RewardType::Points, 5);
    once.daily_limit = 1;
    let once = ads::create_ad(&pool, &once, at(1, 0)).await.unwrap();

    let rules = Rules::default();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let rules = rules.clone();
            let (user_id, ad_id) = (user.id, once.id);
            tokio::spawn(async move { ads::record_view(&pool, &rules, user_id, ad_id, at(1, 9)).await })
        })
        .collect();

    let mut granted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(reward) => {
                granted += 1;
                assert_eq!(reward.views_today, 1);
                assert_eq!(reward.remaining_today, 0);
            }
            Err(AppError::LimitReached(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(granted, 1);

    let stats = ads::ad_stats(&pool, once.id).await.unwrap();
    assert_eq!(stats.views, 1);
    let user = db::get_user(&pool, user.id).await.unwrap().unwrap();
    assert_eq!(user.points, 5);
}

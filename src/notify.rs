//! Push notification payloads and the delivery seam.
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;

use crate::model::{RewardType, Topic};

/// Payload stored in the outbox, serialized with its `kind` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LevelUp {
        level: i64,
    },
    AchievementUnlocked {
        icon: String,
        name: String,
        description: String,
    },
    StreakMilestone {
        days: i64,
    },
    AdReward {
        title: String,
        reward_type: RewardType,
        amount: i64,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::LevelUp { .. } => "level_up",
            Notification::AchievementUnlocked { .. } => "achievement_unlocked",
            Notification::StreakMilestone { .. } => "streak_milestone",
            Notification::AdReward { .. } => "ad_reward",
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            Notification::LevelUp { .. } => Topic::LevelUp,
            Notification::AchievementUnlocked { .. } => Topic::Achievements,
            Notification::StreakMilestone { .. } => Topic::Streak,
            Notification::AdReward { .. } => Topic::Ads,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Notification::LevelUp { level } => {
                format!("🎉 Level up! You reached level {level}.")
            }
            Notification::AchievementUnlocked {
                icon,
                name,
                description,
            } => format!("{icon} Achievement unlocked: {name}\n{description}"),
            Notification::StreakMilestone { days } => {
                format!("🔥 {days}-day streak! Come back tomorrow to keep it going.")
            }
            Notification::AdReward {
                title,
                reward_type,
                amount,
            } => format!(
                "📺 Thanks for watching \"{title}\": +{amount} {}",
                reward_type.as_str()
            ),
        }
    }
}

/// Delivers rendered text to a Telegram chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[async_trait]
impl Notifier for Bot {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(ChatId(chat_id), text.to_string())
            .await
            .context("telegram sendMessage failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_with_kind_tag() {
        let n = Notification::StreakMilestone { days: 7 };
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, r#"{"kind":"streak_milestone","days":7}"#);
        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
        assert_eq!(back.kind(), "streak_milestone");
    }

    #[test]
    fn render_mentions_the_details() {
        let text = Notification::AchievementUnlocked {
            icon: "⭐".into(),
            name: "Rising Star".into(),
            description: "Reach level 5".into(),
        }
        .render();
        assert!(text.starts_with("⭐ Achievement unlocked: Rising Star"));

        let text = Notification::AdReward {
            title: "Promo".into(),
            reward_type: RewardType::Points,
            amount: 15,
        }
        .render();
        assert!(text.contains("+15 points"));
        assert_eq!(Notification::LevelUp { level: 3 }.topic(), Topic::LevelUp);
    }
}

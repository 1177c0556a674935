use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::achievements::Criteria;
use crate::leveling::{LevelState, StreakState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    Experience,
    Points,
    Balance,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Experience => "experience",
            RewardType::Points => "points",
            RewardType::Balance => "balance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "experience" => Some(RewardType::Experience),
            "points" => Some(RewardType::Points),
            "balance" => Some(RewardType::Balance),
            _ => None,
        }
    }
}

/// Notification categories a chat can opt out of.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    LevelUp,
    Achievements,
    Streak,
    Ads,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::LevelUp, Topic::Achievements, Topic::Streak, Topic::Ads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::LevelUp => "level",
            Topic::Achievements => "achievements",
            Topic::Streak => "streak",
            Topic::Ads => "ads",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "level" | "levels" | "level_up" | "levelup" => Some(Topic::LevelUp),
            "achievements" | "achievement" => Some(Topic::Achievements),
            "streak" | "streaks" => Some(Topic::Streak),
            "ads" | "ad" => Some(Topic::Ads),
            _ => None,
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            Topic::LevelUp => "notify_level_up",
            Topic::Achievements => "notify_achievements",
            Topic::Streak => "notify_streak",
            Topic::Ads => "notify_ads",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub tg_user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub external_id: Option<String>,
    pub balance: i64,
    pub points: i64,
    pub level: i64,
    pub created_at: i64,
}

impl User {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct UserLevel {
    pub user_id: i64,
    pub experience: i64,
    pub level: i64,
    pub streak: i64,
    pub longest_streak: i64,
    pub last_active_date: Option<NaiveDate>,
    pub ads_watched: i64,
    pub updated_at: i64,
}

impl UserLevel {
    pub fn level_state(&self) -> LevelState {
        LevelState {
            experience: self.experience,
            level: self.level,
        }
    }

    pub fn streak_state(&self) -> StreakState {
        StreakState {
            streak: self.streak,
            longest_streak: self.longest_streak,
            last_active_date: self.last_active_date,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationSettings {
    pub level_up: bool,
    pub achievements: bool,
    pub streak: bool,
    pub ads: bool,
}

/// Every topic is on until the user mutes it.
impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            level_up: true,
            achievements: true,
            streak: true,
            ads: true,
        }
    }
}

impl NotificationSettings {
    pub fn allows(&self, topic: Topic) -> bool {
        match topic {
            Topic::LevelUp => self.level_up,
            Topic::Achievements => self.achievements,
            Topic::Streak => self.streak,
            Topic::Ads => self.ads,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct TelegramUser {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub notify_level_up: bool,
    pub notify_achievements: bool,
    pub notify_streak: bool,
    pub notify_ads: bool,
    pub created_at: i64,
}

impl TelegramUser {
    pub fn settings(&self) -> NotificationSettings {
        NotificationSettings {
            level_up: self.notify_level_up,
            achievements: self.notify_achievements,
            streak: self.notify_streak,
            ads: self.notify_ads,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ad {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub media_url: Option<String>,
    pub target_url: Option<String>,
    pub reward_type: RewardType,
    pub reward_amount: i64,
    pub min_level: i64,
    pub max_level: Option<i64>,
    /// Empty means every language.
    pub languages: Vec<String>,
    pub daily_limit: i64,
    pub active: bool,
    pub created_at: i64,
}

impl Ad {
    pub fn targets(&self, level: i64, language: Option<&str>) -> bool {
        if level < self.min_level || self.max_level.is_some_and(|max| level > max) {
            return false;
        }
        if self.languages.is_empty() {
            return true;
        }
        language.is_some_and(|lang| self.languages.iter().any(|l| l.eq_ignore_ascii_case(lang)))
    }
}

fn default_min_level() -> i64 {
    1
}

fn default_daily_limit() -> i64 {
    5
}

fn default_active() -> bool {
    true
}

/// Payload for creating an ad.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAd {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    pub reward_type: RewardType,
    pub reward_amount: i64,
    #[serde(default = "default_min_level")]
    pub min_level: i64,
    #[serde(default)]
    pub max_level: Option<i64>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Achievement {
    pub id: i64,
    pub code: String,
    pub icon: String,
    pub name: String,
    pub description: String,
    pub criteria: Criteria,
    pub reward_points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxTask {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub payload: String,
    pub attempt: i32,
    pub due_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad() -> Ad {
        Ad {
            id: 1,
            title: "t".into(),
            description: String::new(),
            media_url: None,
            target_url: None,
            reward_type: RewardType::Points,
            reward_amount: 5,
            min_level: 2,
            max_level: Some(5),
            languages: vec!["en".into(), "ru".into()],
            daily_limit: 3,
            active: true,
            created_at: 0,
        }
    }

    #[test]
    fn ad_targeting_checks_level_and_language() {
        let ad = ad();
        assert!(ad.targets(2, Some("EN")));
        assert!(!ad.targets(1, Some("en")));
        assert!(!ad.targets(6, Some("en")));
        assert!(!ad.targets(3, Some("de")));
        assert!(!ad.targets(3, None));

        let open = Ad { languages: vec![], max_level: None, ..ad };
        assert!(open.targets(99, None));
    }

    #[test]
    fn topic_parsing() {
        assert_eq!(Topic::parse("Levels"), Some(Topic::LevelUp));
        assert_eq!(Topic::parse("ads"), Some(Topic::Ads));
        assert_eq!(Topic::parse("nope"), None);
        assert_eq!(RewardType::parse("balance"), Some(RewardType::Balance));
    }
}

//! Achievement unlock criteria.
use serde::{Deserialize, Serialize};

use crate::model::{Achievement, UserLevel};

/// Stored as JSON in `achievements.criteria`, e.g. `{"type":"level","value":5}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Criteria {
    Level(i64),
    Streak(i64),
    Experience(i64),
    AdsWatched(i64),
}

/// Snapshot of the counters criteria are checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserStats {
    pub level: i64,
    pub experience: i64,
    pub streak: i64,
    pub longest_streak: i64,
    pub ads_watched: i64,
}

impl From<&UserLevel> for UserStats {
    fn from(ul: &UserLevel) -> Self {
        Self {
            level: ul.level,
            experience: ul.experience,
            streak: ul.streak,
            longest_streak: ul.longest_streak,
            ads_watched: ul.ads_watched,
        }
    }
}

impl Criteria {
    pub fn is_met(&self, stats: &UserStats) -> bool {
        match *self {
            Criteria::Level(n) => stats.level >= n,
            // A streak achievement stays earned after the streak breaks.
            Criteria::Streak(n) => stats.streak.max(stats.longest_streak) >= n,
            Criteria::Experience(n) => stats.experience >= n,
            Criteria::AdsWatched(n) => stats.ads_watched >= n,
        }
    }
}

/// Achievements from `catalog` that `stats` satisfies and are not yet in
/// `unlocked`.
pub fn newly_unlocked<'a>(
    catalog: &'a [Achievement],
    unlocked: &[i64],
    stats: &UserStats,
) -> Vec<&'a Achievement> {
    catalog
        .iter()
        .filter(|a| !unlocked.contains(&a.id) && a.criteria.is_met(stats))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ach(id: i64, criteria: Criteria) -> Achievement {
        Achievement {
            id,
            code: format!("a{id}"),
            icon: "*".into(),
            name: format!("A{id}"),
            description: String::new(),
            criteria,
            reward_points: 0,
        }
    }

    #[test]
    fn criteria_json_shape() {
        let c: Criteria = serde_json::from_str(r#"{"type":"ads_watched","value":10}"#).unwrap();
        assert_eq!(c, Criteria::AdsWatched(10));
        assert_eq!(
            serde_json::to_string(&Criteria::Level(5)).unwrap(),
            r#"{"type":"level","value":5}"#
        );
    }

    #[test]
    fn streak_criteria_uses_longest() {
        let stats = UserStats { streak: 1, longest_streak: 7, ..Default::default() };
        assert!(Criteria::Streak(7).is_met(&stats));
        assert!(!Criteria::Streak(8).is_met(&stats));
    }

    #[test]
    fn skips_already_unlocked() {
        let catalog = vec![ach(1, Criteria::Level(2)), ach(2, Criteria::Level(3)), ach(3, Criteria::Experience(1))];
        let stats = UserStats { level: 3, experience: 0, ..Default::default() };
        let ids: Vec<i64> = newly_unlocked(&catalog, &[1], &stats).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2]);
    }
}

//! Experience, level and streak rules. Pure functions over small state
//! structs; persistence lives in `progress`.

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rules {
    pub base_experience: i64,
    pub max_level: i64,
    pub daily_experience: i64,
    pub streak_milestones: Vec<i64>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            base_experience: 100,
            max_level: 100,
            daily_experience: 10,
            streak_milestones: vec![3, 7, 14, 30, 100],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelState {
    pub experience: i64,
    pub level: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelUp {
    pub level: i64,
}

/// Total experience required to reach `level`. Level 1 is free; each next
/// level costs `base` more than the previous one.
pub fn experience_for_level(level: i64, base: i64) -> i64 {
    if level <= 1 {
        return 0;
    }
    base.saturating_mul(level - 1).saturating_mul(level) / 2
}

/// Add `amount` experience and return one `LevelUp` per threshold crossed.
/// Non-positive amounts leave the state untouched.
pub fn apply_experience(state: &mut LevelState, amount: i64, rules: &Rules) -> Vec<LevelUp> {
    if amount <= 0 {
        return Vec::new();
    }
    state.experience = state.experience.saturating_add(amount);
    let mut ups = Vec::new();
    while state.level < rules.max_level
        && state.experience >= experience_for_level(state.level + 1, rules.base_experience)
    {
        state.level += 1;
        ups.push(LevelUp { level: state.level });
    }
    ups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreakState {
    pub streak: i64,
    pub longest_streak: i64,
    pub last_active_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StreakChange {
    /// Already active today (or a date in the past).
    Unchanged,
    /// First recorded activity.
    Started,
    /// Active on the day after the last activity.
    Extended,
    /// At least one day was skipped.
    Reset { previous: i64 },
}

impl StreakChange {
    /// Whether this activity is the first one of its day.
    pub fn is_new_day(&self) -> bool {
        !matches!(self, StreakChange::Unchanged)
    }
}

pub fn apply_activity(state: &mut StreakState, today: NaiveDate) -> StreakChange {
    let change = match state.last_active_date {
        None => {
            state.streak = 1;
            StreakChange::Started
        }
        Some(last) if today <= last => return StreakChange::Unchanged,
        Some(last) if last.succ_opt() == Some(today) => {
            state.streak += 1;
            StreakChange::Extended
        }
        Some(_) => {
            let previous = state.streak;
            state.streak = 1;
            StreakChange::Reset { previous }
        }
    };
    state.last_active_date = Some(today);
    state.longest_streak = state.longest_streak.max(state.streak);
    change
}

pub fn is_milestone(streak: i64, rules: &Rules) -> bool {
    rules.streak_milestones.contains(&streak)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub level: i64,
    pub experience: i64,
    pub level_floor: i64,
    /// `None` once `max_level` is reached.
    pub next_level_at: Option<i64>,
    pub experience_into_level: i64,
    pub experience_to_next: i64,
    pub percent: u8,
}

pub fn progress_summary(state: &LevelState, rules: &Rules) -> ProgressSummary {
    let floor = experience_for_level(state.level, rules.base_experience);
    let next = (state.level < rules.max_level)
        .then(|| experience_for_level(state.level + 1, rules.base_experience));
    let into = (state.experience - floor).max(0);
    let (to_next, percent) = match next {
        Some(next) => {
            let span = (next - floor).max(1);
            let pct = (into.min(span) * 100 / span) as u8;
            ((next - state.experience).max(0), pct)
        }
        None => (0, 100),
    };
    ProgressSummary {
        level: state.level,
        experience: state.experience,
        level_floor: floor,
        next_level_at: next,
        experience_into_level: into,
        experience_to_next: to_next,
        percent,
    }
}

/// Ten-cell text bar used by bot replies.
pub fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) / 10) as usize;
    format!("{}{}", "▰".repeat(filled), "▱".repeat(10 - filled))
}

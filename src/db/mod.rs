//! Database module: view models and SQL repositories.
//!
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `tg_progress::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{AchievementStatus, AdStats, LeaderboardEntry, NewUser};

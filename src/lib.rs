pub mod achievements;
pub mod ads;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod http;
pub mod identity;
pub mod initdata;
pub mod leveling;
pub mod model;
pub mod notify;
pub mod outbox;
pub mod progress;

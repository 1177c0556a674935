use crate::auth;
use crate::db;
use crate::error::AppError;
use crate::leveling::{progress_bar, Rules};
use crate::model::{TelegramUser, Topic};
use crate::progress;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, instrument, warn};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start the bot (optionally with a connect code)")]
    Start(String),
    #[command(description = "link this chat to your account: /connect CODE")]
    Connect(String),
    #[command(description = "show your level and experience")]
    Progress,
    #[command(description = "list your achievements")]
    Achievements,
    #[command(description = "show your daily streak")]
    Streak,
    #[command(description = "notification settings: /settings [level|achievements|streak|ads on|off]")]
    Settings(String),
    #[command(description = "show this help")]
    Help,
}

/// Shared dependencies injected into the dispatcher.
pub struct BotState {
    pub pool: SqlitePool,
    pub rules: Rules,
}

/// Who sent the command, decoupled from teloxide's message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub chat_id: i64,
    pub tg_user_id: Option<i64>,
    pub username: Option<String>,
}

const NOT_LINKED: &str = "This chat is not linked yet. Open the web app, request a connect code \
     and send /connect CODE here.";

pub async fn answer(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    let sender = Sender {
        chat_id: msg.chat.id.0,
        tg_user_id: msg.from().map(|u| u.id.0 as i64),
        username: msg.from().and_then(|u| u.username.clone()),
    };
    let text = match reply_for(&state, &sender, cmd, Utc::now()).await {
        Ok(text) => text,
        Err(err) => {
            warn!(?err, chat_id = sender.chat_id, "failed to handle command");
            "Something went wrong, please try again later.".to_string()
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Build the reply text for `cmd`. Registers the chat on every call.
#[instrument(skip(state, now))]
pub async fn reply_for(
    state: &BotState,
    sender: &Sender,
    cmd: Command,
    now: DateTime<Utc>,
) -> Result<String> {
    let pool = &state.pool;
    let chat = db::register_chat(
        pool,
        sender.chat_id,
        sender.username.as_deref(),
        now.timestamp(),
    )
    .await?;

    match cmd {
        Command::Help => Ok(Command::descriptions().to_string()),
        Command::Start(payload) => {
            let payload = payload.trim();
            if !payload.is_empty() {
                return connect(pool, sender.chat_id, payload, now).await;
            }
            let linked = linked_user(pool, &chat, sender).await?;
            let mut text = String::from(
                "👋 Welcome! Earn experience, keep your streak and unlock achievements in the web app. \
                 I'll let you know when you level up.",
            );
            if linked.is_none() {
                text.push_str("\n\n");
                text.push_str(NOT_LINKED);
            }
            text.push_str("\n\nSend /help to see all commands.");
            Ok(text)
        }
        Command::Connect(code) => {
            if code.trim().is_empty() {
                return Ok("Usage: /connect CODE".to_string());
            }
            connect(pool, sender.chat_id, code.trim(), now).await
        }
        Command::Progress => {
            let Some(user_id) = linked_user(pool, &chat, sender).await? else {
                return Ok(NOT_LINKED.to_string());
            };
            let view = progress::progress(pool, &state.rules, user_id).await?;
            let s = &view.summary;
            let next = match s.next_level_at {
                Some(_) => format!("{} XP to level {}", s.experience_to_next, s.level + 1),
                None => "max level reached".to_string(),
            };
            Ok(format!(
                "⭐ Level {}\n{} {}%\n{} XP total, {}\n🏅 {} achievements unlocked",
                s.level,
                progress_bar(s.percent),
                s.percent,
                s.experience,
                next,
                view.achievements_unlocked
            ))
        }
        Command::Achievements => {
            let Some(user_id) = linked_user(pool, &chat, sender).await? else {
                return Ok(NOT_LINKED.to_string());
            };
            let all = progress::achievements(pool, user_id).await?;
            let unlocked: Vec<_> = all.iter().filter(|a| a.unlocked).collect();
            if unlocked.is_empty() {
                return Ok(format!(
                    "No achievements yet ({} available). Keep playing!",
                    all.len()
                ));
            }
            let mut text = format!("🏅 Achievements {}/{}\n", unlocked.len(), all.len());
            for a in unlocked {
                text.push_str(&format!(
                    "\n{} {}: {}",
                    a.achievement.icon, a.achievement.name, a.achievement.description
                ));
            }
            Ok(text)
        }
        Command::Streak => {
            let Some(user_id) = linked_user(pool, &chat, sender).await? else {
                return Ok(NOT_LINKED.to_string());
            };
            let view = progress::progress(pool, &state.rules, user_id).await?;
            let today = now.date_naive();
            let hint = match view.last_active_date {
                Some(d) if d == today => "You're done for today 👍",
                Some(d) if d.succ_opt() == Some(today) => "Check in today to keep it going!",
                Some(_) if view.streak > 0 => "Your streak was broken, start a new one today!",
                _ => "Check in today to start a streak!",
            };
            Ok(format!(
                "🔥 Current streak: {} days\n🏆 Longest streak: {} days\n{}",
                view.streak, view.longest_streak, hint
            ))
        }
        Command::Settings(args) => settings(pool, &chat, &args).await,
    }
}

async fn connect(pool: &SqlitePool, chat_id: i64, code: &str, now: DateTime<Utc>) -> Result<String> {
    match auth::connect_chat(pool, chat_id, code, now).await {
        Ok(user) => Ok(format!(
            "✅ Linked! Notifications for {} will arrive here.",
            user.display_name()
        )),
        Err(AppError::Internal(err)) => Err(err),
        Err(err) => Ok(format!("❌ Could not link this chat: {err}")),
    }
}

/// User linked to `chat`, auto-linking when the sender already signed in to
/// the web app with the same Telegram account.
async fn linked_user(
    pool: &SqlitePool,
    chat: &TelegramUser,
    sender: &Sender,
) -> Result<Option<i64>> {
    if let Some(user_id) = chat.user_id {
        return Ok(Some(user_id));
    }
    let Some(tg_user_id) = sender.tg_user_id else {
        return Ok(None);
    };
    let Some(user) = db::find_user_by_tg_id(pool, tg_user_id).await? else {
        return Ok(None);
    };
    db::link_chat(pool, chat.chat_id, user.id).await?;
    info!(chat_id = chat.chat_id, user_id = user.id, "chat auto-linked");
    Ok(Some(user.id))
}

async fn settings(pool: &SqlitePool, chat: &TelegramUser, args: &str) -> Result<String> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let mut current = chat.settings();
    match parts.as_slice() {
        [] => {}
        [topic, toggle] => {
            let Some(topic) = Topic::parse(topic) else {
                return Ok(format!("Unknown setting \"{topic}\". Use level, achievements, streak or ads."));
            };
            let enabled = match toggle.to_ascii_lowercase().as_str() {
                "on" | "yes" | "true" => true,
                "off" | "no" | "false" => false,
                _ => return Ok("Use on or off, e.g. /settings streak off".to_string()),
            };
            db::set_chat_notification(pool, chat.chat_id, topic, enabled).await?;
            current = db::get_chat(pool, chat.chat_id)
                .await?
                .map(|c| c.settings())
                .unwrap_or(current);
        }
        _ => return Ok("Usage: /settings [level|achievements|streak|ads on|off]".to_string()),
    }

    let mut text = String::from("🔔 Notifications\n");
    for topic in Topic::ALL {
        let mark = if current.allows(topic) { "on" } else { "off" };
        text.push_str(&format!("\n{}: {}", topic.as_str(), mark));
    }
    Ok(text)
}

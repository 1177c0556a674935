//! Sign-in with Telegram init data, bearer sessions and bot connect codes.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, NewUser, Pool};
use crate::error::{AppError, AppResult};
use crate::identity::{IdentityProfile, IdentityService};
use crate::initdata::{self, WebAppUser};
use crate::model::User;

static CONNECT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{6,16}$").expect("valid connect code regex"));

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub bot_token: String,
    pub init_data_max_age_secs: u64,
    pub session_ttl_secs: u64,
    pub connect_code_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignIn {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectCode {
    pub code: String,
    pub expires_at: i64,
}

pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_connect_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()
}

/// Normalized code when `raw` looks like a connect code.
pub fn normalize_connect_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    CONNECT_CODE_RE
        .is_match(trimmed)
        .then(|| trimmed.to_ascii_uppercase())
}

impl From<&WebAppUser> for NewUser {
    fn from(u: &WebAppUser) -> Self {
        NewUser {
            tg_user_id: u.id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            language_code: u.language_code.clone(),
        }
    }
}

impl From<&User> for IdentityProfile {
    fn from(u: &User) -> Self {
        IdentityProfile {
            telegram_id: u.tg_user_id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            language_code: u.language_code.clone(),
        }
    }
}

/// Verify init data, upsert the user and open a session.
#[instrument(skip_all)]
pub async fn sign_in(
    pool: &Pool,
    identity: Option<&dyn IdentityService>,
    settings: &AuthSettings,
    init_data: &str,
    now: DateTime<Utc>,
) -> AppResult<SignIn> {
    let ts = now.timestamp();
    let data = initdata::verify(
        init_data,
        &settings.bot_token,
        settings.init_data_max_age_secs,
        ts,
    )?;

    let mut user = db::upsert_user(pool, &NewUser::from(&data.user), ts).await?;
    db::ensure_user_level(pool, user.id, ts).await?;

    if let Some(identity) = identity {
        match identity.sync_user(&IdentityProfile::from(&user)).await {
            Ok(external_id) => {
                db::set_user_external_id(pool, user.id, &external_id).await?;
                user.external_id = Some(external_id);
            }
            Err(err) => warn!(?err, user_id = user.id, "identity sync failed"),
        }
    }

    // A private chat with the bot shares the Telegram user id.
    if let Some(chat) = db::get_chat(pool, user.tg_user_id).await? {
        if chat.user_id.is_none() {
            db::link_chat(pool, chat.chat_id, user.id).await?;
        }
    }

    let token = generate_token();
    let expires_at = ts + settings.session_ttl_secs as i64;
    db::insert_session(pool, &hash_token(&token), user.id, expires_at).await?;
    info!(user_id = user.id, tg_user_id = user.tg_user_id, "signed in");

    Ok(SignIn {
        token,
        expires_at,
        user,
    })
}

/// Resolve a bearer token to its user id.
pub async fn authenticate(pool: &Pool, token: &str, now: DateTime<Utc>) -> AppResult<i64> {
    db::session_user_id(pool, &hash_token(token), now.timestamp())
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".into()))
}

pub async fn issue_connect_code(
    pool: &Pool,
    user_id: i64,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> AppResult<ConnectCode> {
    let code = generate_connect_code();
    let expires_at = now.timestamp() + ttl_secs as i64;
    db::insert_connect_code(pool, &code, user_id, expires_at).await?;
    Ok(ConnectCode { code, expires_at })
}

/// Consume `code` and link `chat_id` to its user.
#[instrument(skip(pool, now))]
pub async fn connect_chat(
    pool: &Pool,
    chat_id: i64,
    code: &str,
    now: DateTime<Utc>,
) -> AppResult<User> {
    let code = normalize_connect_code(code)
        .ok_or_else(|| AppError::invalid("connect code looks malformed"))?;
    // The code is only spent when the link succeeds.
    let mut tx = pool.begin().await?;
    let user_id = db::consume_connect_code_tx(&mut tx, &code, now.timestamp())
        .await?
        .ok_or_else(|| AppError::not_found("connect code is unknown or expired"))?;
    if !db::link_chat_tx(&mut tx, chat_id, user_id).await? {
        return Err(AppError::not_found(format!(
            "chat {chat_id} is not registered, send /start first"
        )));
    }
    tx.commit().await?;
    let user = db::get_user(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {user_id} not found")))?;
    info!(chat_id, user_id, "chat linked");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_random_and_hash_is_stable() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn connect_codes() {
        let code = generate_connect_code();
        assert_eq!(code.len(), 8);
        assert_eq!(normalize_connect_code(&code), Some(code.clone()));
        assert_eq!(normalize_connect_code(" ab12cd34 ").as_deref(), Some("AB12CD34"));
        assert_eq!(normalize_connect_code("no spaces allowed"), None);
        assert_eq!(normalize_connect_code("abc"), None);
    }
}

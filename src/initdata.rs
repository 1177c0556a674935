//! Telegram Web App init-data verification.
//!
//! The Web App receives a URL-encoded query string signed by Telegram. The
//! signature is `hex(HMAC_SHA256(secret, data_check_string))` where
//! `secret = HMAC_SHA256("WebAppData", bot_token)` and the data-check string
//! is every `key=value` pair except `hash`, sorted by key and joined by `\n`.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

const SECRET_KEY_SALT: &[u8] = b"WebAppData";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitDataError {
    #[error("init data is malformed: {0}")]
    Malformed(String),
    #[error("init data has no hash")]
    MissingHash,
    #[error("init data signature mismatch")]
    InvalidHash,
    #[error("init data expired")]
    Expired,
    #[error("init data has no user")]
    MissingUser,
}

/// The launching Telegram user as described in init data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebAppUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_premium: Option<bool>,
}

/// Verified init data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub auth_date: i64,
    pub query_id: Option<String>,
    pub start_param: Option<String>,
    pub user: WebAppUser,
    pub hash: String,
}

/// Decode the query string into sorted pairs. Later duplicates win.
pub fn parse_pairs(init_data: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(init_data.trim().as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Build the data-check string from decoded pairs, skipping `hash`.
pub fn data_check_string(pairs: &BTreeMap<String, String>) -> String {
    pairs
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn secret_key(bot_token: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(SECRET_KEY_SALT).expect("HMAC accepts any key size");
    mac.update(bot_token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn data_mac(check_string: &str, bot_token: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(&secret_key(bot_token)).expect("HMAC accepts any key size");
    mac.update(check_string.as_bytes());
    mac
}

/// Hex signature of a data-check string for the given bot token.
pub fn sign(check_string: &str, bot_token: &str) -> String {
    hex::encode(data_mac(check_string, bot_token).finalize().into_bytes())
}

/// Encode `pairs` as init data with a valid `hash` appended.
pub fn encode_signed(pairs: &[(&str, &str)], bot_token: &str) -> String {
    let map: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let hash = sign(&data_check_string(&map), bot_token);
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &map {
        ser.append_pair(k, v);
    }
    ser.append_pair("hash", &hash);
    ser.finish()
}

/// Decode init data without checking its signature.
pub fn parse(init_data: &str) -> Result<InitData, InitDataError> {
    from_pairs(&parse_pairs(init_data))
}

fn from_pairs(pairs: &BTreeMap<String, String>) -> Result<InitData, InitDataError> {
    let hash = pairs
        .get("hash")
        .filter(|h| !h.is_empty())
        .cloned()
        .ok_or(InitDataError::MissingHash)?;
    let auth_date: i64 = pairs
        .get("auth_date")
        .ok_or_else(|| InitDataError::Malformed("missing auth_date".into()))?
        .parse()
        .map_err(|_| InitDataError::Malformed("auth_date is not a number".into()))?;
    let raw_user = pairs.get("user").ok_or(InitDataError::MissingUser)?;
    let user: WebAppUser = serde_json::from_str(raw_user)
        .map_err(|e| InitDataError::Malformed(format!("user: {e}")))?;

    Ok(InitData {
        auth_date,
        query_id: pairs.get("query_id").cloned(),
        start_param: pairs.get("start_param").cloned(),
        user,
        hash,
    })
}

/// Verify a raw init-data string against `bot_token`.
///
/// `max_age_secs` of 0 skips the freshness check.
pub fn verify(
    init_data: &str,
    bot_token: &str,
    max_age_secs: u64,
    now: i64,
) -> Result<InitData, InitDataError> {
    let pairs = parse_pairs(init_data);
    let hash = pairs
        .get("hash")
        .filter(|h| !h.is_empty())
        .ok_or(InitDataError::MissingHash)?;
    let expected = hex::decode(hash).map_err(|_| InitDataError::InvalidHash)?;

    data_mac(&data_check_string(&pairs), bot_token)
        .verify_slice(&expected)
        .map_err(|_| InitDataError::InvalidHash)?;

    let data = from_pairs(&pairs)?;
    if max_age_secs > 0 && now.saturating_sub(data.auth_date) > max_age_secs as i64 {
        return Err(InitDataError::Expired);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456:TEST-TOKEN";
    const USER: &str = r#"{"id":42,"first_name":"Ada","username":"ada","language_code":"en"}"#;

    fn signed(auth_date: &str) -> String {
        encode_signed(
            &[
                ("auth_date", auth_date),
                ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
                ("user", USER),
            ],
            TOKEN,
        )
    }

    #[test]
    fn data_check_string_is_sorted_and_skips_hash() {
        let pairs = parse_pairs("user=%7B%7D&hash=abc&auth_date=1&query_id=q");
        assert_eq!(data_check_string(&pairs), "auth_date=1\nquery_id=q\nuser={}");
    }

    #[test]
    fn signature_is_deterministic() {
        let a = sign("auth_date=1\nuser={}", TOKEN);
        let b = sign("auth_date=1\nuser={}", TOKEN);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign("auth_date=1\nuser={}", "other:token"));
    }

    #[test]
    fn valid_init_data_verifies() {
        let raw = signed("1700000000");
        let data = verify(&raw, TOKEN, 86400, 1700000100).unwrap();
        assert_eq!(data.auth_date, 1700000000);
        assert_eq!(data.user.id, 42);
        assert_eq!(data.user.username.as_deref(), Some("ada"));
        assert_eq!(data.query_id.as_deref(), Some("AAHdF6IQAAAAAN0XohDhrOrc"));
    }

    #[test]
    fn pair_order_does_not_matter() {
        let raw = signed("1700000000");
        let mut parts: Vec<&str> = raw.split('&').collect();
        parts.reverse();
        let shuffled = parts.join("&");
        assert!(verify(&shuffled, TOKEN, 0, 0).is_ok());
    }

    #[test]
    fn tampered_field_fails() {
        let raw = signed("1700000000").replace("auth_date=1700000000", "auth_date=1700000001");
        assert_eq!(
            verify(&raw, TOKEN, 0, 0).unwrap_err(),
            InitDataError::InvalidHash
        );

        let raw = signed("1700000000").replace("%22id%22%3A42", "%22id%22%3A43");
        assert_eq!(
            verify(&raw, TOKEN, 0, 0).unwrap_err(),
            InitDataError::InvalidHash
        );
    }

    #[test]
    fn wrong_token_fails() {
        let raw = signed("1700000000");
        assert_eq!(
            verify(&raw, "999:OTHER", 0, 0).unwrap_err(),
            InitDataError::InvalidHash
        );
    }

    #[test]
    fn missing_or_garbage_hash() {
        assert_eq!(
            verify("auth_date=1&user=%7B%7D", TOKEN, 0, 0).unwrap_err(),
            InitDataError::MissingHash
        );
        assert_eq!(
            verify("auth_date=1&hash=zz", TOKEN, 0, 0).unwrap_err(),
            InitDataError::InvalidHash
        );
    }

    #[test]
    fn expired_init_data() {
        let raw = signed("1700000000");
        assert_eq!(
            verify(&raw, TOKEN, 60, 1700000061).unwrap_err(),
            InitDataError::Expired
        );
        assert!(verify(&raw, TOKEN, 0, 1800000000).is_ok());
    }

    #[test]
    fn signed_without_user() {
        let raw = encode_signed(&[("auth_date", "1700000000")], TOKEN);
        assert_eq!(
            verify(&raw, TOKEN, 0, 0).unwrap_err(),
            InitDataError::MissingUser
        );
    }

    #[test]
    fn parse_skips_signature_check() {
        let raw = signed("1700000000").replace("auth_date=1700000000", "auth_date=5");
        let data = parse(&raw).unwrap();
        assert_eq!(data.auth_date, 5);
        assert_eq!(data.user.first_name, "Ada");
        assert_eq!(parse("auth_date=1").unwrap_err(), InitDataError::MissingHash);
    }
}

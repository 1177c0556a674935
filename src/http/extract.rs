//! Request extractors for bearer sessions, the admin token and request
//! bodies/paths/queries whose rejections use the JSON error envelope.

use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::AppState;
use crate::auth;
use crate::error::AppError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// `axum::Json` with rejections reported as `invalid_request`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Id of the user owning the request's bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
        let user_id = auth::authenticate(&state.pool, token, Utc::now()).await?;
        Ok(AuthUser(user_id))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Passes only when `X-Admin-Token` matches the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl FromRequestParts<Arc<AppState>> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(AppError::Forbidden("admin API is disabled".into()));
        };
        let given = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing admin token".into()))?;
        if !tokens_match(given, expected) {
            return Err(AppError::Forbidden("invalid admin token".into()));
        }
        Ok(Admin)
    }
}

// Digests have a fixed length, so the comparison time does not depend on
// how much of the token is right.
fn tokens_match(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(auth: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, auth)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&parts("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&parts("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&parts("Basic abc")), None);
        assert_eq!(bearer_token(&parts("Bearer ")), None);
    }

    #[test]
    fn admin_tokens_compare_by_digest() {
        assert!(tokens_match("admin-secret", "admin-secret"));
        assert!(!tokens_match("admin-secreT", "admin-secret"));
        assert!(!tokens_match("admin", "admin-secret"));
        assert!(!tokens_match("", "admin-secret"));
    }
}

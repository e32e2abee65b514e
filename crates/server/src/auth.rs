//! Request authentication.
//!
//! Accounts authenticate with a bearer access token issued at login: the same
//! Ed25519 capability token as reading sessions, with scope `access`. The
//! companion bot authenticates with a shared key in the `x-bot-key` header.
//! Telegram logins are authenticated by the widget signature, see
//! [`readearn_common::telegram_auth`].

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use readearn_common::{AccountId, Claims, Scope};
use readearn_ledger::LedgerError;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub const BOT_KEY_HEADER: &str = "x-bot-key";

/// The account behind a valid bearer token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser(pub AccountId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let claims = state
            .ledger
            .rewards
            .signer()
            .verify(token, Utc::now())
            .map_err(|e| {
                debug!(error = %e, "bearer token rejected");
                ApiError::Unauthorized
            })?;
        if claims.scope != Scope::Access {
            return Err(ApiError::Unauthorized);
        }
        Ok(AuthUser(claims.subject))
    }
}

/// Marker extractor: the request carries the configured bot key.
#[derive(Clone, Copy, Debug)]
pub struct BotKey;

#[async_trait]
impl FromRequestParts<AppState> for BotKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.bot_api_key.as_deref().ok_or(ApiError::Unauthorized)?;
        let presented = parts
            .headers
            .get(BOT_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        if keys_match(expected.as_bytes(), presented.as_bytes()) {
            Ok(BotKey)
        } else {
            debug!("bot key mismatch");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Constant-time for equal lengths; unequal lengths never match.
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Issues a bearer token for `account`.
pub fn issue_access_token(
    state: &AppState,
    account: AccountId,
    now: DateTime<Utc>,
) -> Result<String, ApiError> {
    let claims = Claims::access(account, now, state.access_ttl);
    state
        .ledger
        .rewards
        .signer()
        .issue(&claims)
        .map_err(|e| ApiError::from(LedgerError::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match() {
        assert!(keys_match(b"secret", b"secret"));
        assert!(!keys_match(b"secret", b"secreT"));
        assert!(!keys_match(b"secret", b"secret2"));
        assert!(!keys_match(b"", b"x"));
    }
}

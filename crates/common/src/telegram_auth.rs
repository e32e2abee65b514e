//! # Telegram Login Verification
//!
//! Checks a Telegram Login Widget payload before it is trusted as an
//! identity.
//!
//! | Step | Rule |
//! |------|------|
//! | data-check string | every field except `hash`, as `key=value`, sorted by key, joined by `\n` |
//! | secret | `SHA256(bot_token)` |
//! | signature | `hex(HMAC-SHA256(secret, data-check string))`, compared in constant time |
//! | freshness | `auth_date` present and within [`TELEGRAM_AUTH_MAX_AGE_SECS`] of now, either side |
//!
//! Field values are stringified the way the widget serializes them: numbers
//! in decimal, arrays joined with `,`, `null` as the empty string.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::account::Profile;

type HmacSha256 = Hmac<Sha256>;

/// Largest accepted distance between `auth_date` and now (24 hours).
pub const TELEGRAM_AUTH_MAX_AGE_SECS: i64 = 86_400;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelegramAuthError {
    #[error("login payload has no hash")]
    MissingHash,

    #[error("login payload signature mismatch")]
    BadSignature,

    #[error("login payload is stale ({age_secs}s old)")]
    Stale { age_secs: i64 },

    #[error("login payload field `{0}` is missing or malformed")]
    BadField(&'static str),

    #[error("invalid signing key")]
    Key,
}

/// Identity carried by a verified payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramUser {
    pub telegram_id: i64,
    pub profile: Profile,
}

/// Signed login payload, field values already stringified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelegramAuthPayload {
    fields: BTreeMap<String, String>,
}

fn stringify(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(stringify)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

impl TelegramAuthPayload {
    pub fn from_json<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k, stringify(v))).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Sorted `key=value` lines of every field except `hash`.
    pub fn data_check_string(&self) -> String {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != "hash")
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn mac(&self, bot_token: &str) -> Result<HmacSha256, TelegramAuthError> {
        let secret = Sha256::digest(bot_token.as_bytes());
        let mut mac = HmacSha256::new_from_slice(&secret).map_err(|_| TelegramAuthError::Key)?;
        mac.update(self.data_check_string().as_bytes());
        Ok(mac)
    }

    /// Hex signature the bot owning `bot_token` would attach.
    pub fn expected_hash(&self, bot_token: &str) -> Result<String, TelegramAuthError> {
        Ok(hex::encode(self.mac(bot_token)?.finalize().into_bytes()))
    }

    /// Checks signature, then freshness, then extracts the identity.
    pub fn verify(
        &self,
        bot_token: &str,
        now: DateTime<Utc>,
        max_age_secs: i64,
    ) -> Result<TelegramUser, TelegramAuthError> {
        let hash = self
            .get("hash")
            .filter(|h| !h.is_empty())
            .ok_or(TelegramAuthError::MissingHash)?;
        let presented = hex::decode(hash).map_err(|_| TelegramAuthError::BadSignature)?;
        self.mac(bot_token)?
            .verify_slice(&presented)
            .map_err(|_| TelegramAuthError::BadSignature)?;

        let auth_date: i64 = self
            .get("auth_date")
            .and_then(|v| v.parse().ok())
            .filter(|d| *d != 0)
            .ok_or(TelegramAuthError::BadField("auth_date"))?;
        let age_secs = now.timestamp() - auth_date;
        if age_secs.abs() > max_age_secs {
            return Err(TelegramAuthError::Stale { age_secs });
        }

        let telegram_id: i64 = self
            .get("id")
            .and_then(|v| v.parse().ok())
            .ok_or(TelegramAuthError::BadField("id"))?;
        let text = |key: &str| self.get(key).filter(|v| !v.is_empty()).map(str::to_string);
        Ok(TelegramUser {
            telegram_id,
            profile: Profile {
                first_name: text("first_name"),
                last_name: text("last_name"),
                username: text("username"),
                photo_url: text("photo_url"),
            },
        })
    }
}

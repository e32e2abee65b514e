//! Signed capability tokens and random nonces.
//!
//! Token wire format:
//!
//! ```text
//! base64url(json claims) "." base64url(ed25519 signature over the first part)
//! ```
//!
//! Key material uses the combined 64-byte layout (`[0..32]` private,
//! `[32..64]` public) hex encoded; a bare 32-byte seed is accepted too.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hex::{decode as hex_decode, encode as hex_encode};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::AccountId;

/// Reading sessions live for 10 minutes.
pub const READING_TOKEN_TTL_SECS: i64 = 600;

/// Default bearer token lifetime: 30 days.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 30 * 86_400;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    #[error("invalid key material: {0}")]
    Key(String),
}

// ════════════════════════════════════════════════════════════════════════════════
// SCOPE & CLAIMS
// ════════════════════════════════════════════════════════════════════════════════

/// What a token grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Bearer access to the account's own endpoints.
    Access,
    /// One reading-reward claim for the named book.
    Reading(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Access => f.write_str("access"),
            Scope::Reading(book) => write!(f, "reading:{book}"),
        }
    }
}

impl FromStr for Scope {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "access" {
            return Ok(Scope::Access);
        }
        match s.strip_prefix("reading:") {
            Some(book) if !book.is_empty() => Ok(Scope::Reading(book.to_string())),
            _ => Err(TokenError::Malformed(format!("unknown scope `{s}`"))),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub subject: AccountId,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

impl Claims {
    pub fn reading(
        subject: AccountId,
        book_id: &str,
        nonce: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self::with_ttl(subject, Scope::Reading(book_id.to_string()), Some(nonce), now, ttl)
    }

    pub fn access(subject: AccountId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::with_ttl(subject, Scope::Access, None, now, ttl)
    }

    fn with_ttl(
        subject: AccountId,
        scope: Scope,
        nonce: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            subject,
            scope,
            nonce,
            issued_at: now.timestamp(),
            expires_at: (now + ttl).timestamp(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SIGNER
// ════════════════════════════════════════════════════════════════════════════════

/// Issues and verifies capability tokens with one Ed25519 key.
#[derive(Clone)]
pub struct TokenSigner {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("public_key", &hex_encode(self.verifying.to_bytes()))
            .finish()
    }
}

impl TokenSigner {
    /// Fresh random key.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    /// Accepts a 32-byte seed or a 64-byte combined keypair, hex encoded.
    pub fn from_hex(hexstr: &str) -> Result<Self, TokenError> {
        let bytes = hex_decode(hexstr.trim()).map_err(|e| TokenError::Key(e.to_string()))?;
        if bytes.len() != 32 && bytes.len() != 64 {
            return Err(TokenError::Key(format!(
                "invalid key length: expected 32 or 64, found {}",
                bytes.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[0..32]);
        let signer = Self::from_signing_key(SigningKey::from_bytes(&seed));

        if bytes.len() == 64 && bytes[32..64] != signer.verifying.to_bytes() {
            return Err(TokenError::Key("public half does not match private key".into()));
        }
        Ok(signer)
    }

    /// Combined 64-byte keypair as hex.
    pub fn to_hex(&self) -> String {
        let mut combined = Vec::with_capacity(64);
        combined.extend_from_slice(&self.signing.to_bytes());
        combined.extend_from_slice(&self.verifying.to_bytes());
        hex_encode(combined)
    }

    pub fn public_key_hex(&self) -> String {
        hex_encode(self.verifying.to_bytes())
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let body = URL_SAFE_NO_PAD.encode(payload);
        let sig = self.signing.sign(body.as_bytes());
        Ok(format!("{body}.{}", URL_SAFE_NO_PAD.encode(sig.to_bytes())))
    }

    /// Checks structure, signature and expiry. Scope and subject are left to
    /// the caller.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (body, sig_part) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature segment".into()))?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| TokenError::Malformed("signature must be 64 bytes".into()))?;
        let sig = Signature::from_bytes(&sig_arr);

        self.verifying
            .verify(body.as_bytes(), &sig)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|e| TokenError::Malformed(e.to_string()))?;

        if claims.is_expired(now) {
            return Err(TokenError::Expired {
                expired_at: claims.expires_at,
            });
        }
        Ok(claims)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// NONCES
// ════════════════════════════════════════════════════════════════════════════════

/// 128 random bits as lowercase hex.
pub fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(bytes)
}

/// Six-digit wallet login nonce.
pub fn login_nonce() -> String {
    OsRng.gen_range(100_000u32..1_000_000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn reading_ttl() -> Duration {
        Duration::seconds(READING_TOKEN_TTL_SECS)
    }

    #[test]
    fn test_issue_verify() {
        let signer = TokenSigner::generate();
        let subject = AccountId::new();
        let claims = Claims::reading(subject, "book-1", "n1".into(), ts(1_000), reading_ttl());
        let token = signer.issue(&claims).expect("issue");

        let got = signer.verify(&token, ts(1_100)).expect("verify");
        assert_eq!(got, claims);
        assert_eq!(got.scope, Scope::Reading("book-1".into()));
        assert_eq!(got.expires_at, 1_000 + READING_TOKEN_TTL_SECS);
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = TokenSigner::generate();
        let claims = Claims::reading(AccountId::new(), "b", "n".into(), ts(1_000), reading_ttl());
        let token = signer.issue(&claims).expect("issue");
        let err = signer.verify(&token, ts(1_000 + READING_TOKEN_TTL_SECS)).unwrap_err();
        assert_eq!(
            err,
            TokenError::Expired {
                expired_at: 1_000 + READING_TOKEN_TTL_SECS
            }
        );
    }

    #[test]
    fn test_foreign_key_rejected() {
        let a = TokenSigner::generate();
        let b = TokenSigner::generate();
        let token = a
            .issue(&Claims::access(AccountId::new(), ts(0), Duration::days(1)))
            .expect("issue");
        assert_eq!(b.verify(&token, ts(10)).unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signer = TokenSigner::generate();
        let token = signer
            .issue(&Claims::access(AccountId::new(), ts(0), Duration::days(1)))
            .expect("issue");
        let (_, sig) = token.split_once('.').expect("two parts");
        let forged_claims = Claims::access(AccountId::new(), ts(0), Duration::days(1));
        let forged_body =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).expect("json"));
        let forged = format!("{forged_body}.{sig}");
        assert_eq!(signer.verify(&forged, ts(10)).unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn test_malformed_inputs() {
        let signer = TokenSigner::generate();
        assert!(matches!(signer.verify("", ts(0)), Err(TokenError::Malformed(_))));
        assert!(matches!(signer.verify("abc", ts(0)), Err(TokenError::Malformed(_))));
        assert!(matches!(signer.verify("abc.!!!", ts(0)), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let signer = TokenSigner::generate();
        let restored = TokenSigner::from_hex(&signer.to_hex()).expect("from hex");
        assert_eq!(restored.public_key_hex(), signer.public_key_hex());

        let seed_only = &signer.to_hex()[..64];
        let from_seed = TokenSigner::from_hex(seed_only).expect("seed");
        assert_eq!(from_seed.public_key_hex(), signer.public_key_hex());

        assert!(matches!(TokenSigner::from_hex("abcd"), Err(TokenError::Key(_))));
        assert!(matches!(TokenSigner::from_hex("zz"), Err(TokenError::Key(_))));
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("access".parse::<Scope>(), Ok(Scope::Access));
        assert_eq!("reading:42".parse::<Scope>(), Ok(Scope::Reading("42".into())));
        assert!("reading:".parse::<Scope>().is_err());
        assert!("admin".parse::<Scope>().is_err());
    }

    #[test]
    fn test_nonces() {
        assert_ne!(random_nonce(), random_nonce());
        assert_eq!(random_nonce().len(), 32);
        let n = login_nonce();
        assert_eq!(n.len(), 6);
        assert!(n.chars().all(|c| c.is_ascii_digit()));
    }
}

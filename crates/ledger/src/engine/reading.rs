//! # Book Reading Rewards
//!
//! Reading rewards are bound to a single-use capability token:
//!
//! 1. `open_reading_session` rotates `reading_session_nonce` and returns a
//!    token carrying `{account, reading:<book>, nonce}`.
//! 2. `claim_reading` verifies the token (signature, expiry, subject, scope)
//!    before reading any state, then pays 20 tokens in one conditional write
//!    guarded by *nonce still current* and *cooldown elapsed*. The same write
//!    rotates the nonce and the response carries the next token.
//!
//! A stale token is reported as `NonceMismatch` even while the cooldown is
//! also active: the nonce check comes first.

use chrono::{DateTime, Duration, Utc};
use readearn_common::crypto::random_nonce;
use readearn_common::{Account, AccountId, Claims, Scope};
use serde::Serialize;
use tracing::{debug, info};

use super::{Guarded, RewardLedger};
use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason, Settlement};

/// A freshly issued reading token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    pub token: String,
    pub book_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingGrant {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub next_session: ReadingSession,
    pub next_reward_at: DateTime<Utc>,
}

fn nonce_current(account: &Account, presented: &str) -> bool {
    account
        .reading_session_nonce
        .as_deref()
        .map_or(true, |stored| stored == presented)
}

impl RewardLedger {
    fn reading_session(
        &self,
        id: AccountId,
        book_id: &str,
        nonce: String,
        now: DateTime<Utc>,
    ) -> Result<ReadingSession, LedgerError> {
        let ttl = Duration::seconds(self.policy.reading_token_ttl_secs);
        let claims = Claims::reading(id, book_id, nonce, now, ttl);
        let token = self.signer.issue(&claims)?;
        Ok(ReadingSession {
            token,
            book_id: book_id.to_string(),
            expires_at: now + ttl,
        })
    }

    /// Starts (or restarts) a reading session for `book_id`.
    ///
    /// Any token issued earlier for this account stops being claimable.
    pub async fn open_reading_session(
        &self,
        id: AccountId,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<ReadingSession>, LedgerError> {
        let book_id = book_id.trim();
        if book_id.is_empty() {
            return Ok(Outcome::Rejected(RejectReason::MissingBookId));
        }

        let nonce = random_nonce();
        let session = self.reading_session(id, book_id, nonce.clone(), now)?;

        let always = |_: &Account| true;
        let rotate = move |a: &mut Account| a.reading_session_nonce = Some(nonce.clone());

        match self.guarded("reading_session", id, &always, &rotate).await? {
            Guarded::Applied(_) => {
                debug!(account = %id, book = book_id, "reading session opened");
                Ok(Outcome::Applied(session))
            }
            // unreachable with an always-true predicate
            Guarded::Refused(_) => Ok(Outcome::Rejected(RejectReason::NonceMismatch)),
        }
    }

    pub async fn claim_reading(
        &self,
        id: AccountId,
        token: &str,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<ReadingGrant>, LedgerError> {
        let book_id = book_id.trim();
        if book_id.is_empty() {
            return Ok(Outcome::Rejected(RejectReason::MissingBookId));
        }

        let claims = match self.signer.verify(token, now) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(account = %id, error = %e, "reading token rejected");
                return Ok(Outcome::Rejected(RejectReason::InvalidSessionToken(e)));
            }
        };
        if claims.subject != id || claims.scope != Scope::Reading(book_id.to_string()) {
            return Ok(Outcome::Rejected(RejectReason::SessionMismatch));
        }
        let Some(presented) = claims.nonce else {
            return Ok(Outcome::Rejected(RejectReason::SessionMismatch));
        };

        let window = self.policy.reading_window();
        let amount = self.policy.reading_reward;
        let next_nonce = random_nonce();
        let next_session = self.reading_session(id, book_id, next_nonce.clone(), now)?;

        let eligible = |a: &Account| {
            nonce_current(a, &presented) && !window.is_active(a.last_book_reward_at, now)
        };
        let pay = move |a: &mut Account| {
            a.credit(amount);
            a.last_book_reward_at = Some(now);
            a.reading_session_nonce = Some(next_nonce.clone());
        };

        match self.guarded("reading", id, &eligible, &pay).await? {
            Guarded::Applied(acc) => {
                info!(account = %id, book = book_id, amount, "reading reward paid");
                Ok(Outcome::Applied(ReadingGrant {
                    settlement: Settlement::of(amount, &acc),
                    next_session,
                    next_reward_at: now + window.duration(),
                }))
            }
            Guarded::Refused(acc) => {
                let reason = if !nonce_current(&acc, &presented) {
                    RejectReason::NonceMismatch
                } else {
                    RejectReason::ReadingCooldown {
                        remaining_secs: window.remaining_secs_ceil(acc.last_book_reward_at, now),
                    }
                };
                debug!(account = %id, %reason, "reading reward refused");
                Ok(Outcome::Rejected(reason))
            }
        }
    }
}

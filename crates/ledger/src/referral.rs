//! # Referral Graph Manager
//!
//! Binds a joining account to exactly one referrer, exactly once, without
//! cycles, then pays a one-time reward to up to three upline levels.
//!
//! ## State Machine (joiner perspective)
//!
//! ```text
//! UNBOUND ──bind──► BOUND ──mark──► PAYING ──last level──► REWARDED
//! ```
//!
//! | Transition | Guard (re-checked inside the atomic write) | Effect |
//! |------------|---------------------------------------------|--------|
//! | bind | `!referral_used && referred_by.is_none()` | set `referred_by`, `referral_used`, `referral_bound_at`, clear bot flag |
//! | mark | `referral_rewarded_at.is_none()` | set `referral_rewarded_at`, `referral_reward_tx_id` |
//! | level paid | `referral_levels_paid < level` | advance `referral_levels_paid` |
//! | complete | `referral_payout_completed_at.is_none()` | set `referral_payout_completed_at` |
//!
//! After the marker is written each present level is credited as an
//! independent increment:
//!
//! | Level | Beneficiary | Amount |
//! |-------|-------------|--------|
//! | 1 | referrer | 2000 |
//! | 2 | referrer's referrer | 500 |
//! | 3 | next one up | 200 |
//!
//! A beneficiary credit is guarded by the joiner's id in
//! `referral_credited_from`, so a level is paid at most once even when the
//! joiner's progress write is lost. A store error anywhere in the fan-out is
//! returned to the caller; the next login of a `PAYING` joiner resumes at the
//! first uncredited level.
//!
//! ## Referral Codes
//!
//! A code made only of ASCII digits is a Telegram id. Anything else must
//! parse as an account id (UUID). The two forms cannot collide.
//!
//! ## Bot Hand-off
//!
//! The companion bot only records a provisional [`PendingReferral`] on the
//! joiner. Binding and payouts happen on the next authenticated login, which
//! re-validates everything.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use readearn_common::{
    Account, AccountId, Identity, PendingReferral, Profile, ReferralLevelReward, ReferralState,
    RewardPolicy,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::accounts::find_or_create;
use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason};
use crate::store::{AccountKey, AccountStore, UpdateOutcome};

/// Upper bound on the ancestor walk used by the cycle check.
pub const MAX_CHAIN_DEPTH: usize = 1024;

/// Number of upline levels that receive a joining reward.
pub const REWARD_LEVELS: u8 = 3;

// ════════════════════════════════════════════════════════════════════════════════
// REFERRAL CODE
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferralCode {
    TelegramId(i64),
    Account(AccountId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidReferralCode(pub String);

impl fmt::Display for InvalidReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid referral code: {}", self.0)
    }
}

impl std::error::Error for InvalidReferralCode {}

impl FromStr for ReferralCode {
    type Err = InvalidReferralCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.is_empty() {
            return Err(InvalidReferralCode(s.to_string()));
        }
        if code.bytes().all(|b| b.is_ascii_digit()) {
            return code
                .parse::<i64>()
                .map(ReferralCode::TelegramId)
                .map_err(|_| InvalidReferralCode(s.to_string()));
        }
        code.parse::<AccountId>()
            .map(ReferralCode::Account)
            .map_err(|_| InvalidReferralCode(s.to_string()))
    }
}

impl ReferralCode {
    pub fn key(&self) -> AccountKey {
        match self {
            ReferralCode::TelegramId(tg) => AccountKey::TelegramId(*tg),
            ReferralCode::Account(id) => AccountKey::Id(*id),
        }
    }
}

/// Telegram id from a bot `/start` payload: `r<digits>` or `<digits>`.
pub fn parse_start_payload(payload: &str) -> Option<i64> {
    let payload = payload.trim();
    let digits = payload.strip_prefix('r').unwrap_or(payload);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// ════════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPayout {
    pub level: u8,
    pub beneficiary: AccountId,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralBinding {
    pub referrer: AccountId,
    pub payouts: Vec<LevelPayout>,
}

impl ReferralBinding {
    pub fn total_paid(&self) -> u64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

/// What the bot hand-off did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotReferral {
    Marked,
    AlreadyPending,
    AlreadyBound,
    SelfReferral,
    UnknownReferrer,
}

/// Downline entry as shown to the referrer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferredUser {
    pub id: AccountId,
    pub telegram_id: Option<i64>,
    pub profile: Profile,
    pub joined_at: Option<DateTime<Utc>>,
    pub lifetime_balance: u64,
}

fn unbound(a: &Account) -> bool {
    !a.referral_used && a.referred_by.is_none()
}

// ════════════════════════════════════════════════════════════════════════════════
// MANAGER
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ReferralGraph {
    store: Arc<dyn AccountStore>,
    policy: RewardPolicy,
}

impl ReferralGraph {
    pub fn new(store: Arc<dyn AccountStore>, policy: RewardPolicy) -> Self {
        Self { store, policy }
    }

    /// Resolves a referral code to an account.
    pub async fn resolve(&self, code: &str) -> Result<Outcome<Account>, LedgerError> {
        let Ok(parsed) = code.parse::<ReferralCode>() else {
            return Ok(Outcome::Rejected(RejectReason::InvalidReferralCode));
        };
        match self.store.find(&parsed.key()).await? {
            Some(acc) => Ok(Outcome::Applied(acc)),
            None => Ok(Outcome::Rejected(RejectReason::UnknownReferrer)),
        }
    }

    /// Binds `joiner` to the owner of `code` and pays the upline.
    pub async fn bind_with_code(
        &self,
        joiner: AccountId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<ReferralBinding>, LedgerError> {
        match self.resolve(code).await? {
            Outcome::Applied(referrer) => self.bind(joiner, &referrer, now).await,
            Outcome::Rejected(reason) => {
                debug!(account = %joiner, %reason, "referral code rejected");
                Ok(Outcome::Rejected(reason))
            }
        }
    }

    /// Referral step of an authenticated login.
    ///
    /// An explicit code wins over a bot-recorded pending referral. A joiner
    /// left `BOUND` or `PAYING` by an interrupted earlier attempt gets the
    /// downline entry and the remaining levels retried.
    /// Returns `None` when there was nothing to do.
    pub async fn on_login(
        &self,
        joiner: AccountId,
        code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Outcome<ReferralBinding>>, LedgerError> {
        let account = self.store.get(joiner).await?;
        let code = code.map(str::trim).filter(|c| !c.is_empty());

        match account.referral_state() {
            ReferralState::Rewarded => {
                Ok(code.map(|_| Outcome::Rejected(RejectReason::ReferralAlreadyBound)))
            }
            ReferralState::Bound | ReferralState::Paying => {
                let Some(referrer) = account.referred_by else {
                    return Ok(None);
                };
                debug!(account = %joiner, %referrer, "resuming referral fan-out");
                self.add_downline(referrer, joiner).await?;
                let outcome = self.settle_reward(joiner, now).await?;
                Ok(Some(outcome.map(|payouts| ReferralBinding { referrer, payouts })))
            }
            ReferralState::Unbound => {
                if let Some(code) = code {
                    return self.bind_with_code(joiner, code, now).await.map(Some);
                }
                let Some(pending) = account.bot_referral.clone() else {
                    return Ok(None);
                };
                let outcome = match self.store.find(&AccountKey::Id(pending.referrer)).await? {
                    Some(referrer) => self.bind(joiner, &referrer, now).await?,
                    None => Outcome::Rejected(RejectReason::UnknownReferrer),
                };
                if let Outcome::Rejected(reason) = &outcome {
                    if matches!(
                        reason,
                        RejectReason::UnknownReferrer
                            | RejectReason::SelfReferral
                            | RejectReason::ReferralCycle
                    ) {
                        self.clear_pending(joiner, &pending).await?;
                    }
                }
                Ok(Some(outcome))
            }
        }
    }

    /// `UNBOUND → BOUND`, then the one-time fan-out.
    pub async fn bind(
        &self,
        joiner: AccountId,
        referrer: &Account,
        now: DateTime<Utc>,
    ) -> Result<Outcome<ReferralBinding>, LedgerError> {
        if referrer.id == joiner {
            return Ok(Outcome::Rejected(RejectReason::SelfReferral));
        }
        let current = self.store.get(joiner).await?;
        if !unbound(&current) {
            return Ok(Outcome::Rejected(RejectReason::ReferralAlreadyBound));
        }
        if self.is_downline(referrer, joiner).await? {
            warn!(account = %joiner, referrer = %referrer.id, "referral cycle rejected");
            return Ok(Outcome::Rejected(RejectReason::ReferralCycle));
        }

        let referrer_id = referrer.id;
        let bind = move |a: &mut Account| {
            a.referred_by = Some(referrer_id);
            a.referral_used = true;
            a.referral_bound_at = Some(now);
            a.bot_referral = None;
        };
        match self.store.conditional_update(joiner, &unbound, &bind).await? {
            UpdateOutcome::Applied(_) => {
                info!(account = %joiner, referrer = %referrer_id, "referral bound");
            }
            UpdateOutcome::PreconditionFailed(_) => {
                warn!(account = %joiner, "referral bind lost race");
                return Ok(Outcome::Rejected(RejectReason::ReferralAlreadyBound));
            }
            UpdateOutcome::NotFound => return Err(LedgerError::AccountNotFound(joiner)),
        }

        self.add_downline(referrer_id, joiner).await?;

        let payouts = match self.settle_reward(joiner, now).await? {
            Outcome::Applied(payouts) => payouts,
            Outcome::Rejected(reason) => {
                warn!(account = %joiner, %reason, "fan-out skipped after bind");
                Vec::new()
            }
        };
        Ok(Outcome::Applied(ReferralBinding {
            referrer: referrer_id,
            payouts,
        }))
    }

    /// `BOUND → PAYING → REWARDED`: writes the one-time marker, then credits
    /// each upline level independently.
    ///
    /// A joiner already in `PAYING` skips the marker and continues from
    /// `referral_levels_paid`. Store errors are returned; the marker is never
    /// rolled back, so the caller can retry.
    pub async fn settle_reward(
        &self,
        joiner: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Vec<LevelPayout>>, LedgerError> {
        let tx_id = format!("ref:{joiner}");
        let unpaid = |a: &Account| a.referral_rewarded_at.is_none() && a.referred_by.is_some();
        let mark = |a: &mut Account| {
            a.referral_rewarded_at = Some(now);
            a.referral_reward_tx_id = Some(tx_id.clone());
        };

        let marked = match self.store.conditional_update(joiner, &unpaid, &mark).await? {
            UpdateOutcome::Applied(acc) => acc,
            UpdateOutcome::PreconditionFailed(acc) if acc.referral_state() == ReferralState::Paying => {
                info!(account = %joiner, levels_paid = acc.referral_levels_paid, "resuming partial fan-out");
                acc
            }
            UpdateOutcome::PreconditionFailed(acc) => {
                let reason = if acc.referral_rewarded_at.is_some() {
                    RejectReason::ReferralAlreadyRewarded
                } else {
                    RejectReason::NotReferred
                };
                debug!(account = %joiner, %reason, "fan-out not applicable");
                return Ok(Outcome::Rejected(reason));
            }
            UpdateOutcome::NotFound => return Err(LedgerError::AccountNotFound(joiner)),
        };

        let payouts = self.pay_levels(&marked, now).await?;

        let open = |a: &Account| a.referral_payout_completed_at.is_none();
        let complete = |a: &mut Account| a.referral_payout_completed_at = Some(now);
        self.store.conditional_update(joiner, &open, &complete).await?;
        Ok(Outcome::Applied(payouts))
    }

    /// Credits every upline level above `joiner.referral_levels_paid`.
    ///
    /// Levels already recorded on the joiner are only walked to find the next
    /// beneficiary. Returns the payouts made by this call.
    async fn pay_levels(
        &self,
        joiner: &Account,
        now: DateTime<Utc>,
    ) -> Result<Vec<LevelPayout>, LedgerError> {
        let joiner_id = joiner.id;
        let mut payouts = Vec::new();
        let mut seen = HashSet::from([joiner_id]);
        let mut cursor = joiner.referred_by;

        for level in 1..=REWARD_LEVELS {
            let Some(beneficiary) = cursor else { break };
            if !seen.insert(beneficiary) {
                warn!(account = %joiner_id, %beneficiary, level, "upline loops back, stopping");
                break;
            }
            let Some(amount) = self.policy.referral_reward(level) else { break };

            if level <= joiner.referral_levels_paid {
                cursor = match self.store.find(&AccountKey::Id(beneficiary)).await? {
                    Some(acc) => acc.referred_by,
                    None => None,
                };
                continue;
            }

            let uncredited = move |a: &Account| !a.referral_credited_from.contains(&joiner_id);
            let credit = move |a: &mut Account| {
                a.credit(amount);
                a.record_level_reward(level, amount, now);
                a.referral_credited_from.insert(joiner_id);
            };
            cursor = match self.store.conditional_update(beneficiary, &uncredited, &credit).await {
                Ok(UpdateOutcome::Applied(acc)) => {
                    info!(account = %joiner_id, %beneficiary, level, amount, "referral level paid");
                    payouts.push(LevelPayout {
                        level,
                        beneficiary,
                        amount,
                    });
                    acc.referred_by
                }
                Ok(UpdateOutcome::PreconditionFailed(acc)) => {
                    debug!(account = %joiner_id, %beneficiary, level, "level already credited");
                    acc.referred_by
                }
                Ok(UpdateOutcome::NotFound) => {
                    warn!(account = %joiner_id, %beneficiary, level, "upline account missing, fan-out ends here");
                    break;
                }
                Err(e) => {
                    error!(account = %joiner_id, %beneficiary, level, error = %e, "fan-out interrupted");
                    return Err(e.into());
                }
            };

            let behind = move |a: &Account| a.referral_levels_paid < level;
            let advance = move |a: &mut Account| a.referral_levels_paid = level;
            self.store.conditional_update(joiner_id, &behind, &advance).await?;
        }
        Ok(payouts)
    }

    /// Walks `candidate`'s ancestors looking for `joiner`.
    ///
    /// A chain deeper than [`MAX_CHAIN_DEPTH`] or one that loops counts as a
    /// cycle.
    async fn is_downline(&self, candidate: &Account, joiner: AccountId) -> Result<bool, LedgerError> {
        let mut seen = HashSet::from([candidate.id]);
        let mut cursor = candidate.referred_by;
        while let Some(ancestor) = cursor {
            if ancestor == joiner {
                return Ok(true);
            }
            if !seen.insert(ancestor) || seen.len() > MAX_CHAIN_DEPTH {
                return Ok(true);
            }
            cursor = match self.store.find(&AccountKey::Id(ancestor)).await? {
                Some(acc) => acc.referred_by,
                None => None,
            };
        }
        Ok(false)
    }

    /// Adds `joiner` to the referrer's downline set. Safe to repeat.
    async fn add_downline(&self, referrer: AccountId, joiner: AccountId) -> Result<(), LedgerError> {
        let missing = move |a: &Account| !a.referred_users.contains(&joiner);
        let add = move |a: &mut Account| {
            a.referred_users.insert(joiner);
            a.referral_count = a.referred_users.len() as u64;
        };
        match self.store.conditional_update(referrer, &missing, &add).await {
            Ok(UpdateOutcome::Applied(acc)) => {
                debug!(%referrer, count = acc.referral_count, "downline updated");
            }
            Ok(UpdateOutcome::PreconditionFailed(_)) => {}
            Ok(UpdateOutcome::NotFound) => {
                warn!(%referrer, %joiner, "referrer vanished before downline update");
            }
            Err(e) => {
                error!(%referrer, %joiner, error = %e, "downline update failed");
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn clear_pending(
        &self,
        joiner: AccountId,
        pending: &PendingReferral,
    ) -> Result<(), LedgerError> {
        let same = |a: &Account| a.bot_referral.as_ref() == Some(pending);
        let clear = |a: &mut Account| a.bot_referral = None;
        self.store.conditional_update(joiner, &same, &clear).await?;
        Ok(())
    }

    // ── bot hand-off ─────────────────────────────────────────────────────

    /// Records a deep-link referral observed by the bot. Never binds or pays.
    pub async fn record_bot_referral(
        &self,
        joiner_telegram_id: i64,
        referrer_telegram_id: i64,
        profile: Profile,
        now: DateTime<Utc>,
    ) -> Result<BotReferral, LedgerError> {
        if joiner_telegram_id == referrer_telegram_id {
            return Ok(BotReferral::SelfReferral);
        }
        let Some(referrer) = self
            .store
            .find(&AccountKey::TelegramId(referrer_telegram_id))
            .await?
        else {
            return Ok(BotReferral::UnknownReferrer);
        };

        let (joiner, created) = find_or_create(
            self.store.as_ref(),
            AccountKey::TelegramId(joiner_telegram_id),
            Identity::telegram(joiner_telegram_id),
            now,
        )
        .await?;
        if created {
            let fill = |a: &mut Account| a.profile = profile.clone();
            self.store
                .conditional_update(joiner.id, &|_| true, &fill)
                .await?;
        }

        let pending = PendingReferral {
            referrer: referrer.id,
            observed_at: now,
        };
        let open = |a: &Account| unbound(a) && a.bot_referral.is_none();
        let mark = |a: &mut Account| a.bot_referral = Some(pending.clone());

        match self.store.conditional_update(joiner.id, &open, &mark).await? {
            UpdateOutcome::Applied(_) => {
                info!(joiner = joiner_telegram_id, referrer = referrer_telegram_id, "bot referral recorded");
                Ok(BotReferral::Marked)
            }
            UpdateOutcome::PreconditionFailed(acc) if !unbound(&acc) => Ok(BotReferral::AlreadyBound),
            UpdateOutcome::PreconditionFailed(_) => Ok(BotReferral::AlreadyPending),
            UpdateOutcome::NotFound => Err(LedgerError::AccountNotFound(joiner.id)),
        }
    }

    // ── reads ────────────────────────────────────────────────────────────

    /// Per-level totals for levels 1 to 3, zero-filled.
    pub async fn referral_levels(&self, id: AccountId) -> Result<Vec<ReferralLevelReward>, LedgerError> {
        let account = self.store.get(id).await?;
        Ok((1..=REWARD_LEVELS)
            .map(|level| {
                account.referral_level(level).cloned().unwrap_or(ReferralLevelReward {
                    level,
                    total_earned: 0,
                    referral_count: 0,
                    last_reward_at: None,
                })
            })
            .collect())
    }

    /// Direct downline, most recent join first.
    pub async fn referred_users(&self, id: AccountId) -> Result<Vec<ReferredUser>, LedgerError> {
        let account = self.store.get(id).await?;
        let mut users = Vec::with_capacity(account.referred_users.len());
        for member in &account.referred_users {
            if let Some(acc) = self.store.find(&AccountKey::Id(*member)).await? {
                users.push(ReferredUser {
                    id: acc.id,
                    telegram_id: acc.identity.telegram_id,
                    profile: acc.profile,
                    joined_at: acc.referral_bound_at,
                    lifetime_balance: acc.lifetime_balance,
                });
            }
        }
        users.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(users)
    }
}

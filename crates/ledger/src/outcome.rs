//! # Operation Outcomes
//!
//! Business conditions are values, not errors. Every engine operation returns
//! `Result<Outcome<T>, LedgerError>`:
//!
//! | Result | Meaning |
//! |--------|---------|
//! | `Ok(Outcome::Applied(t))` | state changed exactly once |
//! | `Ok(Outcome::Rejected(reason))` | nothing changed; `reason` says why |
//! | `Err(LedgerError)` | infrastructure failure, treat as not applied |
//!
//! A lost race is reported with the same [`RejectReason`] a plain
//! ineligibility would produce, derived from the document the store returned
//! when the precondition failed.

use std::fmt;

use readearn_common::{Account, BundleKind, SocialPlatform, TokenError};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    Rejected(RejectReason),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn applied(&self) -> Option<&T> {
        match self {
            Outcome::Applied(t) => Some(t),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn into_applied(self) -> Option<T> {
        match self {
            Outcome::Applied(t) => Some(t),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            Outcome::Applied(_) => None,
            Outcome::Rejected(r) => Some(r),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Applied(t) => Outcome::Applied(f(t)),
            Outcome::Rejected(r) => Outcome::Rejected(r),
        }
    }
}

/// Balance after a payout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub amount: u64,
    pub lifetime_balance: u64,
    pub weekly_earned: i64,
}

impl Settlement {
    pub fn of(amount: u64, account: &Account) -> Self {
        Self {
            amount,
            lifetime_balance: account.lifetime_balance,
            weekly_earned: account.weekly_earned,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// REJECT REASONS
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCategory {
    /// Cooldown, limit or already-claimed. Expected, retry later.
    Ineligible,
    /// Bad token, bad code, missing field. Rejected before touching state.
    InvalidInput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    // ── ineligible ──
    SpinCooldown { hours_left: u64, retry_after_secs: u64 },
    QuizLimitReached { limit: u8 },
    ReadingCooldown { remaining_secs: u64 },
    TaskNotStarted { platform: SocialPlatform },
    TaskWaitPending { platform: SocialPlatform, remaining_secs: u64, remaining_minutes: u64 },
    TaskAlreadyRewarded { platform: SocialPlatform },
    TelegramAlreadyClaimed,
    NotChannelMember,
    BundleAlreadyAwarded { bundle: BundleKind },
    BundleRequirementsUnmet { bundle: BundleKind, completed: usize, required: usize },
    WalletAlreadyConnected,
    WalletInUse,
    TelegramAccountRequired,
    ReferralAlreadyBound,
    ReferralAlreadyRewarded,
    ReferralCycle,
    NotReferred,
    SelfReferral,
    UnknownReferrer,
    EmailTaken,

    // ── invalid input ──
    InvalidCredentials,
    WeakPassword { min_len: usize },
    InvalidSessionToken(TokenError),
    SessionMismatch,
    NonceMismatch,
    MissingBookId,
    InvalidReferralCode,
    InvalidWallet,
    InvalidEmail,
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::SpinCooldown { .. } => "spin_cooldown",
            RejectReason::QuizLimitReached { .. } => "quiz_limit_reached",
            RejectReason::ReadingCooldown { .. } => "reading_cooldown",
            RejectReason::TaskNotStarted { .. } => "task_not_started",
            RejectReason::TaskWaitPending { .. } => "task_wait_pending",
            RejectReason::TaskAlreadyRewarded { .. } => "task_already_rewarded",
            RejectReason::TelegramAlreadyClaimed => "telegram_already_claimed",
            RejectReason::NotChannelMember => "not_channel_member",
            RejectReason::BundleAlreadyAwarded { .. } => "bundle_already_awarded",
            RejectReason::BundleRequirementsUnmet { .. } => "bundle_requirements_unmet",
            RejectReason::WalletAlreadyConnected => "wallet_already_connected",
            RejectReason::WalletInUse => "wallet_in_use",
            RejectReason::TelegramAccountRequired => "telegram_account_required",
            RejectReason::ReferralAlreadyBound => "referral_already_bound",
            RejectReason::ReferralAlreadyRewarded => "referral_already_rewarded",
            RejectReason::ReferralCycle => "referral_cycle",
            RejectReason::NotReferred => "not_referred",
            RejectReason::SelfReferral => "self_referral",
            RejectReason::UnknownReferrer => "unknown_referrer",
            RejectReason::EmailTaken => "email_taken",
            RejectReason::InvalidCredentials => "invalid_credentials",
            RejectReason::WeakPassword { .. } => "weak_password",
            RejectReason::InvalidSessionToken(_) => "invalid_session_token",
            RejectReason::SessionMismatch => "session_mismatch",
            RejectReason::NonceMismatch => "nonce_mismatch",
            RejectReason::MissingBookId => "missing_book_id",
            RejectReason::InvalidReferralCode => "invalid_referral_code",
            RejectReason::InvalidWallet => "invalid_wallet",
            RejectReason::InvalidEmail => "invalid_email",
        }
    }

    pub fn category(&self) -> RejectCategory {
        match self {
            RejectReason::InvalidSessionToken(_)
            | RejectReason::SessionMismatch
            | RejectReason::NonceMismatch
            | RejectReason::MissingBookId
            | RejectReason::InvalidReferralCode
            | RejectReason::InvalidWallet
            | RejectReason::InvalidEmail
            | RejectReason::InvalidCredentials
            | RejectReason::WeakPassword { .. } => RejectCategory::InvalidInput,
            _ => RejectCategory::Ineligible,
        }
    }

    /// Seconds until a retry can succeed, for time-gated rejections.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RejectReason::SpinCooldown { retry_after_secs, .. } => Some(*retry_after_secs),
            RejectReason::ReadingCooldown { remaining_secs } => Some(*remaining_secs),
            RejectReason::TaskWaitPending { remaining_secs, .. } => Some(*remaining_secs),
            _ => None,
        }
    }
}

fn bundle_name(bundle: BundleKind) -> &'static str {
    match bundle {
        BundleKind::Compulsory => "compulsory",
        BundleKind::Optional => "optional",
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::SpinCooldown { hours_left, .. } => {
                write!(f, "spin already used, try again in {hours_left} hour(s)")
            }
            RejectReason::QuizLimitReached { limit } => {
                write!(f, "daily quiz limit of {limit} reached, come back tomorrow")
            }
            RejectReason::ReadingCooldown { remaining_secs } => {
                write!(f, "keep reading, next reward in {remaining_secs} second(s)")
            }
            RejectReason::TaskNotStarted { platform } => {
                write!(f, "{platform} task has not been started")
            }
            RejectReason::TaskWaitPending {
                platform,
                remaining_minutes,
                ..
            } => write!(
                f,
                "{platform} follow can be verified in {remaining_minutes} minute(s)"
            ),
            RejectReason::TaskAlreadyRewarded { platform } => {
                write!(f, "{platform} task already rewarded")
            }
            RejectReason::TelegramAlreadyClaimed => f.write_str("telegram follow already claimed"),
            RejectReason::NotChannelMember => f.write_str("join the channel first, then try again"),
            RejectReason::BundleAlreadyAwarded { bundle } => {
                write!(f, "{} bundle already awarded", bundle_name(*bundle))
            }
            RejectReason::BundleRequirementsUnmet {
                bundle,
                completed,
                required,
            } => write!(
                f,
                "{} bundle needs {required} completed task(s), have {completed}",
                bundle_name(*bundle)
            ),
            RejectReason::WalletAlreadyConnected => f.write_str("wallet already connected"),
            RejectReason::WalletInUse => f.write_str("wallet is linked to another account"),
            RejectReason::TelegramAccountRequired => {
                f.write_str("log in with Telegram before connecting a wallet")
            }
            RejectReason::ReferralAlreadyBound => f.write_str("referral already applied"),
            RejectReason::ReferralAlreadyRewarded => f.write_str("referral reward already paid"),
            RejectReason::ReferralCycle => f.write_str("referrer is already in your downline"),
            RejectReason::NotReferred => f.write_str("account has no referrer"),
            RejectReason::SelfReferral => f.write_str("cannot refer yourself"),
            RejectReason::UnknownReferrer => f.write_str("referrer not found"),
            RejectReason::EmailTaken => f.write_str("email already registered"),
            RejectReason::InvalidCredentials => f.write_str("invalid credentials"),
            RejectReason::WeakPassword { min_len } => {
                write!(f, "password must be at least {min_len} characters")
            }
            RejectReason::InvalidSessionToken(e) => write!(f, "invalid reading session: {e}"),
            RejectReason::SessionMismatch => {
                f.write_str("reading session does not match this account or book")
            }
            RejectReason::NonceMismatch => f.write_str("reading session already used"),
            RejectReason::MissingBookId => f.write_str("book id is required"),
            RejectReason::InvalidReferralCode => f.write_str("invalid referral code"),
            RejectReason::InvalidWallet => f.write_str("invalid wallet address"),
            RejectReason::InvalidEmail => f.write_str("invalid email address"),
        }
    }
}

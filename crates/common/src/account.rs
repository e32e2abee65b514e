//! # Account Model
//!
//! One [`Account`] document per distinct identity. The document is the unit of
//! atomicity: every reward and referral transition is expressed as a predicate
//! plus an effect over a single `Account` and applied by the store in one step.
//!
//! ## Balance Aggregates
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `lifetime_balance` | authoritative total, only grows through payouts |
//! | `weekly_baseline` | `lifetime_balance` captured at the last weekly reset |
//! | `weekly_earned` | always `lifetime_balance - weekly_baseline` |
//!
//! [`Account::credit`] is the only place that moves `lifetime_balance`, and it
//! recomputes `weekly_earned` in the same call, so any effect closure that pays
//! through it keeps the aggregate invariant.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ════════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ════════════════════════════════════════════════════════════════════════════════

/// Internal, stable account reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Fresh random id (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// External identities. Each one is unique across accounts when present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub telegram_id: Option<i64>,
    /// Stored lower-cased.
    pub wallet_address: Option<String>,
    /// Stored lower-cased.
    pub email: Option<String>,
}

impl Identity {
    pub fn telegram(telegram_id: i64) -> Self {
        Self {
            telegram_id: Some(telegram_id),
            ..Self::default()
        }
    }

    pub fn wallet(address: &str) -> Self {
        Self {
            wallet_address: Some(address.trim().to_lowercase()),
            ..Self::default()
        }
    }

    pub fn email(email: &str) -> Self {
        Self {
            email: Some(email.trim().to_lowercase()),
            ..Self::default()
        }
    }

    /// `true` when no identity is set at all.
    pub fn is_empty(&self) -> bool {
        self.telegram_id.is_none() && self.wallet_address.is_none() && self.email.is_none()
    }
}

/// Display fields refreshed on Telegram login. Not part of any invariant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub photo_url: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// SOCIAL TASKS
// ════════════════════════════════════════════════════════════════════════════════

/// Platforms with a start/verify follow task.
///
/// Telegram is not listed: its follow is checked against channel membership
/// and tracked by `telegram_reward_claimed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Twitter,
    Instagram,
    Medium,
    Linkedin,
    Discord,
}

/// Which bundle a platform's completion feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Compulsory,
    Optional,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 5] = [
        SocialPlatform::Twitter,
        SocialPlatform::Instagram,
        SocialPlatform::Medium,
        SocialPlatform::Linkedin,
        SocialPlatform::Discord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Medium => "medium",
            SocialPlatform::Linkedin => "linkedin",
            SocialPlatform::Discord => "discord",
        }
    }

    pub fn bundle(self) -> BundleKind {
        match self {
            SocialPlatform::Twitter => BundleKind::Compulsory,
            SocialPlatform::Instagram
            | SocialPlatform::Medium
            | SocialPlatform::Linkedin
            | SocialPlatform::Discord => BundleKind::Optional,
        }
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a path or payload names an unsupported platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown social platform: {}", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for SocialPlatform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(SocialPlatform::Twitter),
            "instagram" => Ok(SocialPlatform::Instagram),
            "medium" => Ok(SocialPlatform::Medium),
            "linkedin" => Ok(SocialPlatform::Linkedin),
            "discord" => Ok(SocialPlatform::Discord),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// At most one per platform. `started_at` never moves once set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialTask {
    pub platform: SocialPlatform,
    pub started_at: Option<DateTime<Utc>>,
    pub rewarded: bool,
    pub rewarded_at: Option<DateTime<Utc>>,
}

// ════════════════════════════════════════════════════════════════════════════════
// REFERRAL RECORDS
// ════════════════════════════════════════════════════════════════════════════════

/// Cumulative totals credited to an account as an upline beneficiary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralLevelReward {
    /// 1, 2 or 3.
    pub level: u8,
    pub total_earned: u64,
    pub referral_count: u64,
    pub last_reward_at: Option<DateTime<Utc>>,
}

/// Referral observed by the companion bot but not yet bound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReferral {
    pub referrer: AccountId,
    pub observed_at: DateTime<Utc>,
}

// ════════════════════════════════════════════════════════════════════════════════
// ACCOUNT
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub identity: Identity,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,

    // ── balance aggregates ──
    pub lifetime_balance: u64,
    pub weekly_baseline: u64,
    pub weekly_earned: i64,
    pub last_weekly_reset: Option<DateTime<Utc>>,

    // ── cooldown markers ──
    pub last_spin_at: Option<DateTime<Utc>>,
    pub spin_notified_at: Option<DateTime<Utc>>,
    pub last_book_reward_at: Option<DateTime<Utc>>,
    pub reading_session_nonce: Option<String>,

    // ── quiz ──
    pub quiz_attempts_count: u8,
    pub quiz_attempts_date: Option<DateTime<Utc>>,

    // ── social tasks and bundles ──
    pub telegram_reward_claimed: bool,
    pub social_tasks: Vec<SocialTask>,
    pub compulsory_bundle_awarded: bool,
    pub compulsory_bundle_awarded_at: Option<DateTime<Utc>>,
    pub optional_bundle_awarded: bool,
    pub optional_bundle_awarded_at: Option<DateTime<Utc>>,

    // ── credentials ──
    /// bcrypt hash for email accounts. Never leaves the ledger.
    #[serde(default)]
    pub password_hash: Option<String>,

    // ── wallet ──
    pub wallet_connected: bool,
    pub login_nonce: Option<String>,

    // ── referral graph ──
    pub referred_by: Option<AccountId>,
    pub referral_used: bool,
    pub referral_bound_at: Option<DateTime<Utc>>,
    pub referred_users: BTreeSet<AccountId>,
    pub referral_count: u64,
    pub referral_rewarded_at: Option<DateTime<Utc>>,
    pub referral_reward_tx_id: Option<String>,
    /// Highest upline level already credited for this joiner.
    #[serde(default)]
    pub referral_levels_paid: u8,
    #[serde(default)]
    pub referral_payout_completed_at: Option<DateTime<Utc>>,
    /// Joiners whose fan-out has credited this account.
    #[serde(default)]
    pub referral_credited_from: BTreeSet<AccountId>,
    pub bot_referral: Option<PendingReferral>,
    pub referral_level_rewards: Vec<ReferralLevelReward>,

    // ── premium ──
    pub is_premium_user: bool,
    pub premium_books: BTreeSet<String>,
}

impl Account {
    /// New account with every counter at its default.
    pub fn new(identity: Identity, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            identity,
            profile: Profile::default(),
            created_at: now,
            lifetime_balance: 0,
            weekly_baseline: 0,
            weekly_earned: 0,
            last_weekly_reset: None,
            last_spin_at: None,
            spin_notified_at: None,
            last_book_reward_at: None,
            reading_session_nonce: None,
            quiz_attempts_count: 0,
            quiz_attempts_date: None,
            telegram_reward_claimed: false,
            social_tasks: Vec::new(),
            compulsory_bundle_awarded: false,
            compulsory_bundle_awarded_at: None,
            optional_bundle_awarded: false,
            optional_bundle_awarded_at: None,
            password_hash: None,
            wallet_connected: false,
            login_nonce: None,
            referred_by: None,
            referral_used: false,
            referral_bound_at: None,
            referred_users: BTreeSet::new(),
            referral_count: 0,
            referral_rewarded_at: None,
            referral_reward_tx_id: None,
            referral_levels_paid: 0,
            referral_payout_completed_at: None,
            referral_credited_from: BTreeSet::new(),
            bot_referral: None,
            referral_level_rewards: Vec::new(),
            is_premium_user: false,
            premium_books: BTreeSet::new(),
        }
    }

    /// Pays `amount` and recomputes `weekly_earned` from the new balance.
    ///
    /// Saturates at `u64::MAX` instead of wrapping.
    pub fn credit(&mut self, amount: u64) {
        self.lifetime_balance = self.lifetime_balance.saturating_add(amount);
        self.recompute_weekly();
    }

    /// `weekly_earned = lifetime_balance - weekly_baseline`.
    pub fn recompute_weekly(&mut self) {
        self.weekly_earned = weekly_difference(self.lifetime_balance, self.weekly_baseline);
    }

    /// Snapshot the balance into the baseline (weekly reset).
    pub fn reset_week(&mut self, now: DateTime<Utc>) {
        self.weekly_baseline = self.lifetime_balance;
        self.weekly_earned = 0;
        self.last_weekly_reset = Some(now);
    }

    /// Whether the derived aggregate matches its definition.
    pub fn weekly_consistent(&self) -> bool {
        self.weekly_earned == weekly_difference(self.lifetime_balance, self.weekly_baseline)
    }

    pub fn social_task(&self, platform: SocialPlatform) -> Option<&SocialTask> {
        self.social_tasks.iter().find(|t| t.platform == platform)
    }

    pub fn social_task_mut(&mut self, platform: SocialPlatform) -> Option<&mut SocialTask> {
        self.social_tasks.iter_mut().find(|t| t.platform == platform)
    }

    pub fn task_rewarded(&self, platform: SocialPlatform) -> bool {
        self.social_task(platform).is_some_and(|t| t.rewarded)
    }

    /// Number of optional-bundle platforms already rewarded.
    pub fn optional_tasks_rewarded(&self) -> usize {
        self.social_tasks
            .iter()
            .filter(|t| t.platform.bundle() == BundleKind::Optional && t.rewarded)
            .count()
    }

    pub fn referral_level(&self, level: u8) -> Option<&ReferralLevelReward> {
        self.referral_level_rewards.iter().find(|r| r.level == level)
    }

    /// Adds one beneficiary payout to the per-level counters.
    pub fn record_level_reward(&mut self, level: u8, amount: u64, now: DateTime<Utc>) {
        match self.referral_level_rewards.iter_mut().find(|r| r.level == level) {
            Some(entry) => {
                entry.total_earned = entry.total_earned.saturating_add(amount);
                entry.referral_count = entry.referral_count.saturating_add(1);
                entry.last_reward_at = Some(now);
            }
            None => self.referral_level_rewards.push(ReferralLevelReward {
                level,
                total_earned: amount,
                referral_count: 1,
                last_reward_at: Some(now),
            }),
        }
    }

    /// Referral state as seen by the graph manager.
    pub fn referral_state(&self) -> ReferralState {
        if !(self.referred_by.is_some() || self.referral_used) {
            return ReferralState::Unbound;
        }
        match (
            self.referral_rewarded_at.is_some(),
            self.referral_payout_completed_at.is_some(),
        ) {
            (false, _) => ReferralState::Bound,
            (true, false) => ReferralState::Paying,
            (true, true) => ReferralState::Rewarded,
        }
    }
}

/// `UNBOUND → BOUND → PAYING → REWARDED`, joiner perspective.
///
/// `Paying` means the one-time marker is written but some upline level is
/// still uncredited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralState {
    Unbound,
    Bound,
    Paying,
    Rewarded,
}

fn weekly_difference(lifetime: u64, baseline: u64) -> i64 {
    let diff = i128::from(lifetime) - i128::from(baseline);
    i64::try_from(diff).unwrap_or(if diff.is_negative() { i64::MIN } else { i64::MAX })
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

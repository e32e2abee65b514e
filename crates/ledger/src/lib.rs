//! # Read-and-Earn Ledger
//!
//! Reward-ledger and referral-integrity engine. Every balance mutation is a
//! single-document conditional update on an [`AccountStore`]; there is no
//! lock shared across requests.
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | [`RewardLedger`] | spin, quiz, reading, social tasks, bundles |
//! | [`ReferralGraph`] | referral binding, cycle check, 3-level fan-out, bot hand-off |
//! | [`AccountService`] | account creation, wallet bonus, premium flags |
//! | [`WeeklyMaintainer`] | weekly baseline reset and recompute |
//! | [`Leaderboard`] | all-time and weekly rankings |
//! | [`SpinSweep`] | spin-available reminders |
//!
//! ## Invariants
//!
//! 1. `weekly_earned == lifetime_balance - weekly_baseline` after every write.
//! 2. Each (account, reward type, window) pays at most once.
//! 3. `referred_by` is set at most once and the referral graph stays acyclic.

pub mod accounts;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod memory_store;
pub mod outcome;
pub mod referral;
pub mod spin_sweep;
pub mod store;
pub mod timed_store;
pub mod weekly;

use std::sync::Arc;

use readearn_common::{DayClock, RewardPolicy, TokenSigner};

pub use accounts::{AccountService, TelegramLogin, WalletNonce};
pub use engine::{
    QuizGrant, ReadingGrant, ReadingSession, RewardLedger, SocialTaskStatus, SpinGrant,
    TaskVerification,
};
pub use error::LedgerError;
pub use leaderboard::{Leaderboard, LeaderboardView, OwnRank, RankEntry};
pub use memory_store::MemoryAccountStore;
pub use outcome::{Outcome, RejectCategory, RejectReason, Settlement};
pub use referral::{BotReferral, LevelPayout, ReferralBinding, ReferralCode, ReferralGraph, ReferredUser};
pub use spin_sweep::{NotifyError, SpinNotifier, SpinSweep, SweepReport};
pub use store::{AccountKey, AccountStore, StoreError, UpdateOutcome};
pub use timed_store::TimedStore;
pub use weekly::WeeklyMaintainer;

/// All ledger services over one store.
#[derive(Clone)]
pub struct Ledger {
    pub rewards: RewardLedger,
    pub referrals: ReferralGraph,
    pub accounts: AccountService,
    pub weekly: WeeklyMaintainer,
    pub leaderboard: Leaderboard,
    store: Arc<dyn AccountStore>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn AccountStore>,
        policy: RewardPolicy,
        signer: TokenSigner,
        day_clock: DayClock,
    ) -> Self {
        let referrals = ReferralGraph::new(store.clone(), policy.clone());
        Self {
            rewards: RewardLedger::new(store.clone(), policy.clone(), signer, day_clock),
            accounts: AccountService::new(store.clone(), policy, referrals.clone()),
            referrals,
            weekly: WeeklyMaintainer::new(store.clone()),
            leaderboard: Leaderboard::new(store.clone()),
            store,
        }
    }

    /// bcrypt cost for email account passwords.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.accounts = self.accounts.with_password_cost(cost);
        self
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Sweep over this ledger's store.
    pub fn spin_sweep(&self, notifier: Arc<dyn SpinNotifier>, limit: usize) -> SpinSweep {
        SpinSweep::new(
            self.store.clone(),
            notifier,
            self.rewards.policy().spin_window(),
            limit,
        )
    }
}

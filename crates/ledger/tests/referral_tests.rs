//! Integration tests for the referral graph.
//!
//! Binding, cycle rejection, the three-level fan-out, resumption after a
//! storage failure and the bot hand-off, all against the in-memory store with
//! explicit timestamps.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use readearn_common::{
    Account, AccountId, DayClock, Identity, Profile, ReferralLevelReward, ReferralState,
    RewardPolicy, TokenSigner,
};
use readearn_ledger::store::{Effect, Predicate};
use readearn_ledger::{
    AccountKey, AccountStore, BotReferral, Ledger, LedgerError, LevelPayout, MemoryAccountStore,
    Outcome, ReferralBinding, RejectReason, StoreError, UpdateOutcome,
};

// ════════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════════

const T0: i64 = 1_700_000_000;

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

fn ledger_over(store: Arc<dyn AccountStore>) -> Ledger {
    Ledger::new(store, RewardPolicy::default(), TokenSigner::generate(), DayClock::utc())
}

fn setup() -> Ledger {
    ledger_over(Arc::new(MemoryAccountStore::new()))
}

async fn user(ledger: &Ledger, tg: i64) -> AccountId {
    ledger
        .store()
        .insert(Account::new(Identity::telegram(tg), ts(T0 - 3_600)))
        .await
        .expect("insert")
        .id
}

async fn get(ledger: &Ledger, id: AccountId) -> Account {
    ledger.store().get(id).await.expect("get")
}

async fn balances(ledger: &Ledger, ids: &[AccountId]) -> Vec<u64> {
    let mut out = Vec::new();
    for id in ids {
        out.push(get(ledger, *id).await.lifetime_balance);
    }
    out
}

fn bound(outcome: Outcome<ReferralBinding>) -> ReferralBinding {
    match outcome {
        Outcome::Applied(b) => b,
        Outcome::Rejected(r) => panic!("expected binding, got {r}"),
    }
}

fn level(total_earned: u64, referral_count: u64, at: Option<DateTime<Utc>>, n: u8) -> ReferralLevelReward {
    ReferralLevelReward {
        level: n,
        total_earned,
        referral_count,
        last_reward_at: at,
    }
}

/// R3 ← R2 ← R, built through the public binding path.
async fn three_level_chain(ledger: &Ledger) -> (AccountId, AccountId, AccountId) {
    let r3 = user(ledger, 3).await;
    let r2 = user(ledger, 2).await;
    let r = user(ledger, 1).await;
    bound(ledger.referrals.bind_with_code(r2, "3", ts(T0)).await.expect("bind"));
    bound(ledger.referrals.bind_with_code(r, "2", ts(T0 + 10)).await.expect("bind"));
    (r, r2, r3)
}

// ════════════════════════════════════════════════════════════════════════════════
// 1. FAN-OUT
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_three_level_fan_out() {
    let ledger = setup();
    let (r, r2, r3) = three_level_chain(&ledger).await;
    assert_eq!(balances(&ledger, &[r, r2, r3]).await, vec![0, 2000, 2500]);

    let j = user(&ledger, 10).await;
    let at = ts(T0 + 100);
    let binding = bound(ledger.referrals.bind_with_code(j, "1", at).await.expect("bind"));

    assert_eq!(binding.referrer, r);
    assert_eq!(
        binding.payouts,
        vec![
            LevelPayout { level: 1, beneficiary: r, amount: 2000 },
            LevelPayout { level: 2, beneficiary: r2, amount: 500 },
            LevelPayout { level: 3, beneficiary: r3, amount: 200 },
        ]
    );
    assert_eq!(binding.total_paid(), 2700);
    assert_eq!(balances(&ledger, &[r, r2, r3]).await, vec![2000, 2500, 2700]);

    let joiner = get(&ledger, j).await;
    assert_eq!(joiner.referred_by, Some(r));
    assert!(joiner.referral_used);
    assert_eq!(joiner.referral_bound_at, Some(at));
    assert_eq!(joiner.referral_rewarded_at, Some(at));
    assert_eq!(joiner.referral_reward_tx_id, Some(format!("ref:{j}")));
    assert_eq!(joiner.referral_levels_paid, 3);
    assert_eq!(joiner.referral_payout_completed_at, Some(at));
    assert_eq!(joiner.referral_state(), ReferralState::Rewarded);
    assert_eq!(joiner.lifetime_balance, 0, "joiner earns nothing");

    let referrer = get(&ledger, r).await;
    assert!(referrer.referred_users.contains(&j));
    assert_eq!(referrer.referral_count, 1);
    assert!(referrer.weekly_consistent());

    assert_eq!(
        ledger.referrals.referral_levels(r3).await.expect("levels"),
        vec![
            level(2000, 1, Some(ts(T0)), 1),
            level(500, 1, Some(ts(T0 + 10)), 2),
            level(200, 1, Some(at), 3),
        ]
    );
    assert_eq!(
        ledger.referrals.referral_levels(r).await.expect("levels"),
        vec![level(2000, 1, Some(at), 1), level(0, 0, None, 2), level(0, 0, None, 3)]
    );
}

#[tokio::test]
async fn test_fan_out_stops_at_top_of_chain() {
    let ledger = setup();
    let top = user(&ledger, 1).await;
    let j = user(&ledger, 2).await;

    let binding = bound(ledger.referrals.bind_with_code(j, "1", ts(T0)).await.expect("bind"));
    assert_eq!(binding.payouts.len(), 1);
    assert_eq!(get(&ledger, top).await.lifetime_balance, 2000);
}

#[tokio::test]
async fn test_settle_reward_is_one_time() {
    let ledger = setup();
    let r = user(&ledger, 1).await;
    let j = user(&ledger, 2).await;
    bound(ledger.referrals.bind_with_code(j, "1", ts(T0)).await.expect("bind"));

    let again = ledger.referrals.settle_reward(j, ts(T0 + 5)).await.expect("settle");
    assert_eq!(again, Outcome::Rejected(RejectReason::ReferralAlreadyRewarded));

    let loner = user(&ledger, 3).await;
    let none = ledger.referrals.settle_reward(loner, ts(T0)).await.expect("settle");
    assert_eq!(none, Outcome::Rejected(RejectReason::NotReferred));

    assert_eq!(get(&ledger, r).await.lifetime_balance, 2000);
}

// ════════════════════════════════════════════════════════════════════════════════
// 2. ONE BINDING PER ACCOUNT
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_relogin_with_code_changes_nothing() {
    let ledger = setup();
    let (r, r2, r3) = three_level_chain(&ledger).await;

    let first = ledger
        .accounts
        .login_telegram(10, Profile::default(), Some("1"), ts(T0 + 100))
        .await
        .expect("login");
    assert!(first.created);
    let j = first.account.id;
    assert!(matches!(first.referral, Some(Outcome::Applied(_))));
    let before = balances(&ledger, &[r, r2, r3, j]).await;

    let again = ledger
        .accounts
        .login_telegram(10, Profile::default(), Some("2"), ts(T0 + 200))
        .await
        .expect("login");
    assert!(!again.created);
    assert_eq!(again.referral, Some(Outcome::Rejected(RejectReason::ReferralAlreadyBound)));
    assert_eq!(again.account.referred_by, Some(r));
    assert_eq!(balances(&ledger, &[r, r2, r3, j]).await, before);

    let quiet = ledger
        .accounts
        .login_telegram(10, Profile::default(), None, ts(T0 + 300))
        .await
        .expect("login");
    assert_eq!(quiet.referral, None);
}

#[tokio::test]
async fn test_login_refreshes_profile() {
    let ledger = setup();
    let profile = Profile {
        first_name: Some("Ada".into()),
        username: Some("ada_reads".into()),
        ..Profile::default()
    };
    let login = ledger
        .accounts
        .login_telegram(42, profile.clone(), None, ts(T0))
        .await
        .expect("login");
    assert_eq!(login.account.profile, profile);
    assert_eq!(login.account.identity.telegram_id, Some(42));
}

#[tokio::test]
async fn test_bound_but_unrewarded_is_retried_on_login() {
    let ledger = setup();
    let r = user(&ledger, 1).await;
    let j = user(&ledger, 2).await;

    // an earlier login bound the joiner but stopped before the fan-out
    ledger
        .store()
        .conditional_update(j, &|_: &Account| true, &|a: &mut Account| {
            a.referred_by = Some(r);
            a.referral_used = true;
            a.referral_bound_at = Some(ts(T0));
        })
        .await
        .expect("seed");

    let login = ledger
        .accounts
        .login_telegram(2, Profile::default(), None, ts(T0 + 60))
        .await
        .expect("login");
    let binding = bound(login.referral.expect("fan-out retried"));
    assert_eq!(binding.referrer, r);
    assert_eq!(binding.total_paid(), 2000);
    assert!(login.account.referral_rewarded_at.is_some());
    assert_eq!(login.account.referral_state(), ReferralState::Rewarded);
    assert!(get(&ledger, r).await.referred_users.contains(&j));
}

// ════════════════════════════════════════════════════════════════════════════════
// 3. INTERRUPTED FAN-OUT
// ════════════════════════════════════════════════════════════════════════════════

/// Memory store whose writes fail for the accounts in `failing`.
struct FlakyStore {
    inner: MemoryAccountStore,
    failing: Mutex<HashSet<AccountId>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryAccountStore::new(),
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn break_writes(&self, id: AccountId) {
        self.failing.lock().insert(id);
    }

    fn heal(&self) {
        self.failing.lock().clear();
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        self.inner.insert(account).await
    }
    async fn find(&self, key: &AccountKey) -> Result<Option<Account>, StoreError> {
        self.inner.find(key).await
    }
    async fn conditional_update(
        &self,
        id: AccountId,
        predicate: Predicate<'_>,
        effect: Effect<'_>,
    ) -> Result<UpdateOutcome, StoreError> {
        if self.failing.lock().contains(&id) {
            return Err(StoreError::Backend("replica set unavailable".into()));
        }
        self.inner.conditional_update(id, predicate, effect).await
    }
    async fn update_all(&self, effect: Effect<'_>) -> Result<u64, StoreError> {
        self.inner.update_all(effect).await
    }
    async fn scan(
        &self,
        filter: Predicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Account>, StoreError> {
        self.inner.scan(filter, limit).await
    }
}

#[tokio::test]
async fn test_referrer_write_failure_surfaces_and_resumes_on_login() {
    let store = Arc::new(FlakyStore::new());
    let ledger = ledger_over(store.clone());
    let r = user(&ledger, 1).await;
    let j = user(&ledger, 10).await;

    store.break_writes(r);
    let err = ledger.referrals.bind_with_code(j, "1", ts(T0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Store(StoreError::Backend(_))));
    assert_eq!(get(&ledger, r).await.lifetime_balance, 0);
    assert!(get(&ledger, r).await.referred_users.is_empty());
    assert_eq!(get(&ledger, j).await.referral_state(), ReferralState::Bound);

    store.heal();
    let login = ledger
        .accounts
        .login_telegram(10, Profile::default(), None, ts(T0 + 60))
        .await
        .expect("login");
    let binding = bound(login.referral.expect("fan-out resumed"));
    assert_eq!(binding.payouts, vec![LevelPayout { level: 1, beneficiary: r, amount: 2000 }]);
    assert_eq!(login.account.referral_state(), ReferralState::Rewarded);

    let referrer = get(&ledger, r).await;
    assert_eq!(referrer.lifetime_balance, 2000);
    assert!(referrer.referred_users.contains(&j));
    assert_eq!(referrer.referral_count, 1);

    let quiet = ledger
        .accounts
        .login_telegram(10, Profile::default(), None, ts(T0 + 120))
        .await
        .expect("login");
    assert_eq!(quiet.referral, None);
    assert_eq!(get(&ledger, r).await.lifetime_balance, 2000);
}

#[tokio::test]
async fn test_mid_chain_failure_pays_missing_levels_exactly_once() {
    let store = Arc::new(FlakyStore::new());
    let ledger = ledger_over(store.clone());
    let (r, r2, r3) = three_level_chain(&ledger).await;
    let j = user(&ledger, 10).await;

    store.break_writes(r2);
    let err = ledger.referrals.bind_with_code(j, "1", ts(T0 + 100)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Store(StoreError::Backend(_))));
    assert_eq!(balances(&ledger, &[r, r2, r3]).await, vec![2000, 2000, 2500]);

    let stalled = get(&ledger, j).await;
    assert_eq!(stalled.referral_state(), ReferralState::Paying);
    assert_eq!(stalled.referral_levels_paid, 1);

    // still failing: the retry surfaces the error again and pays nothing twice
    assert!(ledger
        .accounts
        .login_telegram(10, Profile::default(), None, ts(T0 + 150))
        .await
        .is_err());
    assert_eq!(balances(&ledger, &[r, r2, r3]).await, vec![2000, 2000, 2500]);

    store.heal();
    let login = ledger
        .accounts
        .login_telegram(10, Profile::default(), None, ts(T0 + 200))
        .await
        .expect("login");
    let binding = bound(login.referral.expect("fan-out resumed"));
    assert_eq!(
        binding.payouts,
        vec![
            LevelPayout { level: 2, beneficiary: r2, amount: 500 },
            LevelPayout { level: 3, beneficiary: r3, amount: 200 },
        ]
    );
    assert_eq!(balances(&ledger, &[r, r2, r3]).await, vec![2000, 2500, 2700]);
    assert_eq!(login.account.referral_levels_paid, 3);
    assert_eq!(login.account.referral_state(), ReferralState::Rewarded);
    assert_eq!(
        ledger.referrals.referral_levels(r).await.expect("levels")[0],
        level(2000, 1, Some(ts(T0 + 100)), 1)
    );

    let quiet = ledger
        .accounts
        .login_telegram(10, Profile::default(), None, ts(T0 + 300))
        .await
        .expect("login");
    assert_eq!(quiet.referral, None);
    assert_eq!(balances(&ledger, &[r, r2, r3]).await, vec![2000, 2500, 2700]);
}

#[tokio::test]
async fn test_credited_level_is_not_repaid_when_progress_was_lost() {
    let ledger = setup();
    let r = user(&ledger, 1).await;
    let j = user(&ledger, 2).await;

    // the referrer was credited but the joiner's progress write never landed
    ledger
        .store()
        .conditional_update(j, &|_: &Account| true, &|a: &mut Account| {
            a.referred_by = Some(r);
            a.referral_used = true;
            a.referral_bound_at = Some(ts(T0));
            a.referral_rewarded_at = Some(ts(T0));
        })
        .await
        .expect("seed joiner");
    ledger
        .store()
        .conditional_update(r, &|_: &Account| true, &|a: &mut Account| {
            a.credit(2000);
            a.record_level_reward(1, 2000, ts(T0));
            a.referral_credited_from.insert(j);
            a.referred_users.insert(j);
            a.referral_count = 1;
        })
        .await
        .expect("seed referrer");

    let login = ledger
        .accounts
        .login_telegram(2, Profile::default(), None, ts(T0 + 60))
        .await
        .expect("login");
    assert_eq!(bound(login.referral.expect("fan-out resumed")).payouts, vec![]);
    assert_eq!(login.account.referral_state(), ReferralState::Rewarded);
    assert_eq!(get(&ledger, r).await.lifetime_balance, 2000);
}

// ════════════════════════════════════════════════════════════════════════════════
// 4. REJECTIONS
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_cycle_is_rejected() {
    let ledger = setup();
    let a = user(&ledger, 100).await;
    let b = user(&ledger, 101).await;
    let c = user(&ledger, 102).await;
    bound(ledger.referrals.bind_with_code(b, "100", ts(T0)).await.expect("bind"));
    bound(ledger.referrals.bind_with_code(c, "101", ts(T0 + 1)).await.expect("bind"));
    let before = balances(&ledger, &[a, b, c]).await;

    let direct = ledger.referrals.bind_with_code(a, "101", ts(T0 + 2)).await.expect("bind");
    assert_eq!(direct, Outcome::Rejected(RejectReason::ReferralCycle));

    let deep = ledger.referrals.bind_with_code(a, "102", ts(T0 + 3)).await.expect("bind");
    assert_eq!(deep, Outcome::Rejected(RejectReason::ReferralCycle));

    let root = get(&ledger, a).await;
    assert_eq!(root.referred_by, None);
    assert!(!root.referral_used);
    assert_eq!(balances(&ledger, &[a, b, c]).await, before);
}

#[tokio::test]
async fn test_self_referral_and_bad_codes() {
    let ledger = setup();
    let a = user(&ledger, 100).await;

    assert_eq!(
        ledger.referrals.bind_with_code(a, "100", ts(T0)).await.expect("bind"),
        Outcome::Rejected(RejectReason::SelfReferral)
    );
    assert_eq!(
        ledger.referrals.bind_with_code(a, &a.to_string(), ts(T0)).await.expect("bind"),
        Outcome::Rejected(RejectReason::SelfReferral)
    );
    assert_eq!(
        ledger.referrals.bind_with_code(a, "999999", ts(T0)).await.expect("bind"),
        Outcome::Rejected(RejectReason::UnknownReferrer)
    );
    assert_eq!(
        ledger.referrals.bind_with_code(a, "not-a-code", ts(T0)).await.expect("bind"),
        Outcome::Rejected(RejectReason::InvalidReferralCode)
    );
    assert_eq!(
        ledger
            .referrals
            .bind_with_code(a, &AccountId::new().to_string(), ts(T0))
            .await
            .expect("bind"),
        Outcome::Rejected(RejectReason::UnknownReferrer)
    );
    assert!(!get(&ledger, a).await.referral_used);
}

#[tokio::test]
async fn test_code_by_account_id() {
    let ledger = setup();
    let r = user(&ledger, 1).await;
    let wallet_user = ledger
        .store()
        .insert(Account::new(Identity::wallet("0xfeed"), ts(T0)))
        .await
        .expect("insert")
        .id;

    let binding = bound(
        ledger
            .referrals
            .bind_with_code(wallet_user, &r.to_string(), ts(T0 + 1))
            .await
            .expect("bind"),
    );
    assert_eq!(binding.referrer, r);
}

// ════════════════════════════════════════════════════════════════════════════════
// 5. BOT HAND-OFF
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_bot_referral_consumed_on_login() {
    let ledger = setup();
    let referrer = user(&ledger, 500).await;
    let profile = Profile {
        first_name: Some("Bo".into()),
        ..Profile::default()
    };

    let marked = ledger
        .referrals
        .record_bot_referral(600, 500, profile.clone(), ts(T0))
        .await
        .expect("bot");
    assert_eq!(marked, BotReferral::Marked);
    assert_eq!(
        ledger
            .referrals
            .record_bot_referral(600, 500, profile.clone(), ts(T0 + 1))
            .await
            .expect("bot"),
        BotReferral::AlreadyPending
    );

    let joiner = ledger
        .store()
        .find(&readearn_ledger::AccountKey::TelegramId(600))
        .await
        .expect("find")
        .expect("created by the bot");
    assert_eq!(joiner.profile, profile);
    assert_eq!(joiner.referred_by, None, "bot never binds");
    assert_eq!(get(&ledger, referrer).await.lifetime_balance, 0, "bot never pays");

    let login = ledger
        .accounts
        .login_telegram(600, profile.clone(), None, ts(T0 + 60))
        .await
        .expect("login");
    assert!(!login.created);
    let binding = bound(login.referral.expect("pending referral used"));
    assert_eq!(binding.referrer, referrer);
    assert_eq!(login.account.bot_referral, None);
    assert_eq!(get(&ledger, referrer).await.lifetime_balance, 2000);

    assert_eq!(
        ledger
            .referrals
            .record_bot_referral(600, 500, profile, ts(T0 + 120))
            .await
            .expect("bot"),
        BotReferral::AlreadyBound
    );
}

#[tokio::test]
async fn test_bot_referral_edge_cases() {
    let ledger = setup();
    user(&ledger, 500).await;

    assert_eq!(
        ledger
            .referrals
            .record_bot_referral(500, 500, Profile::default(), ts(T0))
            .await
            .expect("bot"),
        BotReferral::SelfReferral
    );
    assert_eq!(
        ledger
            .referrals
            .record_bot_referral(600, 12345, Profile::default(), ts(T0))
            .await
            .expect("bot"),
        BotReferral::UnknownReferrer
    );
    assert!(ledger
        .store()
        .find(&readearn_ledger::AccountKey::TelegramId(600))
        .await
        .expect("find")
        .is_none());
}

#[tokio::test]
async fn test_explicit_code_wins_over_pending() {
    let ledger = setup();
    let pending_referrer = user(&ledger, 500).await;
    let chosen = user(&ledger, 501).await;
    ledger
        .referrals
        .record_bot_referral(600, 500, Profile::default(), ts(T0))
        .await
        .expect("bot");

    let login = ledger
        .accounts
        .login_telegram(600, Profile::default(), Some("501"), ts(T0 + 10))
        .await
        .expect("login");
    assert_eq!(bound(login.referral.expect("bound")).referrer, chosen);
    assert_eq!(login.account.bot_referral, None);
    assert_eq!(get(&ledger, pending_referrer).await.lifetime_balance, 0);
}

#[tokio::test]
async fn test_pending_referral_into_own_downline_is_cleared() {
    let ledger = setup();
    let a = user(&ledger, 700).await;
    let b = user(&ledger, 701).await;
    bound(ledger.referrals.bind_with_code(b, "700", ts(T0)).await.expect("bind"));

    // the bot only sees two Telegram ids
    assert_eq!(
        ledger
            .referrals
            .record_bot_referral(700, 701, Profile::default(), ts(T0 + 1))
            .await
            .expect("bot"),
        BotReferral::Marked
    );

    let login = ledger
        .accounts
        .login_telegram(700, Profile::default(), None, ts(T0 + 2))
        .await
        .expect("login");
    assert_eq!(login.referral, Some(Outcome::Rejected(RejectReason::ReferralCycle)));
    assert_eq!(login.account.bot_referral, None);
    assert_eq!(get(&ledger, a).await.referred_by, None);
}

// ════════════════════════════════════════════════════════════════════════════════
// 6. READS
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_referred_users_most_recent_first() {
    let ledger = setup();
    let r = user(&ledger, 1).await;
    let early = user(&ledger, 2).await;
    let late = user(&ledger, 3).await;
    bound(ledger.referrals.bind_with_code(early, "1", ts(T0)).await.expect("bind"));
    bound(ledger.referrals.bind_with_code(late, "1", ts(T0 + 60)).await.expect("bind"));

    let users = ledger.referrals.referred_users(r).await.expect("users");
    let ids: Vec<_> = users.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![late, early]);
    assert_eq!(users[0].telegram_id, Some(3));
    assert_eq!(users[0].joined_at, Some(ts(T0 + 60)));

    let levels = ledger.referrals.referral_levels(r).await.expect("levels");
    assert_eq!(levels[0], level(4000, 2, Some(ts(T0 + 60)), 1));
    assert_eq!(get(&ledger, r).await.referral_count, 2);
}

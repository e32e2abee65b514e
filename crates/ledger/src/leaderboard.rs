//! # Leaderboard Projector
//!
//! Read-only ranking over the balance aggregates.
//!
//! | Board | Metric | Included when | Tie-break |
//! |-------|--------|---------------|-----------|
//! | all-time | `lifetime_balance` | `> 0` | earlier `created_at` first |
//! | weekly | `weekly_earned` | `> 0` | earlier `created_at` first |
//!
//! A recompute pass runs first so the weekly board never shows a stale
//! derived value. The caller's own rank is computed over the full ordering,
//! not just the visible top.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use readearn_common::{Account, AccountId};
use serde::Serialize;

use crate::error::LedgerError;
use crate::store::AccountStore;
use crate::weekly::WeeklyMaintainer;

/// Visible entries per board.
pub const BOARD_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub position: usize,
    pub account_id: AccountId,
    pub display_name: String,
    pub value: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnRank {
    pub all_time: Option<usize>,
    pub weekly: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardView {
    pub all_time: Vec<RankEntry>,
    pub weekly: Vec<RankEntry>,
    pub me: Option<OwnRank>,
    pub generated_at: DateTime<Utc>,
}

fn display_name(a: &Account) -> String {
    let p = &a.profile;
    if let Some(username) = p.username.as_deref().filter(|u| !u.is_empty()) {
        return username.to_string();
    }
    let full = [p.first_name.as_deref(), p.last_name.as_deref()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !full.is_empty() {
        return full;
    }
    if let Some(w) = &a.identity.wallet_address {
        let head: String = w.chars().take(6).collect();
        let tail: String = w.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        return format!("{head}...{tail}");
    }
    "anonymous".to_string()
}

fn lifetime_metric(a: &Account) -> i64 {
    i64::try_from(a.lifetime_balance).unwrap_or(i64::MAX)
}

fn weekly_metric(a: &Account) -> i64 {
    a.weekly_earned
}

/// Descending by metric, earlier `created_at` first on ties.
fn ranked<'a>(accounts: &'a [Account], metric: fn(&Account) -> i64) -> Vec<&'a Account> {
    let mut board: Vec<&Account> = accounts.iter().filter(|a| metric(a) > 0).collect();
    board.sort_by(|a, b| match metric(b).cmp(&metric(a)) {
        Ordering::Equal => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
        other => other,
    });
    board
}

fn entries(board: &[&Account], metric: fn(&Account) -> i64) -> Vec<RankEntry> {
    board
        .iter()
        .take(BOARD_SIZE)
        .enumerate()
        .map(|(i, a)| RankEntry {
            position: i + 1,
            account_id: a.id,
            display_name: display_name(a),
            value: metric(a),
        })
        .collect()
}

fn position_of(board: &[&Account], id: AccountId) -> Option<usize> {
    board.iter().position(|a| a.id == id).map(|i| i + 1)
}

#[derive(Clone)]
pub struct Leaderboard {
    store: Arc<dyn AccountStore>,
    weekly: WeeklyMaintainer,
}

impl Leaderboard {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        let weekly = WeeklyMaintainer::new(store.clone());
        Self { store, weekly }
    }

    pub async fn view(
        &self,
        caller: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<LeaderboardView, LedgerError> {
        self.weekly.recompute().await?;
        let accounts = self
            .store
            .scan(&|a: &Account| a.lifetime_balance > 0 || a.weekly_earned > 0, None)
            .await?;

        let all_time = ranked(&accounts, lifetime_metric);
        let weekly = ranked(&accounts, weekly_metric);

        Ok(LeaderboardView {
            all_time: entries(&all_time, lifetime_metric),
            weekly: entries(&weekly, weekly_metric),
            me: caller.map(|id| OwnRank {
                all_time: position_of(&all_time, id),
                weekly: position_of(&weekly, id),
            }),
            generated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readearn_common::Identity;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn acc(tg: i64, created: i64, lifetime: u64, baseline: u64) -> Account {
        let mut a = Account::new(Identity::telegram(tg), ts(created));
        a.lifetime_balance = lifetime;
        a.weekly_baseline = baseline;
        a.recompute_weekly();
        a
    }

    #[test]
    fn test_ranking_and_ties() {
        let accounts = vec![
            acc(1, 30, 500, 0),
            acc(2, 10, 500, 400),
            acc(3, 20, 900, 900),
            acc(4, 40, 0, 0),
        ];
        let all_time = ranked(&accounts, lifetime_metric);
        let order: Vec<_> = all_time.iter().map(|a| a.identity.telegram_id).collect();
        // 900 first, then the two 500s by creation time
        assert_eq!(order, vec![Some(3), Some(2), Some(1)]);

        let weekly = ranked(&accounts, weekly_metric);
        let order: Vec<_> = weekly.iter().map(|a| a.identity.telegram_id).collect();
        assert_eq!(order, vec![Some(1), Some(2)]);

        assert_eq!(position_of(&all_time, accounts[0].id), Some(3));
        assert_eq!(position_of(&weekly, accounts[2].id), None);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut a = acc(1, 0, 1, 0);
        assert_eq!(display_name(&a), "anonymous");
        a.identity.wallet_address = Some("0x1234567890abcdef".into());
        assert_eq!(display_name(&a), "0x1234...cdef");
        a.profile.first_name = Some("Ada".into());
        assert_eq!(display_name(&a), "Ada");
        a.profile.username = Some("ada_reads".into());
        assert_eq!(display_name(&a), "ada_reads");
    }
}

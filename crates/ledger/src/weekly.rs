//! # Weekly Aggregate Maintainer
//!
//! `weekly_earned` is kept in sync by every payout; this module is the
//! periodic correction pass.
//!
//! | Pass | Effect on every account |
//! |------|-------------------------|
//! | reset | `weekly_baseline = lifetime_balance`, `weekly_earned = 0`, `last_weekly_reset = now` |
//! | recompute | `weekly_earned = lifetime_balance - weekly_baseline` |
//!
//! Both are bulk, unconditional writes. The startup check runs a reset when
//! the newest `last_weekly_reset` across all accounts is missing or older
//! than seven days.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use readearn_common::cooldown::WEEK_SECS;
use readearn_common::Account;
use tracing::{error, info};

use crate::error::LedgerError;
use crate::store::AccountStore;

#[derive(Clone)]
pub struct WeeklyMaintainer {
    store: Arc<dyn AccountStore>,
}

impl WeeklyMaintainer {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Snapshot every balance into its baseline.
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let snapshot = move |a: &mut Account| a.reset_week(now);
        match self.store.update_all(&snapshot).await {
            Ok(count) => {
                info!(accounts = count, at = %now, "weekly reset applied");
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "weekly reset failed");
                Err(e.into())
            }
        }
    }

    /// Re-derive `weekly_earned` from the stored balance and baseline.
    pub async fn recompute(&self) -> Result<u64, LedgerError> {
        let fix = |a: &mut Account| a.recompute_weekly();
        Ok(self.store.update_all(&fix).await?)
    }

    /// Newest reset timestamp recorded on any account.
    pub async fn last_reset(&self) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let stamped = self
            .store
            .scan(&|a: &Account| a.last_weekly_reset.is_some(), None)
            .await?;
        Ok(stamped.iter().filter_map(|a| a.last_weekly_reset).max())
    }

    pub async fn reset_due(&self, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        Ok(match self.last_reset().await? {
            Some(last) => now - last > Duration::seconds(WEEK_SECS),
            None => true,
        })
    }

    /// Startup catch-up. Returns the number of accounts reset, if any.
    pub async fn catch_up(&self, now: DateTime<Utc>) -> Result<Option<u64>, LedgerError> {
        if !self.reset_due(now).await? {
            info!("weekly reset up to date");
            return Ok(None);
        }
        info!("weekly reset missed, running now");
        self.reset(now).await.map(Some)
    }
}

//! # Spin Availability Sweep
//!
//! Periodically tells Telegram users that their daily spin is ready.
//!
//! ## Eligibility
//!
//! An account is picked when it has a Telegram id and either
//!
//! - has never spun and was never notified, or
//! - spun at least one window ago and was not notified since the cutoff.
//!
//! ## Ordering
//!
//! The `spin_notified_at` marker is claimed with a conditional write that
//! repeats the eligibility predicate *before* the message is sent, so two
//! overlapping sweeps never notify the same account twice for one window.
//! A failed send is logged and not retried until the next window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use readearn_common::{Account, CooldownWindow};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::store::{AccountStore, UpdateOutcome};

/// Default batch size per sweep.
pub const DEFAULT_SWEEP_LIMIT: usize = 3000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("recipient rejected the message: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Delivery channel for spin reminders.
#[async_trait]
pub trait SpinNotifier: Send + Sync {
    async fn notify_spin_available(&self, account: &Account) -> Result<(), NotifyError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub candidates: usize,
    pub notified: usize,
    pub failed: usize,
    /// Claimed by a concurrent sweep or changed since the scan.
    pub skipped: usize,
}

/// Pure eligibility check shared by the scan filter and the claim write.
pub fn spin_reminder_due(account: &Account, window: CooldownWindow, now: DateTime<Utc>) -> bool {
    if account.identity.telegram_id.is_none() {
        return false;
    }
    let cutoff = now - window.duration();
    match account.last_spin_at {
        None => account.spin_notified_at.is_none(),
        Some(last) => last <= cutoff && account.spin_notified_at.map_or(true, |n| n < cutoff),
    }
}

pub struct SpinSweep {
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn SpinNotifier>,
    window: CooldownWindow,
    limit: usize,
}

impl SpinSweep {
    pub fn new(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn SpinNotifier>,
        window: CooldownWindow,
        limit: usize,
    ) -> Self {
        Self {
            store,
            notifier,
            window,
            limit,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, LedgerError> {
        let window = self.window;
        let due = move |a: &Account| spin_reminder_due(a, window, now);
        let candidates = self.store.scan(&due, Some(self.limit)).await?;

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for account in candidates {
            let claim = move |a: &mut Account| a.spin_notified_at = Some(now);
            let claimed = match self.store.conditional_update(account.id, &due, &claim).await {
                Ok(UpdateOutcome::Applied(acc)) => acc,
                Ok(_) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(account = %account.id, error = %e, "spin reminder claim failed");
                    report.failed += 1;
                    continue;
                }
            };

            match self.notifier.notify_spin_available(&claimed).await {
                Ok(()) => {
                    debug!(account = %claimed.id, "spin reminder sent");
                    report.notified += 1;
                }
                Err(e) => {
                    warn!(account = %claimed.id, error = %e, "spin reminder not delivered");
                    report.failed += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            notified = report.notified,
            failed = report.failed,
            skipped = report.skipped,
            "spin sweep finished"
        );
        Ok(report)
    }
}

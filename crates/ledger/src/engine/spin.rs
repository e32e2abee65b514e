//! Daily spin: one payout per 24 hours, amount clamped to `[100, 500]`.

use chrono::{DateTime, Utc};
use readearn_common::{Account, AccountId};
use serde::Serialize;
use tracing::{debug, info};

use super::{Guarded, RewardLedger};
use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason, Settlement};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinGrant {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub next_spin_at: DateTime<Utc>,
}

impl RewardLedger {
    /// Pays one spin if the last one is at least a full window old.
    ///
    /// `requested` is the client's wheel result and only advisory.
    pub async fn claim_spin(
        &self,
        id: AccountId,
        requested: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Outcome<SpinGrant>, LedgerError> {
        let window = self.policy.spin_window();
        let amount = self.policy.spin_amount(requested);

        let eligible = move |a: &Account| !window.is_active(a.last_spin_at, now);
        let pay = move |a: &mut Account| {
            a.credit(amount);
            a.last_spin_at = Some(now);
        };

        match self.guarded("spin", id, &eligible, &pay).await? {
            Guarded::Applied(acc) => {
                info!(account = %id, amount, balance = acc.lifetime_balance, "spin paid");
                Ok(Outcome::Applied(SpinGrant {
                    settlement: Settlement::of(amount, &acc),
                    next_spin_at: now + window.duration(),
                }))
            }
            Guarded::Refused(acc) => {
                let reason = RejectReason::SpinCooldown {
                    hours_left: window.hours_left(acc.last_spin_at, now),
                    retry_after_secs: window.remaining_secs_ceil(acc.last_spin_at, now),
                };
                debug!(account = %id, %reason, "spin refused");
                Ok(Outcome::Rejected(reason))
            }
        }
    }
}

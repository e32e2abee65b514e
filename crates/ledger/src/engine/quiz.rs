//! Quiz grants: three per local day, amount clamped to `[0, 100]`.
//!
//! A stale `quiz_attempts_date` (before today's local midnight) means the
//! counter restarts at zero inside the same atomic write that pays. A request
//! for 0 tokens still consumes an attempt.

use chrono::{DateTime, Utc};
use readearn_common::{Account, AccountId};
use serde::Serialize;
use tracing::{debug, info};

use super::{Guarded, RewardLedger};
use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason, Settlement};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizGrant {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub attempts_used: u8,
    pub attempts_left: u8,
}

impl RewardLedger {
    pub async fn claim_quiz(
        &self,
        id: AccountId,
        requested: i64,
        now: DateTime<Utc>,
    ) -> Result<Outcome<QuizGrant>, LedgerError> {
        let clock = self.day_clock;
        let limit = self.policy.quiz_daily_attempts;
        let amount = self.policy.quiz_amount(requested);

        let eligible = move |a: &Account| {
            clock.before_today(a.quiz_attempts_date, now) || a.quiz_attempts_count < limit
        };
        let pay = move |a: &mut Account| {
            if clock.before_today(a.quiz_attempts_date, now) {
                a.quiz_attempts_count = 0;
            }
            a.quiz_attempts_count = a.quiz_attempts_count.saturating_add(1);
            a.quiz_attempts_date = Some(now);
            a.credit(amount);
        };

        match self.guarded("quiz", id, &eligible, &pay).await? {
            Guarded::Applied(acc) => {
                info!(
                    account = %id,
                    amount,
                    attempts = acc.quiz_attempts_count,
                    "quiz paid"
                );
                Ok(Outcome::Applied(QuizGrant {
                    settlement: Settlement::of(amount, &acc),
                    attempts_used: acc.quiz_attempts_count,
                    attempts_left: limit.saturating_sub(acc.quiz_attempts_count),
                }))
            }
            Guarded::Refused(_) => {
                debug!(account = %id, limit, "quiz limit reached");
                Ok(Outcome::Rejected(RejectReason::QuizLimitReached { limit }))
            }
        }
    }
}

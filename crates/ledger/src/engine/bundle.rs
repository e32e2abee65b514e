//! Task bundles, each paid at most once.
//!
//! | Bundle | Requirement | Amount |
//! |--------|-------------|--------|
//! | Compulsory | Telegram follow claimed AND twitter rewarded | 2000 |
//! | Optional | 2 of {instagram, medium, linkedin, discord} rewarded | 2000 |

use chrono::{DateTime, Utc};
use readearn_common::{Account, AccountId, BundleKind, SocialPlatform};
use tracing::{debug, info};

use super::{Guarded, RewardLedger};
use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason, Settlement};

/// `(completed, required)` toward a bundle.
fn progress(account: &Account, bundle: BundleKind, optional_threshold: usize) -> (usize, usize) {
    match bundle {
        BundleKind::Compulsory => {
            let done = usize::from(account.telegram_reward_claimed)
                + usize::from(account.task_rewarded(SocialPlatform::Twitter));
            (done, 2)
        }
        BundleKind::Optional => (account.optional_tasks_rewarded(), optional_threshold),
    }
}

fn awarded(account: &Account, bundle: BundleKind) -> bool {
    match bundle {
        BundleKind::Compulsory => account.compulsory_bundle_awarded,
        BundleKind::Optional => account.optional_bundle_awarded,
    }
}

impl RewardLedger {
    pub async fn claim_bundle(
        &self,
        id: AccountId,
        bundle: BundleKind,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Settlement>, LedgerError> {
        let threshold = self.policy.optional_bundle_threshold;
        let amount = match bundle {
            BundleKind::Compulsory => self.policy.compulsory_bundle_reward,
            BundleKind::Optional => self.policy.optional_bundle_reward,
        };

        let eligible = move |a: &Account| {
            let (done, required) = progress(a, bundle, threshold);
            !awarded(a, bundle) && done >= required
        };
        let pay = move |a: &mut Account| {
            a.credit(amount);
            match bundle {
                BundleKind::Compulsory => {
                    a.compulsory_bundle_awarded = true;
                    a.compulsory_bundle_awarded_at = Some(now);
                }
                BundleKind::Optional => {
                    a.optional_bundle_awarded = true;
                    a.optional_bundle_awarded_at = Some(now);
                }
            }
        };

        match self.guarded("bundle", id, &eligible, &pay).await? {
            Guarded::Applied(acc) => {
                info!(account = %id, ?bundle, amount, "bundle paid");
                Ok(Outcome::Applied(Settlement::of(amount, &acc)))
            }
            Guarded::Refused(acc) => {
                let reason = if awarded(&acc, bundle) {
                    RejectReason::BundleAlreadyAwarded { bundle }
                } else {
                    let (completed, required) = progress(&acc, bundle, threshold);
                    RejectReason::BundleRequirementsUnmet {
                        bundle,
                        completed,
                        required,
                    }
                };
                debug!(account = %id, %reason, "bundle refused");
                Ok(Outcome::Rejected(reason))
            }
        }
    }
}

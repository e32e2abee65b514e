//! # Reward Ledger Engine
//!
//! One operation per reward type. Each one is a single conditional update
//! whose predicate re-states the eligibility rule and whose effect both pays
//! and advances the state that closes the window.
//!
//! ## Pattern
//!
//! ```text
//! request ──► conditional_update(id, eligible(now), pay + advance)
//!               ├─ Applied(doc)            ──► Outcome::Applied(settlement)
//!               ├─ PreconditionFailed(doc) ──► Outcome::Rejected(reason(doc))
//!               └─ NotFound                ──► LedgerError::AccountNotFound
//! ```
//!
//! A precondition failure is never retried: the document it returns already
//! explains why the claim is not payable, whether the cause was an earlier
//! claim or a concurrent one.
//!
//! ## Operations
//!
//! | Module | Operations |
//! |--------|------------|
//! | `spin` | `claim_spin` |
//! | `quiz` | `claim_quiz` |
//! | `reading` | `open_reading_session`, `claim_reading` |
//! | `social` | `start_social_task`, `verify_social_task`, `record_telegram_follow` |
//! | `bundle` | `claim_bundle` |

mod bundle;
mod quiz;
mod reading;
mod social;
mod spin;

use std::sync::Arc;

use readearn_common::{Account, AccountId, DayClock, RewardPolicy, TokenSigner};
use tracing::error;

use crate::error::LedgerError;
use crate::store::{AccountStore, Effect, Predicate, UpdateOutcome};

pub use quiz::QuizGrant;
pub use reading::{ReadingGrant, ReadingSession};
pub use social::{SocialTaskStatus, TaskVerification};
pub use spin::SpinGrant;

/// Applies reward grants against an [`AccountStore`].
#[derive(Clone)]
pub struct RewardLedger {
    store: Arc<dyn AccountStore>,
    policy: RewardPolicy,
    signer: TokenSigner,
    day_clock: DayClock,
}

impl RewardLedger {
    pub fn new(
        store: Arc<dyn AccountStore>,
        policy: RewardPolicy,
        signer: TokenSigner,
        day_clock: DayClock,
    ) -> Self {
        Self {
            store,
            policy,
            signer,
            day_clock,
        }
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn day_clock(&self) -> DayClock {
        self.day_clock
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Current document, `AccountNotFound` when absent.
    pub async fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        Ok(self.store.get(id).await?)
    }

    /// The single guarded write every reward goes through.
    ///
    /// `NotFound` is mapped to `AccountNotFound`; the remaining two
    /// outcomes are handed back to the caller to classify.
    async fn guarded(
        &self,
        op: &'static str,
        id: AccountId,
        predicate: Predicate<'_>,
        effect: Effect<'_>,
    ) -> Result<Guarded, LedgerError> {
        match self.store.conditional_update(id, predicate, effect).await {
            Ok(UpdateOutcome::Applied(acc)) => Ok(Guarded::Applied(acc)),
            Ok(UpdateOutcome::PreconditionFailed(acc)) => Ok(Guarded::Refused(acc)),
            Ok(UpdateOutcome::NotFound) => Err(LedgerError::AccountNotFound(id)),
            Err(e) => {
                error!(op, account = %id, error = %e, "store update failed");
                Err(e.into())
            }
        }
    }
}

/// `UpdateOutcome` with `NotFound` already handled.
enum Guarded {
    Applied(Account),
    Refused(Account),
}


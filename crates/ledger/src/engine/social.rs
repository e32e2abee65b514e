//! Social follow tasks.
//!
//! `start` appends one `{platform, started_at}` record. `verify` marks it
//! rewarded once the wait has elapsed, then evaluates the bundle that the
//! platform feeds. The Telegram follow has no start step; membership is
//! checked by the caller and recorded with `record_telegram_follow`.

use chrono::{DateTime, Utc};
use readearn_common::{Account, AccountId, BundleKind, SocialPlatform, SocialTask};
use serde::Serialize;
use tracing::{debug, info};

use super::{Guarded, RewardLedger};
use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason, Settlement};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialTaskStatus {
    pub platform: SocialPlatform,
    pub started_at: Option<DateTime<Utc>>,
    pub verifiable_at: Option<DateTime<Utc>>,
    pub rewarded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskVerification {
    /// `None` for the Telegram follow.
    pub platform: Option<SocialPlatform>,
    /// `false` when the task was already done and only the bundle paid now.
    pub newly_rewarded: bool,
    pub bundle: Option<Settlement>,
}

impl RewardLedger {
    fn task_status(&self, account: &Account, platform: SocialPlatform) -> SocialTaskStatus {
        let task = account.social_task(platform);
        let started_at = task.and_then(|t| t.started_at);
        SocialTaskStatus {
            platform,
            started_at,
            verifiable_at: started_at.map(|s| s + self.policy.social_window().duration()),
            rewarded: task.is_some_and(|t| t.rewarded),
        }
    }

    /// Records the first start of a task. Later starts keep the original time.
    pub async fn start_social_task(
        &self,
        id: AccountId,
        platform: SocialPlatform,
        now: DateTime<Utc>,
    ) -> Result<Outcome<SocialTaskStatus>, LedgerError> {
        let unstarted = move |a: &Account| a.social_task(platform).is_none();
        let start = move |a: &mut Account| {
            a.social_tasks.push(SocialTask {
                platform,
                started_at: Some(now),
                rewarded: false,
                rewarded_at: None,
            })
        };

        let acc = match self.guarded("social_start", id, &unstarted, &start).await? {
            Guarded::Applied(acc) => {
                debug!(account = %id, %platform, "social task started");
                acc
            }
            Guarded::Refused(acc) => acc,
        };
        Ok(Outcome::Applied(self.task_status(&acc, platform)))
    }

    pub async fn verify_social_task(
        &self,
        id: AccountId,
        platform: SocialPlatform,
        now: DateTime<Utc>,
    ) -> Result<Outcome<TaskVerification>, LedgerError> {
        let window = self.policy.social_window();
        let started = move |a: &Account| a.social_task(platform).and_then(|t| t.started_at);

        let eligible = move |a: &Account| match a.social_task(platform) {
            Some(task) => {
                !task.rewarded
                    && task.started_at.is_some()
                    && !window.is_active(task.started_at, now)
            }
            None => false,
        };
        let mark = move |a: &mut Account| {
            if let Some(task) = a.social_task_mut(platform) {
                task.rewarded = true;
                task.rewarded_at = Some(now);
            }
        };

        let reason = match self.guarded("social_verify", id, &eligible, &mark).await? {
            Guarded::Applied(_) => {
                info!(account = %id, %platform, "social task rewarded");
                let bundle = self.bundle_after_task(id, platform.bundle(), now).await?;
                return Ok(Outcome::Applied(TaskVerification {
                    platform: Some(platform),
                    newly_rewarded: true,
                    bundle,
                }));
            }
            Guarded::Refused(acc) => match acc.social_task(platform) {
                None => RejectReason::TaskNotStarted { platform },
                Some(t) if t.rewarded => RejectReason::TaskAlreadyRewarded { platform },
                Some(_) => RejectReason::TaskWaitPending {
                    platform,
                    remaining_secs: window.remaining_secs_ceil(started(&acc), now),
                    remaining_minutes: window.remaining_minutes_ceil(started(&acc), now),
                },
            },
        };

        if matches!(reason, RejectReason::TaskAlreadyRewarded { .. }) {
            if let Some(bundle) = self.bundle_after_task(id, platform.bundle(), now).await? {
                return Ok(Outcome::Applied(TaskVerification {
                    platform: Some(platform),
                    newly_rewarded: false,
                    bundle: Some(bundle),
                }));
            }
        }
        debug!(account = %id, %reason, "social verify refused");
        Ok(Outcome::Rejected(reason))
    }

    /// Marks the Telegram channel follow as claimed and evaluates the
    /// compulsory bundle. Membership must already be confirmed.
    pub async fn record_telegram_follow(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Outcome<TaskVerification>, LedgerError> {
        let unclaimed = |a: &Account| !a.telegram_reward_claimed;
        let claim = |a: &mut Account| a.telegram_reward_claimed = true;

        let newly_rewarded = match self.guarded("telegram_follow", id, &unclaimed, &claim).await? {
            Guarded::Applied(_) => {
                info!(account = %id, "telegram follow recorded");
                true
            }
            Guarded::Refused(_) => false,
        };

        let bundle = self
            .bundle_after_task(id, BundleKind::Compulsory, now)
            .await?;
        if !newly_rewarded && bundle.is_none() {
            return Ok(Outcome::Rejected(RejectReason::TelegramAlreadyClaimed));
        }
        Ok(Outcome::Applied(TaskVerification {
            platform: None,
            newly_rewarded,
            bundle,
        }))
    }

    /// Bundle evaluation after a task step; rejections collapse to `None`.
    async fn bundle_after_task(
        &self,
        id: AccountId,
        bundle: BundleKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Settlement>, LedgerError> {
        Ok(self.claim_bundle(id, bundle, now).await?.into_applied())
    }
}

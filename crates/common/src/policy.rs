//! # Reward Policy
//!
//! Amounts, clamps and windows for every reward type. The defaults are the
//! production values; a config file may override any of them.
//!
//! | Reward | Amount | Window |
//! |--------|--------|--------|
//! | Daily spin | clamp(requested, 100, 500) | 24 hours |
//! | Quiz | clamp(requested, 0, 100) | 3 per local day |
//! | Book reading | 20 | 2 minutes |
//! | Social follow | 0 (feeds bundles) | 15 minutes after start |
//! | Compulsory bundle | 2000 | once |
//! | Optional bundle | 2000 | once, needs 2 optional tasks |
//! | Referral L1 / L2 / L3 | 2000 / 500 / 200 | once per joiner |
//! | Wallet connect | 100 | once |

use serde::{Deserialize, Serialize};

use crate::cooldown::{CooldownWindow, READING_COOLDOWN_SECS, SOCIAL_WAIT_SECS, SPIN_COOLDOWN_SECS};
use crate::crypto::READING_TOKEN_TTL_SECS;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardPolicy {
    pub spin_min: u64,
    pub spin_max: u64,
    pub spin_cooldown_secs: i64,

    pub quiz_max: u64,
    pub quiz_daily_attempts: u8,

    pub reading_reward: u64,
    pub reading_cooldown_secs: i64,
    pub reading_token_ttl_secs: i64,

    pub social_wait_secs: i64,

    pub compulsory_bundle_reward: u64,
    pub optional_bundle_reward: u64,
    pub optional_bundle_threshold: usize,

    /// Index 0 is level 1.
    pub referral_level_rewards: [u64; 3],

    pub wallet_connect_bonus: u64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            spin_min: 100,
            spin_max: 500,
            spin_cooldown_secs: SPIN_COOLDOWN_SECS,
            quiz_max: 100,
            quiz_daily_attempts: 3,
            reading_reward: 20,
            reading_cooldown_secs: READING_COOLDOWN_SECS,
            reading_token_ttl_secs: READING_TOKEN_TTL_SECS,
            social_wait_secs: SOCIAL_WAIT_SECS,
            compulsory_bundle_reward: 2000,
            optional_bundle_reward: 2000,
            optional_bundle_threshold: 2,
            referral_level_rewards: [2000, 500, 200],
            wallet_connect_bonus: 100,
        }
    }
}

impl RewardPolicy {
    /// Server-side clamp; the requested value is advisory only.
    #[must_use]
    pub fn spin_amount(&self, requested: Option<i64>) -> u64 {
        clamp_request(requested.unwrap_or(0), self.spin_min, self.spin_max)
    }

    #[must_use]
    pub fn quiz_amount(&self, requested: i64) -> u64 {
        clamp_request(requested, 0, self.quiz_max)
    }

    /// Payout for upline `level` (1..=3); `None` beyond the third level.
    #[must_use]
    pub fn referral_reward(&self, level: u8) -> Option<u64> {
        match level {
            1..=3 => self.referral_level_rewards.get(usize::from(level - 1)).copied(),
            _ => None,
        }
    }

    pub fn spin_window(&self) -> CooldownWindow {
        CooldownWindow::from_secs(self.spin_cooldown_secs)
    }

    pub fn reading_window(&self) -> CooldownWindow {
        CooldownWindow::from_secs(self.reading_cooldown_secs)
    }

    pub fn social_window(&self) -> CooldownWindow {
        CooldownWindow::from_secs(self.social_wait_secs)
    }
}

fn clamp_request(requested: i64, min: u64, max: u64) -> u64 {
    if requested <= 0 {
        return min;
    }
    u64::try_from(requested).unwrap_or(max).clamp(min, max)
}

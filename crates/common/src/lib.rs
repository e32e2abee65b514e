//! # Read-and-Earn Common Crate
//!
//! Types and pure helpers shared by the ledger engine and the HTTP service.
//!
//! ## Modules
//! - `account`: the account document and its referral/social records
//! - `cooldown`: cooldown windows, local-day and week boundaries
//! - `crypto`: signed capability tokens and nonces
//! - `password`: bcrypt hashing for email accounts
//! - `telegram_auth`: Telegram Login Widget signature check
//! - `policy`: reward amounts, clamps and windows
//! - `config`: service configuration (TOML + environment)

pub mod account;
pub mod config;
pub mod cooldown;
pub mod crypto;
pub mod password;
pub mod policy;
pub mod telegram_auth;

pub use account::{
    Account, AccountId, BundleKind, Identity, PendingReferral, Profile, ReferralLevelReward,
    ReferralState, SocialPlatform, SocialTask, UnknownPlatform,
};
pub use config::{Config, ConfigError, SchedulerConfig, TelegramConfig};
pub use cooldown::{time_until_next_reset, week_start, CooldownWindow, DayClock, ResetCountdown};
pub use crypto::{Claims, Scope, TokenError, TokenSigner};
pub use password::{hash_password, verify_password, PasswordError, MIN_PASSWORD_LEN};
pub use policy::RewardPolicy;
pub use telegram_auth::{
    TelegramAuthError, TelegramAuthPayload, TelegramUser, TELEGRAM_AUTH_MAX_AGE_SECS,
};

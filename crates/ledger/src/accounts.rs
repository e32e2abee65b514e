//! Account lifecycle: creation on first authentication, wallet linking and
//! the premium flags.
//!
//! Accounts are created by whichever identity authenticates first (Telegram
//! login, wallet nonce request or email registration) and are never deleted.
//! Email accounts carry a bcrypt password hash; the wallet bonus is reserved
//! for accounts that have a Telegram identity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use readearn_common::crypto::login_nonce;
use readearn_common::password::DEFAULT_PASSWORD_COST;
use readearn_common::{
    hash_password, verify_password, Account, AccountId, Identity, PasswordError, Profile,
    RewardPolicy, MIN_PASSWORD_LEN,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::outcome::{Outcome, RejectReason, Settlement};
use crate::referral::{ReferralBinding, ReferralGraph};
use crate::store::{AccountKey, AccountStore, StoreError, UpdateOutcome};

/// Lookup, inserting a fresh account when absent.
///
/// A concurrent insert of the same identity is resolved by reading the
/// winner's document. Returns `(account, created)`.
pub(crate) async fn find_or_create(
    store: &dyn AccountStore,
    key: AccountKey,
    identity: Identity,
    now: DateTime<Utc>,
) -> Result<(Account, bool), LedgerError> {
    if let Some(existing) = store.find(&key).await? {
        return Ok((existing, false));
    }
    match store.insert(Account::new(identity, now)).await {
        Ok(created) => {
            info!(account = %created.id, %key, "account created");
            Ok((created, true))
        }
        Err(StoreError::DuplicateIdentity(taken)) => match store.find(&key).await? {
            Some(existing) => Ok((existing, false)),
            None => Err(LedgerError::Store(StoreError::DuplicateIdentity(taken))),
        },
        Err(e) => Err(e.into()),
    }
}

fn valid_wallet(address: &str) -> bool {
    !address.is_empty()
        && address.len() <= 128
        && address.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramLogin {
    pub account: Account,
    pub created: bool,
    /// `None` when no referral was supplied or pending.
    pub referral: Option<Outcome<ReferralBinding>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletNonce {
    pub account_id: AccountId,
    pub nonce: String,
    pub created: bool,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    policy: RewardPolicy,
    referrals: ReferralGraph,
    password_cost: u32,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountStore>, policy: RewardPolicy, referrals: ReferralGraph) -> Self {
        Self {
            store,
            policy,
            referrals,
            password_cost: DEFAULT_PASSWORD_COST,
        }
    }

    /// bcrypt cost for new password hashes.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub async fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        Ok(self.store.get(id).await?)
    }

    /// Find-or-create by Telegram id, refresh profile, then run the referral
    /// step (explicit code first, bot-recorded referral otherwise).
    pub async fn login_telegram(
        &self,
        telegram_id: i64,
        profile: Profile,
        referral_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TelegramLogin, LedgerError> {
        let (account, created) = find_or_create(
            self.store.as_ref(),
            AccountKey::TelegramId(telegram_id),
            Identity::telegram(telegram_id),
            now,
        )
        .await?;

        if account.profile != profile {
            let differs = |a: &Account| a.profile != profile;
            let refresh = |a: &mut Account| a.profile = profile.clone();
            self.store
                .conditional_update(account.id, &differs, &refresh)
                .await?;
        }

        let referral = self.referrals.on_login(account.id, referral_code, now).await?;
        let account = self.store.get(account.id).await?;
        Ok(TelegramLogin {
            account,
            created,
            referral,
        })
    }

    /// Find-or-create by wallet and store a fresh six-digit login nonce.
    pub async fn wallet_nonce(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<WalletNonce>, LedgerError> {
        let address = address.trim().to_lowercase();
        if !valid_wallet(&address) {
            return Ok(Outcome::Rejected(RejectReason::InvalidWallet));
        }
        let (account, created) = find_or_create(
            self.store.as_ref(),
            AccountKey::Wallet(address.clone()),
            Identity::wallet(&address),
            now,
        )
        .await?;

        let nonce = login_nonce();
        let set = |a: &mut Account| a.login_nonce = Some(nonce.clone());
        match self.store.conditional_update(account.id, &|_| true, &set).await? {
            UpdateOutcome::NotFound => Err(LedgerError::AccountNotFound(account.id)),
            _ => {
                debug!(account = %account.id, "wallet nonce issued");
                Ok(Outcome::Applied(WalletNonce {
                    account_id: account.id,
                    nonce,
                    created,
                }))
            }
        }
    }

    /// Creates an email account with a hashed password.
    pub async fn register_email(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Account>, LedgerError> {
        let email = email.trim().to_lowercase();
        if !valid_email(&email) {
            return Ok(Outcome::Rejected(RejectReason::InvalidEmail));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Ok(Outcome::Rejected(RejectReason::WeakPassword {
                min_len: MIN_PASSWORD_LEN,
            }));
        }
        if self.store.find(&AccountKey::Email(email.clone())).await?.is_some() {
            return Ok(Outcome::Rejected(RejectReason::EmailTaken));
        }

        let cost = self.password_cost;
        let password = password.to_string();
        let hash = blocking(move || hash_password(&password, cost)).await??;

        let mut account = Account::new(Identity::email(&email), now);
        account.password_hash = Some(hash);
        match self.store.insert(account).await {
            Ok(acc) => {
                info!(account = %acc.id, "email account registered");
                Ok(Outcome::Applied(acc))
            }
            Err(StoreError::DuplicateIdentity(_)) => Ok(Outcome::Rejected(RejectReason::EmailTaken)),
            Err(e) => Err(e.into()),
        }
    }

    /// Email and password login. Unknown email and wrong password are
    /// indistinguishable to the caller.
    pub async fn login_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Outcome<Account>, LedgerError> {
        let email = email.trim().to_lowercase();
        let Some(account) = self.store.find(&AccountKey::Email(email)).await? else {
            return Ok(Outcome::Rejected(RejectReason::InvalidCredentials));
        };
        let Some(hash) = account.password_hash.clone() else {
            debug!(account = %account.id, "email account has no password");
            return Ok(Outcome::Rejected(RejectReason::InvalidCredentials));
        };

        let password = password.to_string();
        if blocking(move || Ok(verify_password(&password, &hash))).await?? {
            debug!(account = %account.id, "email login");
            Ok(Outcome::Applied(account))
        } else {
            warn!(account = %account.id, "email login with wrong password");
            Ok(Outcome::Rejected(RejectReason::InvalidCredentials))
        }
    }

    /// Links a wallet and pays the one-time connection bonus.
    pub async fn connect_wallet(
        &self,
        id: AccountId,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Settlement>, LedgerError> {
        let address = address.trim().to_lowercase();
        if !valid_wallet(&address) {
            return Ok(Outcome::Rejected(RejectReason::InvalidWallet));
        }
        if let Some(holder) = self.store.find(&AccountKey::Wallet(address.clone())).await? {
            if holder.id != id {
                return Ok(Outcome::Rejected(RejectReason::WalletInUse));
            }
        }

        let bonus = self.policy.wallet_connect_bonus;
        let eligible = |a: &Account| !a.wallet_connected && a.identity.telegram_id.is_some();
        let connect = |a: &mut Account| {
            a.identity.wallet_address = Some(address.clone());
            a.wallet_connected = true;
            a.credit(bonus);
        };

        match self.store.conditional_update(id, &eligible, &connect).await {
            Ok(UpdateOutcome::Applied(acc)) => {
                info!(account = %id, amount = bonus, at = %now, "wallet connected");
                Ok(Outcome::Applied(Settlement::of(bonus, &acc)))
            }
            Ok(UpdateOutcome::PreconditionFailed(acc)) if acc.wallet_connected => {
                Ok(Outcome::Rejected(RejectReason::WalletAlreadyConnected))
            }
            Ok(UpdateOutcome::PreconditionFailed(_)) => {
                debug!(account = %id, "wallet bonus needs a telegram identity");
                Ok(Outcome::Rejected(RejectReason::TelegramAccountRequired))
            }
            Ok(UpdateOutcome::NotFound) => Err(LedgerError::AccountNotFound(id)),
            Err(StoreError::DuplicateIdentity(_)) => Ok(Outcome::Rejected(RejectReason::WalletInUse)),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent.
    pub async fn set_premium(&self, id: AccountId) -> Result<Account, LedgerError> {
        let not_premium = |a: &Account| !a.is_premium_user;
        let upgrade = |a: &mut Account| a.is_premium_user = true;
        match self.store.conditional_update(id, &not_premium, &upgrade).await? {
            UpdateOutcome::Applied(acc) => {
                info!(account = %id, "premium enabled");
                Ok(acc)
            }
            UpdateOutcome::PreconditionFailed(acc) => Ok(acc),
            UpdateOutcome::NotFound => Err(LedgerError::AccountNotFound(id)),
        }
    }

    /// Grow-only set of unlocked premium books.
    pub async fn unlock_premium_book(
        &self,
        id: AccountId,
        book_id: &str,
    ) -> Result<Outcome<Account>, LedgerError> {
        let book_id = book_id.trim().to_string();
        if book_id.is_empty() {
            return Ok(Outcome::Rejected(RejectReason::MissingBookId));
        }
        let locked = |a: &Account| !a.premium_books.contains(&book_id);
        let unlock = |a: &mut Account| {
            a.premium_books.insert(book_id.clone());
        };
        match self.store.conditional_update(id, &locked, &unlock).await? {
            UpdateOutcome::Applied(acc) | UpdateOutcome::PreconditionFailed(acc) => {
                Ok(Outcome::Applied(acc))
            }
            UpdateOutcome::NotFound => Err(LedgerError::AccountNotFound(id)),
        }
    }
}

/// Runs CPU-bound password work off the async workers.
async fn blocking<T, F>(work: F) -> Result<Result<T, PasswordError>, LedgerError>
where
    F: FnOnce() -> Result<T, PasswordError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::Password(PasswordError::Hash(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_validation() {
        assert!(valid_wallet("0xabc123"));
        assert!(valid_wallet("eq:abc-def_1"));
        assert!(!valid_wallet(""));
        assert!(!valid_wallet("0x abc"));
        assert!(!valid_wallet(&"a".repeat(200)));
    }

    #[test]
    fn test_email_validation() {
        assert!(valid_email("reader@example.com"));
        assert!(!valid_email("reader@example"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("a@@example.com"));
        assert!(!valid_email("a b@example.com"));
        assert!(!valid_email("reader@.com"));
    }
}

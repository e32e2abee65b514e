//! # In-Memory Account Store
//!
//! Reference [`AccountStore`] backed by a `HashMap` plus one unique index per
//! external identity.
//!
//! ## Thread Safety
//!
//! - One `parking_lot::RwLock` guards documents and indices together.
//! - `conditional_update` evaluates the predicate, applies the effect to a
//!   copy, checks identity uniqueness and commits, all under a single write
//!   guard. That is exactly single-document atomicity.
//! - No guard is held across an `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use readearn_common::{Account, AccountId, Identity};

use crate::store::{AccountKey, AccountStore, Effect, Predicate, StoreError, UpdateOutcome};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    by_telegram: HashMap<i64, AccountId>,
    by_wallet: HashMap<String, AccountId>,
    by_email: HashMap<String, AccountId>,
}

impl Inner {
    fn resolve(&self, key: &AccountKey) -> Option<AccountId> {
        match key {
            AccountKey::Id(id) => self.accounts.contains_key(id).then_some(*id),
            AccountKey::TelegramId(tg) => self.by_telegram.get(tg).copied(),
            AccountKey::Wallet(w) => self.by_wallet.get(&w.to_lowercase()).copied(),
            AccountKey::Email(e) => self.by_email.get(&e.to_lowercase()).copied(),
        }
    }

    /// First identity in `identity` already owned by an account other than `owner`.
    fn conflict(&self, identity: &Identity, owner: AccountId) -> Option<String> {
        let taken = |holder: Option<&AccountId>| holder.is_some_and(|h| *h != owner);

        if let Some(tg) = identity.telegram_id {
            if taken(self.by_telegram.get(&tg)) {
                return Some(AccountKey::TelegramId(tg).to_string());
            }
        }
        if let Some(w) = &identity.wallet_address {
            if taken(self.by_wallet.get(w)) {
                return Some(AccountKey::Wallet(w.clone()).to_string());
            }
        }
        if let Some(e) = &identity.email {
            if taken(self.by_email.get(e)) {
                return Some(AccountKey::Email(e.clone()).to_string());
            }
        }
        None
    }

    fn unindex(&mut self, identity: &Identity) {
        if let Some(tg) = identity.telegram_id {
            self.by_telegram.remove(&tg);
        }
        if let Some(w) = &identity.wallet_address {
            self.by_wallet.remove(w);
        }
        if let Some(e) = &identity.email {
            self.by_email.remove(e);
        }
    }

    fn index(&mut self, identity: &Identity, id: AccountId) {
        if let Some(tg) = identity.telegram_id {
            self.by_telegram.insert(tg, id);
        }
        if let Some(w) = &identity.wallet_address {
            self.by_wallet.insert(w.clone(), id);
        }
        if let Some(e) = &identity.email {
            self.by_email.insert(e.clone(), id);
        }
    }
}

/// In-process account store.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: RwLock<Inner>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        let mut inner = self.inner.write();
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::DuplicateIdentity(
                AccountKey::Id(account.id).to_string(),
            ));
        }
        if let Some(taken) = inner.conflict(&account.identity, account.id) {
            return Err(StoreError::DuplicateIdentity(taken));
        }
        inner.index(&account.identity, account.id);
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find(&self, key: &AccountKey) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .resolve(key)
            .and_then(|id| inner.accounts.get(&id).cloned()))
    }

    async fn conditional_update(
        &self,
        id: AccountId,
        predicate: Predicate<'_>,
        effect: Effect<'_>,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut inner = self.inner.write();
        let Some(current) = inner.accounts.get(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !predicate(current) {
            return Ok(UpdateOutcome::PreconditionFailed(current.clone()));
        }

        let mut next = current.clone();
        effect(&mut next);
        next.id = id;

        if next.identity != current.identity {
            if let Some(taken) = inner.conflict(&next.identity, id) {
                return Err(StoreError::DuplicateIdentity(taken));
            }
            let before = current.identity.clone();
            inner.unindex(&before);
            inner.index(&next.identity, id);
        }

        inner.accounts.insert(id, next.clone());
        Ok(UpdateOutcome::Applied(next))
    }

    async fn update_all(&self, effect: Effect<'_>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let mut touched = 0u64;
        for account in inner.accounts.values_mut() {
            effect(account);
            touched += 1;
        }
        Ok(touched)
    }

    async fn scan(
        &self,
        filter: Predicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Account>, StoreError> {
        let inner = self.inner.read();
        let mut hits: Vec<Account> = inner
            .accounts
            .values()
            .filter(|a| filter(a))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

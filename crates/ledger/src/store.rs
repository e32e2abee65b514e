//! # Account Store Contract
//!
//! The only concurrency primitive the ledger relies on is a single-document
//! conditional update: evaluate a predicate against the current document and,
//! only if it holds, apply an effect, all in one atomic step.
//!
//! ## Trait
//!
//! | Method | Semantics |
//! |--------|-----------|
//! | `insert` | create a document; fails on any duplicate identity |
//! | `find` | lookup by id or by one external identity |
//! | `conditional_update` | atomic predicate + effect on one document |
//! | `update_all` | bulk, unconditional effect over every document |
//! | `scan` | read-only filtered listing |
//!
//! ## Invariants
//!
//! 1. The predicate and the effect of one `conditional_update` observe the
//!    same document version. No other write to that document interleaves.
//! 2. `PreconditionFailed` carries the document as it was when the predicate
//!    failed, so callers can report a precise rejection without a second read.
//! 3. An effect that changes an identity field must respect uniqueness; the
//!    update fails with `DuplicateIdentity` and nothing is written.
//! 4. An error result means "not applied". Callers never assume otherwise.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use readearn_common::{Account, AccountId};
use thiserror::Error;

/// Predicate evaluated against the stored document.
pub type Predicate<'a> = &'a (dyn Fn(&Account) -> bool + Send + Sync);

/// Mutation applied when the predicate holds.
pub type Effect<'a> = &'a (dyn Fn(&mut Account) + Send + Sync);

// ════════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════════

/// Lookup key. Wallet and email are matched lower-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccountKey {
    Id(AccountId),
    TelegramId(i64),
    Wallet(String),
    Email(String),
}

impl AccountKey {
    pub fn wallet(address: &str) -> Self {
        AccountKey::Wallet(address.trim().to_lowercase())
    }

    pub fn email(email: &str) -> Self {
        AccountKey::Email(email.trim().to_lowercase())
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKey::Id(id) => write!(f, "id:{id}"),
            AccountKey::TelegramId(tg) => write!(f, "telegram:{tg}"),
            AccountKey::Wallet(w) => write!(f, "wallet:{w}"),
            AccountKey::Email(e) => write!(f, "email:{e}"),
        }
    }
}

/// Result of a conditional update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Predicate held; carries the document after the effect.
    Applied(Account),
    /// Predicate failed; carries the unchanged document.
    PreconditionFailed(Account),
    NotFound,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("account not found: {0}")]
    NotFound(AccountId),

    #[error("identity already bound to another account: {0}")]
    DuplicateIdentity(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend failure: {0}")]
    Backend(String),
}

// ════════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: Account) -> Result<Account, StoreError>;

    async fn find(&self, key: &AccountKey) -> Result<Option<Account>, StoreError>;

    async fn conditional_update(
        &self,
        id: AccountId,
        predicate: Predicate<'_>,
        effect: Effect<'_>,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Applies `effect` to every document. Returns the number touched.
    ///
    /// The effect must not change identity fields.
    async fn update_all(&self, effect: Effect<'_>) -> Result<u64, StoreError>;

    /// Documents matching `filter`, oldest first, at most `limit`.
    async fn scan(
        &self,
        filter: Predicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Account>, StoreError>;

    /// `find` by id, treating absence as an error.
    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        self.find(&AccountKey::Id(id))
            .await?
            .ok_or(StoreError::NotFound(id))
    }
}

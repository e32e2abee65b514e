//! Infrastructure errors surfaced by the ledger.
//!
//! Eligibility failures never appear here; see [`crate::outcome`].

use readearn_common::{AccountId, PasswordError, TokenError};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(StoreError),

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("password error: {0}")]
    Password(#[from] PasswordError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => LedgerError::AccountNotFound(id),
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    /// `true` for store timeouts; the operation may be retried by the client.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LedgerError::Store(StoreError::Timeout(_)))
    }
}

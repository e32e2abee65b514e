//! Password hashing for email accounts (bcrypt).
//!
//! Both functions are CPU bound; async callers run them on a blocking thread.

use thiserror::Error;

/// Cost used when none is configured.
pub const DEFAULT_PASSWORD_COST: u32 = 10;

/// Shortest accepted password, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(password, cost).map_err(|e| PasswordError::Hash(e.to_string()))
}

/// `false` for a wrong password and for a hash that does not parse.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

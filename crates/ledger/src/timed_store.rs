//! Deadline wrapper for any [`AccountStore`].
//!
//! Every call is raced against `tokio::time::timeout`. An elapsed timer is
//! reported as [`StoreError::Timeout`] and the caller treats the operation as
//! not applied.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use readearn_common::{Account, AccountId};
use tracing::warn;

use crate::store::{AccountKey, AccountStore, Effect, Predicate, StoreError, UpdateOutcome};

pub struct TimedStore<S> {
    inner: S,
    limit: Duration,
}

impl<S: AccountStore> TimedStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        T: Send,
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, limit_ms = self.limit.as_millis() as u64, "store call timed out");
                Err(StoreError::Timeout(self.limit))
            }
        }
    }
}

#[async_trait]
impl<S: AccountStore> AccountStore for TimedStore<S> {
    async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        self.bounded("insert", self.inner.insert(account)).await
    }

    async fn find(&self, key: &AccountKey) -> Result<Option<Account>, StoreError> {
        self.bounded("find", self.inner.find(key)).await
    }

    async fn conditional_update(
        &self,
        id: AccountId,
        predicate: Predicate<'_>,
        effect: Effect<'_>,
    ) -> Result<UpdateOutcome, StoreError> {
        self.bounded(
            "conditional_update",
            self.inner.conditional_update(id, predicate, effect),
        )
        .await
    }

    async fn update_all(&self, effect: Effect<'_>) -> Result<u64, StoreError> {
        self.bounded("update_all", self.inner.update_all(effect)).await
    }

    async fn scan(
        &self,
        filter: Predicate<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Account>, StoreError> {
        self.bounded("scan", self.inner.scan(filter, limit)).await
    }
}

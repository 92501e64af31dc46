//! Persistence boundary for accounts, subscriptions and usage counters
//!
//! Every component takes an `Arc<dyn AccountStore>` so the Postgres store can
//! be swapped for [`MemoryStore`] in tests. Implementations must enforce the
//! same uniqueness rules as the database schema:
//!
//! - one account per external id
//! - one subscription per account
//! - one usage row per (account, month)
//!
//! and report violations as [`StoreError::UniqueViolation`].

mod memory;
mod postgres;

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;

use async_trait::async_trait;
use outcomesignal_shared::{
    Account, AccountId, AccountProfile, NewAccount, NewSubscription, Subscription, UsageTracking,
};
use thiserror::Error;
use time::OffsetDateTime;

pub const ACCOUNTS_EXTERNAL_ID_KEY: &str = "users_clerk_user_id_key";
pub const SUBSCRIPTIONS_ACCOUNT_KEY: &str = "subscriptions_user_id_key";
pub const USAGE_ACCOUNT_MONTH_KEY: &str = "usage_tracking_user_id_month_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Row not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(constraint) = outcomesignal_shared::unique_violation_constraint(&err) {
            return StoreError::UniqueViolation { constraint };
        }
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with `UniqueViolation` if the external id exists.
    async fn insert_account(&self, new: &NewAccount) -> StoreResult<Account>;

    async fn find_account_by_external_id(&self, external_id: &str)
        -> StoreResult<Option<Account>>;

    /// Overwrite the profile fields of an existing account
    async fn update_account_profile(
        &self,
        id: AccountId,
        profile: &AccountProfile,
    ) -> StoreResult<Account>;

    async fn find_subscription(&self, account_id: AccountId) -> StoreResult<Option<Subscription>>;

    /// Insert a subscription. Fails with `UniqueViolation` if the account already has one.
    async fn insert_subscription(&self, new: &NewSubscription) -> StoreResult<Subscription>;

    /// Insert a usage row. Fails with `UniqueViolation` if (account, month) exists.
    async fn insert_usage(&self, usage: &UsageTracking) -> StoreResult<()>;

    async fn find_usage(&self, account_id: AccountId, month: &str)
        -> StoreResult<Option<UsageTracking>>;

    /// Atomically add one to `initiatives_count`. Returns the new count, or
    /// `None` when the row does not exist.
    async fn increment_initiatives(&self, account_id: AccountId, month: &str)
        -> StoreResult<Option<i32>>;

    /// Mark active trials whose end has passed as expired. Returns rows changed.
    async fn expire_trials(&self, now: OffsetDateTime) -> StoreResult<u64>;

    /// Subscriptions with no usage row for `month`
    async fn subscriptions_missing_usage(&self, month: &str) -> StoreResult<Vec<Subscription>>;
}

//! In-memory store with the same uniqueness semantics as the Postgres schema.
//!
//! Used by tests across the workspace and by local development without a
//! database. Supports one-shot failure injection per operation.

use async_trait::async_trait;
use outcomesignal_shared::{
    Account, AccountId, AccountProfile, NewAccount, NewSubscription, Subscription,
    SubscriptionId, SubscriptionStatus, SubscriptionTier, UsageTracking,
};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{
    AccountStore, StoreError, StoreResult, ACCOUNTS_EXTERNAL_ID_KEY, SUBSCRIPTIONS_ACCOUNT_KEY,
    USAGE_ACCOUNT_MONTH_KEY,
};

/// Store operations that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertAccount,
    FindAccount,
    UpdateAccount,
    FindSubscription,
    InsertSubscription,
    InsertUsage,
    FindUsage,
    IncrementInitiatives,
    ExpireTrials,
    MissingUsage,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, Account>,
    subscriptions: HashMap<AccountId, Subscription>,
    usage: HashMap<(AccountId, String), UsageTracking>,
    failures: HashMap<StoreOp, Vec<StoreError>>,
    calls: HashMap<StoreOp, usize>,
}

impl MemoryState {
    fn enter(&mut self, op: StoreOp) -> StoreResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(&op).and_then(|queue| queue.pop()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `op` return `err`. Queued errors fire in
    /// insertion order.
    pub async fn fail_next(&self, op: StoreOp, err: StoreError) {
        let mut state = self.state.lock().await;
        let queue = state.failures.entry(op).or_default();
        queue.insert(0, err);
    }

    /// Number of times `op` has been invoked
    pub async fn call_count(&self, op: StoreOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    pub async fn usage_rows(&self, account_id: AccountId) -> Vec<UsageTracking> {
        self.state
            .lock()
            .await
            .usage
            .values()
            .filter(|u| u.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Overwrite a usage row directly, bypassing uniqueness checks
    pub async fn put_usage(&self, usage: UsageTracking) {
        let mut state = self.state.lock().await;
        state
            .usage
            .insert((usage.account_id, usage.month.clone()), usage);
    }

    /// Overwrite a subscription directly, bypassing uniqueness checks
    pub async fn put_subscription(&self, subscription: Subscription) {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .insert(subscription.account_id, subscription);
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, new: &NewAccount) -> StoreResult<Account> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::InsertAccount)?;

        if state
            .accounts
            .values()
            .any(|a| a.external_id == new.external_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: ACCOUNTS_EXTERNAL_ID_KEY.to_string(),
            });
        }

        let account = Account {
            id: AccountId::new(),
            external_id: new.external_id.clone(),
            email: new.profile.email.clone(),
            first_name: new.profile.first_name.clone(),
            last_name: new.profile.last_name.clone(),
            avatar_url: new.profile.avatar_url.clone(),
            created_at: new.created_at,
            updated_at: OffsetDateTime::now_utc(),
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Account>> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::FindAccount)?;
        Ok(state
            .accounts
            .values()
            .find(|a| a.external_id == external_id)
            .cloned())
    }

    async fn update_account_profile(
        &self,
        id: AccountId,
        profile: &AccountProfile,
    ) -> StoreResult<Account> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::UpdateAccount)?;
        let account = state.accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        account.email = profile.email.clone();
        account.first_name = profile.first_name.clone();
        account.last_name = profile.last_name.clone();
        account.avatar_url = profile.avatar_url.clone();
        account.updated_at = OffsetDateTime::now_utc();
        Ok(account.clone())
    }

    async fn find_subscription(&self, account_id: AccountId) -> StoreResult<Option<Subscription>> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::FindSubscription)?;
        Ok(state.subscriptions.get(&account_id).cloned())
    }

    async fn insert_subscription(&self, new: &NewSubscription) -> StoreResult<Subscription> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::InsertSubscription)?;

        if state.subscriptions.contains_key(&new.account_id) {
            return Err(StoreError::UniqueViolation {
                constraint: SUBSCRIPTIONS_ACCOUNT_KEY.to_string(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            account_id: new.account_id,
            tier: new.tier,
            status: new.status,
            trial_ends_at: new.trial_ends_at,
            current_period_start: new.current_period_start,
            current_period_end: new.current_period_end,
            created_at: now,
            updated_at: now,
        };
        state
            .subscriptions
            .insert(new.account_id, subscription.clone());
        Ok(subscription)
    }

    async fn insert_usage(&self, usage: &UsageTracking) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::InsertUsage)?;

        let key = (usage.account_id, usage.month.clone());
        if state.usage.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: USAGE_ACCOUNT_MONTH_KEY.to_string(),
            });
        }
        state.usage.insert(key, usage.clone());
        Ok(())
    }

    async fn find_usage(
        &self,
        account_id: AccountId,
        month: &str,
    ) -> StoreResult<Option<UsageTracking>> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::FindUsage)?;
        Ok(state.usage.get(&(account_id, month.to_string())).cloned())
    }

    async fn increment_initiatives(
        &self,
        account_id: AccountId,
        month: &str,
    ) -> StoreResult<Option<i32>> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::IncrementInitiatives)?;
        Ok(state
            .usage
            .get_mut(&(account_id, month.to_string()))
            .map(|row| {
                row.initiatives_count += 1;
                row.initiatives_count
            }))
    }

    async fn expire_trials(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::ExpireTrials)?;
        let mut expired = 0;
        for sub in state.subscriptions.values_mut() {
            let past_end = sub.trial_ends_at.is_some_and(|end| end < now);
            if sub.tier == SubscriptionTier::Trial
                && sub.status == SubscriptionStatus::Active
                && past_end
            {
                sub.status = SubscriptionStatus::Expired;
                sub.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn subscriptions_missing_usage(&self, month: &str) -> StoreResult<Vec<Subscription>> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::MissingUsage)?;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SubscriptionStatus::Active | SubscriptionStatus::PastDue
                )
            })
            .filter(|s| !state.usage.contains_key(&(s.account_id, month.to_string())))
            .cloned()
            .collect())
    }
}

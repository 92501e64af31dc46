//! Trial subscription bootstrap
//!
//! Runs from both the webhook path and the synchronous "ensure subscription"
//! path, possibly concurrently for the same account. The unique constraint on
//! the subscription's account id arbitrates; the loser refetches the winner.

use outcomesignal_shared::{
    limits_for, month_key, AccountId, NewSubscription, Subscription, SubscriptionStatus,
    SubscriptionTier, TRIAL_DURATION_DAYS,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};
use crate::store::AccountStore;
use crate::usage::{ensure_usage_row, UsageRowOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapResult {
    pub subscription: Subscription,
    /// True only for the call that inserted the subscription
    pub is_new: bool,
}

#[derive(Clone)]
pub struct SubscriptionBootstrapper {
    store: Arc<dyn AccountStore>,
}

impl SubscriptionBootstrapper {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    pub async fn ensure_trial(&self, account_id: AccountId) -> BillingResult<BootstrapResult> {
        self.ensure_trial_at(account_id, OffsetDateTime::now_utc())
            .await
    }

    /// Ensure the account has a subscription (a fresh trial if none) and a
    /// usage row for the month containing `now`.
    pub async fn ensure_trial_at(
        &self,
        account_id: AccountId,
        now: OffsetDateTime,
    ) -> BillingResult<BootstrapResult> {
        if let Some(subscription) = self.store.find_subscription(account_id).await? {
            tracing::debug!(
                account_id = %account_id,
                subscription_id = %subscription.id,
                "Subscription already exists"
            );
            self.ensure_usage(&subscription, now).await;
            return Ok(BootstrapResult {
                subscription,
                is_new: false,
            });
        }

        let trial_ends_at = now + Duration::days(TRIAL_DURATION_DAYS);
        let new = NewSubscription {
            account_id,
            tier: SubscriptionTier::Trial,
            status: SubscriptionStatus::Active,
            trial_ends_at: Some(trial_ends_at),
            current_period_start: now,
            current_period_end: trial_ends_at,
        };

        let (subscription, is_new) = match self.store.insert_subscription(&new).await {
            Ok(subscription) => {
                tracing::info!(
                    account_id = %account_id,
                    subscription_id = %subscription.id,
                    trial_ends_at = %trial_ends_at,
                    "Trial subscription created"
                );
                (subscription, true)
            }
            Err(e) if e.is_unique_violation() => {
                tracing::info!(
                    account_id = %account_id,
                    "Concurrent bootstrap created the subscription first"
                );
                let existing = self
                    .store
                    .find_subscription(account_id)
                    .await
                    .map_err(|e| BillingError::SubscriptionCreationFailed(e.to_string()))?
                    .ok_or_else(|| {
                        BillingError::SubscriptionCreationFailed(
                            "subscription vanished after unique violation".to_string(),
                        )
                    })?;
                (existing, false)
            }
            Err(e) => {
                tracing::error!(
                    account_id = %account_id,
                    error = %e,
                    "Failed to create trial subscription"
                );
                return Err(BillingError::SubscriptionCreationFailed(e.to_string()));
            }
        };

        self.ensure_usage(&subscription, now).await;
        Ok(BootstrapResult {
            subscription,
            is_new,
        })
    }

    /// Usage row failures are logged and swallowed; the limit evaluator treats
    /// a missing row as zero usage.
    async fn ensure_usage(&self, subscription: &Subscription, now: OffsetDateTime) {
        let month = month_key(now);
        let limits = limits_for(subscription.tier);
        match ensure_usage_row(self.store.as_ref(), subscription.account_id, limits, &month).await
        {
            Ok(UsageRowOutcome::Created) => {
                tracing::info!(
                    account_id = %subscription.account_id,
                    month = %month,
                    "Usage tracking row created"
                );
            }
            Ok(UsageRowOutcome::AlreadyExists) => {}
            Err(e) => {
                tracing::error!(
                    account_id = %subscription.account_id,
                    month = %month,
                    error = %e,
                    "Failed to create usage tracking row"
                );
            }
        }
    }
}

//! Trial lifecycle
//!
//! Expiry is evaluated lazily wherever status is read. The worker also
//! persists it periodically with [`TrialExpiry::run`].

use outcomesignal_shared::{Subscription, SubscriptionStatus, SubscriptionTier};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::store::AccountStore;

const SECONDS_PER_DAY: i64 = 86_400;

/// Status as of `now`: an active trial past its end reads as expired
pub fn effective_status(subscription: &Subscription, now: OffsetDateTime) -> SubscriptionStatus {
    let trial_over = subscription.trial_ends_at.is_some_and(|end| end <= now);
    if subscription.tier == SubscriptionTier::Trial
        && subscription.status == SubscriptionStatus::Active
        && trial_over
    {
        SubscriptionStatus::Expired
    } else {
        subscription.status
    }
}

/// Whole days left in the trial, rounded up. `None` without a trial end.
pub fn trial_days_remaining(trial_ends_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<i64> {
    let end = trial_ends_at?;
    let remaining = (end - now).whole_seconds();
    if remaining <= 0 {
        return Some(0);
    }
    Some((remaining + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY)
}

/// Short label for the account menu
pub fn format_trial_status(subscription: &Subscription, now: OffsetDateTime) -> Option<String> {
    if subscription.tier != SubscriptionTier::Trial {
        return None;
    }
    let days = trial_days_remaining(subscription.trial_ends_at, now)?;
    let label = match days {
        0 => "Trial expired".to_string(),
        1 => "Trial: 1 day remaining".to_string(),
        n => format!("Trial: {} days remaining", n),
    };
    Some(label)
}

/// Persists trial expiry for all accounts
#[derive(Clone)]
pub struct TrialExpiry {
    store: Arc<dyn AccountStore>,
}

impl TrialExpiry {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Returns the number of subscriptions moved to expired
    pub async fn run(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let expired = self.store.expire_trials(now).await?;
        tracing::info!(
            event = "trials_expired",
            count = expired,
            "Trial expiry sweep complete"
        );
        Ok(expired)
    }
}

//! Monthly usage counters

use outcomesignal_shared::{
    is_unlimited, limits_for, month_key, AccountId, SubscriptionTier, TierLimits, UsageTracking,
};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::store::{AccountStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageRowOutcome {
    Created,
    AlreadyExists,
}

/// Insert a zeroed usage row for (account, month) with the given tier's
/// limits. An existing row is left untouched.
pub async fn ensure_usage_row(
    store: &dyn AccountStore,
    account_id: AccountId,
    limits: &TierLimits,
    month: &str,
) -> StoreResult<UsageRowOutcome> {
    let row = UsageTracking {
        account_id,
        month: month.to_string(),
        credits_used: 0,
        credits_limit: limits.credits_limit,
        initiatives_count: 0,
        initiatives_limit: limits.initiatives_limit,
    };
    match store.insert_usage(&row).await {
        Ok(()) => Ok(UsageRowOutcome::Created),
        Err(e) if e.is_unique_violation() => Ok(UsageRowOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// Usage for one counter, with the unlimited sentinel resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSummary {
    pub used: i32,
    pub limit: i32,
    pub unlimited: bool,
    /// -1 when unlimited
    pub remaining: i32,
    /// 0 when unlimited
    pub percent_used: f64,
}

impl CounterSummary {
    pub fn new(used: i32, limit: i32) -> Self {
        if is_unlimited(limit) {
            return Self {
                used,
                limit,
                unlimited: true,
                remaining: -1,
                percent_used: 0.0,
            };
        }
        let percent_used = if limit > 0 {
            (f64::from(used) / f64::from(limit) * 100.0).min(100.0)
        } else if used > 0 {
            100.0
        } else {
            0.0
        };
        Self {
            used,
            limit,
            unlimited: false,
            remaining: (limit - used).max(0),
            percent_used,
        }
    }

    pub fn is_over_limit(&self) -> bool {
        !self.unlimited && self.used >= self.limit
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub month: String,
    pub initiatives: CounterSummary,
    pub credits: CounterSummary,
}

impl UsageSummary {
    pub fn from_usage(usage: &UsageTracking) -> Self {
        Self {
            month: usage.month.clone(),
            initiatives: CounterSummary::new(usage.initiatives_count, usage.initiatives_limit),
            credits: CounterSummary::new(usage.credits_used, usage.credits_limit),
        }
    }

    /// Summary for an account that has no row yet this month
    pub fn empty(month: &str, limits: &TierLimits) -> Self {
        Self {
            month: month.to_string(),
            initiatives: CounterSummary::new(0, limits.initiatives_limit),
            credits: CounterSummary::new(0, limits.credits_limit),
        }
    }

    pub fn is_over_limit(&self) -> bool {
        self.initiatives.is_over_limit() || self.credits.is_over_limit()
    }
}

/// Outcome of a monthly rollover sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloverReport {
    pub created: usize,
    pub already_present: usize,
    pub errors: usize,
}

/// Reads and mutates monthly usage counters
#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn AccountStore>,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Atomically count one initiative for the month containing `now`.
    ///
    /// Creates the month's row first if it is missing. Returns the new count.
    pub async fn record_initiative(
        &self,
        account_id: AccountId,
        tier: SubscriptionTier,
        now: OffsetDateTime,
    ) -> BillingResult<i32> {
        let month = month_key(now);
        if let Some(count) = self.store.increment_initiatives(account_id, &month).await? {
            return Ok(count);
        }

        ensure_usage_row(self.store.as_ref(), account_id, limits_for(tier), &month).await?;
        self.store
            .increment_initiatives(account_id, &month)
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    account_id = %account_id,
                    month = %month,
                    "Usage row missing after creation"
                );
                BillingError::Storage(crate::store::StoreError::NotFound)
            })
    }

    pub async fn summary(
        &self,
        account_id: AccountId,
        tier: SubscriptionTier,
        now: OffsetDateTime,
    ) -> BillingResult<UsageSummary> {
        let month = month_key(now);
        let summary = match self.store.find_usage(account_id, &month).await? {
            Some(usage) => UsageSummary::from_usage(&usage),
            None => UsageSummary::empty(&month, limits_for(tier)),
        };
        Ok(summary)
    }

    /// Create the month's usage row for every live subscription missing one
    pub async fn roll_over(&self, now: OffsetDateTime) -> BillingResult<RolloverReport> {
        let month = month_key(now);
        let pending = self.store.subscriptions_missing_usage(&month).await?;
        let mut report = RolloverReport::default();

        for subscription in pending {
            let limits = limits_for(subscription.tier);
            match ensure_usage_row(self.store.as_ref(), subscription.account_id, limits, &month)
                .await
            {
                Ok(UsageRowOutcome::Created) => report.created += 1,
                Ok(UsageRowOutcome::AlreadyExists) => report.already_present += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        account_id = %subscription.account_id,
                        month = %month,
                        error = %e,
                        "Failed to roll over usage row"
                    );
                }
            }
        }

        Ok(report)
    }
}

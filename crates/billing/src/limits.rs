//! Usage-limit evaluation
//!
//! All checks return a [`LimitCheckResult`] and never an error. Lookups that
//! cannot complete deny the action, with one exception: the initiative check
//! allows when the account itself cannot be resolved. A user whose webhook
//! has not landed yet must still be able to create their first initiative.

use outcomesignal_shared::{
    is_unlimited, limits_for, month_key, Account, DocumentType, Subscription, SubscriptionStatus,
    SubscriptionTier,
};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::store::AccountStore;
use crate::trials::effective_status;
use crate::usage::UsageMeter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
    LimitReached,
    DocumentTypeRestricted,
    ExportRestricted,
    Unauthorized,
    TrialExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<LimitReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
    pub tier: SubscriptionTier,
}

impl LimitCheckResult {
    fn allow(tier: SubscriptionTier) -> Self {
        Self {
            allowed: true,
            reason: None,
            current_count: None,
            limit: None,
            tier,
        }
    }

    fn deny(reason: LimitReason, tier: SubscriptionTier) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            current_count: None,
            limit: None,
            tier,
        }
    }

    fn unauthorized() -> Self {
        Self::deny(LimitReason::Unauthorized, SubscriptionTier::Trial)
    }

    fn with_counts(mut self, current_count: i32, limit: i32) -> Self {
        self.current_count = Some(current_count);
        self.limit = Some(limit);
        self
    }
}

/// Result of checking and, if allowed, counting one initiative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativeReservation {
    pub check: LimitCheckResult,
    /// New monthly count when the increment ran
    pub new_count: Option<i32>,
}

#[derive(Clone)]
pub struct UsageLimitEvaluator {
    store: Arc<dyn AccountStore>,
    meter: UsageMeter,
}

impl UsageLimitEvaluator {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            meter: UsageMeter::new(store.clone()),
            store,
        }
    }

    pub async fn check_initiative_limit(&self, external_id: &str) -> LimitCheckResult {
        self.check_initiative_limit_at(external_id, OffsetDateTime::now_utc())
            .await
    }

    pub async fn check_initiative_limit_at(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> LimitCheckResult {
        let Some(account) = self.account(external_id).await else {
            tracing::warn!(
                external_id = %external_id,
                "Account lookup failed during initiative check; allowing under the fail-open exception for initiative creation"
            );
            let trial = limits_for(SubscriptionTier::Trial);
            return LimitCheckResult::allow(SubscriptionTier::Trial)
                .with_counts(0, trial.initiatives_limit);
        };
        let Some(subscription) = self.subscription(&account).await else {
            return LimitCheckResult::unauthorized();
        };
        self.evaluate_initiatives(&account, &subscription, now).await
    }

    async fn evaluate_initiatives(
        &self,
        account: &Account,
        subscription: &Subscription,
        now: OffsetDateTime,
    ) -> LimitCheckResult {
        let tier = subscription.tier;
        if effective_status(subscription, now) == SubscriptionStatus::Expired {
            return LimitCheckResult::deny(LimitReason::TrialExpired, tier);
        }

        let tier_limit = limits_for(tier).initiatives_limit;
        if is_unlimited(tier_limit) {
            return LimitCheckResult::allow(tier).with_counts(0, tier_limit);
        }

        let month = month_key(now);
        let usage = match self.store.find_usage(account.id, &month).await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::error!(
                    account_id = %account.id,
                    month = %month,
                    error = %e,
                    "Usage lookup failed, denying initiative creation"
                );
                return LimitCheckResult::unauthorized();
            }
        };

        let Some(usage) = usage else {
            return LimitCheckResult::allow(tier).with_counts(0, tier_limit);
        };

        if is_unlimited(usage.initiatives_limit) {
            return LimitCheckResult::allow(tier)
                .with_counts(usage.initiatives_count, usage.initiatives_limit);
        }

        if usage.initiatives_count < usage.initiatives_limit {
            LimitCheckResult::allow(tier)
                .with_counts(usage.initiatives_count, usage.initiatives_limit)
        } else {
            LimitCheckResult::deny(LimitReason::LimitReached, tier)
                .with_counts(usage.initiatives_count, usage.initiatives_limit)
        }
    }

    pub async fn check_document_generation(
        &self,
        external_id: &str,
        document_type: DocumentType,
    ) -> LimitCheckResult {
        let Some(tier) = self.tier(external_id).await else {
            return LimitCheckResult::unauthorized();
        };
        if limits_for(tier).is_document_type_allowed(document_type) {
            LimitCheckResult::allow(tier)
        } else {
            LimitCheckResult::deny(LimitReason::DocumentTypeRestricted, tier)
        }
    }

    pub async fn check_export(&self, external_id: &str) -> LimitCheckResult {
        let Some(tier) = self.tier(external_id).await else {
            return LimitCheckResult::unauthorized();
        };
        if limits_for(tier).export_enabled {
            LimitCheckResult::allow(tier)
        } else {
            LimitCheckResult::deny(LimitReason::ExportRestricted, tier)
        }
    }

    /// Check the initiative limit and count one initiative when allowed.
    ///
    /// Under the fail-open exception there is no account to charge, so the
    /// reservation is allowed without an increment.
    pub async fn reserve_initiative(
        &self,
        external_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<InitiativeReservation> {
        let Some(account) = self.account(external_id).await else {
            let check = self.check_initiative_limit_at(external_id, now).await;
            return Ok(InitiativeReservation {
                check,
                new_count: None,
            });
        };
        let Some(subscription) = self.subscription(&account).await else {
            return Ok(InitiativeReservation {
                check: LimitCheckResult::unauthorized(),
                new_count: None,
            });
        };

        let check = self.evaluate_initiatives(&account, &subscription, now).await;
        if !check.allowed {
            return Ok(InitiativeReservation {
                check,
                new_count: None,
            });
        }

        let new_count = self
            .meter
            .record_initiative(account.id, subscription.tier, now)
            .await?;
        tracing::info!(
            account_id = %account.id,
            count = new_count,
            "Initiative counted"
        );
        Ok(InitiativeReservation {
            check,
            new_count: Some(new_count),
        })
    }

    async fn account(&self, external_id: &str) -> Option<Account> {
        match self.store.find_account_by_external_id(external_id).await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(external_id = %external_id, error = %e, "Account lookup failed");
                None
            }
        }
    }

    async fn subscription(&self, account: &Account) -> Option<Subscription> {
        match self.store.find_subscription(account.id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(account_id = %account.id, error = %e, "Subscription lookup failed");
                None
            }
        }
    }

    async fn tier(&self, external_id: &str) -> Option<SubscriptionTier> {
        let account = self.account(external_id).await?;
        let subscription = self.subscription(&account).await?;
        Some(subscription.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::SubscriptionBootstrapper;
    use crate::store::MemoryStore;
    use outcomesignal_shared::{AccountProfile, NewAccount, UsageTracking, UNLIMITED};
    use time::macros::datetime;

    async fn seeded(tier: SubscriptionTier) -> (Arc<MemoryStore>, Account) {
        let store = Arc::new(MemoryStore::new());
        let account = store
            .insert_account(&NewAccount {
                external_id: "user_1".to_string(),
                profile: AccountProfile {
                    email: "a@example.com".to_string(),
                    ..Default::default()
                },
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
        let result = SubscriptionBootstrapper::new(store.clone())
            .ensure_trial(account.id)
            .await
            .unwrap();
        if tier != SubscriptionTier::Trial {
            let mut sub = result.subscription;
            sub.tier = tier;
            sub.trial_ends_at = None;
            store.put_subscription(sub).await;
        }
        (store, account)
    }

    #[test]
    fn test_serialized_shape() {
        let denied = LimitCheckResult::deny(LimitReason::LimitReached, SubscriptionTier::Trial)
            .with_counts(1, 1);
        assert_eq!(
            serde_json::to_value(&denied).unwrap(),
            serde_json::json!({
                "allowed": false,
                "reason": "limit_reached",
                "currentCount": 1,
                "limit": 1,
                "tier": "trial"
            })
        );

        let allowed = LimitCheckResult::allow(SubscriptionTier::Trial);
        assert_eq!(
            serde_json::to_value(&allowed).unwrap(),
            serde_json::json!({"allowed": true, "tier": "trial"})
        );
    }

    #[tokio::test]
    async fn test_limit_boundary() {
        let (store, account) = seeded(SubscriptionTier::Starter).await;
        let evaluator = UsageLimitEvaluator::new(store.clone());
        let now = OffsetDateTime::now_utc();
        let month = month_key(now);

        store
            .put_usage(UsageTracking {
                account_id: account.id,
                month: month.clone(),
                credits_used: 0,
                credits_limit: 25,
                initiatives_count: 2,
                initiatives_limit: 3,
            })
            .await;
        let below = evaluator.check_initiative_limit_at("user_1", now).await;
        assert!(below.allowed, "count == limit - 1 should be allowed");

        store
            .put_usage(UsageTracking {
                account_id: account.id,
                month,
                credits_used: 0,
                credits_limit: 25,
                initiatives_count: 3,
                initiatives_limit: 3,
            })
            .await;
        let at = evaluator.check_initiative_limit_at("user_1", now).await;
        assert!(!at.allowed);
        assert_eq!(at.reason, Some(LimitReason::LimitReached));
        assert_eq!(at.current_count, Some(3));
        assert_eq!(at.limit, Some(3));
    }

    #[tokio::test]
    async fn test_unlimited_row_short_circuits() {
        let (store, account) = seeded(SubscriptionTier::Starter).await;
        let now = OffsetDateTime::now_utc();
        store
            .put_usage(UsageTracking {
                account_id: account.id,
                month: month_key(now),
                credits_used: 0,
                credits_limit: UNLIMITED,
                initiatives_count: 10_000,
                initiatives_limit: UNLIMITED,
            })
            .await;

        let result = UsageLimitEvaluator::new(store)
            .check_initiative_limit_at("user_1", now)
            .await;
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_unknown_account_fails_open_for_initiatives_only() {
        let store = Arc::new(MemoryStore::new());
        let evaluator = UsageLimitEvaluator::new(store);

        let initiative = evaluator.check_initiative_limit("user_ghost").await;
        assert!(initiative.allowed);
        assert_eq!(initiative.tier, SubscriptionTier::Trial);
        assert_eq!(initiative.current_count, Some(0));
        assert_eq!(initiative.limit, Some(1));

        let doc = evaluator
            .check_document_generation("user_ghost", DocumentType::Brief)
            .await;
        assert_eq!(doc.reason, Some(LimitReason::Unauthorized));
        let export = evaluator.check_export("user_ghost").await;
        assert_eq!(export.reason, Some(LimitReason::Unauthorized));
    }

    #[tokio::test]
    async fn test_expired_trial_denies_initiatives() {
        let (store, _) = seeded(SubscriptionTier::Trial).await;
        let evaluator = UsageLimitEvaluator::new(store);
        let later = OffsetDateTime::now_utc() + time::Duration::days(8);

        let result = evaluator.check_initiative_limit_at("user_1", later).await;
        assert!(!result.allowed);
        assert_eq!(result.reason, Some(LimitReason::TrialExpired));
    }

    #[tokio::test]
    async fn test_reserve_counts_until_limit() {
        let (store, account) = seeded(SubscriptionTier::Trial).await;
        let evaluator = UsageLimitEvaluator::new(store.clone());
        let now = OffsetDateTime::now_utc();

        let first = evaluator.reserve_initiative("user_1", now).await.unwrap();
        assert!(first.check.allowed);
        assert_eq!(first.new_count, Some(1));

        let second = evaluator.reserve_initiative("user_1", now).await.unwrap();
        assert!(!second.check.allowed);
        assert_eq!(second.check.reason, Some(LimitReason::LimitReached));
        assert_eq!(second.new_count, None);

        let rows = store.usage_rows(account.id).await;
        assert_eq!(rows[0].initiatives_count, 1);
    }

    #[tokio::test]
    async fn test_month_rollover_resets_initiatives() {
        let (store, account) = seeded(SubscriptionTier::Starter).await;
        let evaluator = UsageLimitEvaluator::new(store.clone());
        store
            .put_usage(UsageTracking {
                account_id: account.id,
                month: "2025-01".to_string(),
                credits_used: 0,
                credits_limit: 25,
                initiatives_count: 3,
                initiatives_limit: 3,
            })
            .await;

        let jan = evaluator
            .check_initiative_limit_at("user_1", datetime!(2025-01-31 23:59 UTC))
            .await;
        assert!(!jan.allowed);
        let feb = evaluator
            .check_initiative_limit_at("user_1", datetime!(2025-02-01 00:00 UTC))
            .await;
        assert!(feb.allowed);
        assert_eq!(feb.current_count, Some(0));
    }
}

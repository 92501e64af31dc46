// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Account Provisioning and Limits
//!
//! Tests critical boundary conditions and race conditions in:
//! - Provisioning (duplicate deliveries, webhook vs resolver races)
//! - Subscription bootstrap (concurrent invocations)
//! - Limit evaluation (sentinels, boundaries, missing rows, store failures)

#[cfg(test)]
mod provisioning_race_tests {
    use crate::provisioning::{AccountProvisioner, ProvisionOutcome};
    use crate::resolver::{AccountResolver, IdentityProfile, IdentityProvider, RetrySchedule};
    use crate::store::MemoryStore;
    use crate::webhooks::{EmailAddress, UserCreatedData};
    use crate::BillingResult;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    struct FixedIdentity;

    #[async_trait]
    impl IdentityProvider for FixedIdentity {
        async fn fetch_user(&self, external_id: &str) -> BillingResult<IdentityProfile> {
            Ok(IdentityProfile {
                id: external_id.to_string(),
                email_addresses: vec![EmailAddress {
                    id: Some("idn_1".to_string()),
                    email_address: "race@example.com".to_string(),
                }],
                primary_email_address_id: Some("idn_1".to_string()),
                first_name: Some("Race".to_string()),
                last_name: None,
                image_url: None,
            })
        }
    }

    fn user_created(id: &str) -> UserCreatedData {
        UserCreatedData {
            id: Some(id.to_string()),
            email_addresses: vec![EmailAddress {
                id: Some("idn_1".to_string()),
                email_address: "race@example.com".to_string(),
            }],
            first_name: Some("Race".to_string()),
            last_name: None,
            image_url: None,
            created_at: None,
        }
    }

    // =========================================================================
    // Same event delivered concurrently 8 times - exactly one row, one Created
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_duplicate_deliveries_converge() {
        let store = Arc::new(MemoryStore::new());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let provisioner = AccountProvisioner::new(store.clone());
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                provisioner.provision(&user_created("user_dup")).await
            }));
        }

        let outcomes: Vec<ProvisionOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|h| h.unwrap().unwrap())
            .collect();

        let created = outcomes.iter().filter(|o| o.is_created()).count();
        assert_eq!(created, 1, "Exactly one delivery should create the row");
        assert!(outcomes
            .iter()
            .all(|o| !matches!(o, ProvisionOutcome::DuplicateUpdated(_))));
        let id = outcomes[0].account().id;
        assert!(outcomes.iter().all(|o| o.account().id == id));
        assert_eq!(store.account_count().await, 1);
    }

    // =========================================================================
    // Webhook and resolver fallback race for a brand-new user
    // =========================================================================
    #[tokio::test]
    async fn test_webhook_and_resolver_fallback_converge() {
        for _ in 0..20 {
            let store = Arc::new(MemoryStore::new());
            let barrier = Arc::new(Barrier::new(2));

            let webhook_store = store.clone();
            let webhook_barrier = barrier.clone();
            let webhook = tokio::spawn(async move {
                webhook_barrier.wait().await;
                AccountProvisioner::new(webhook_store)
                    .provision(&user_created("user_race"))
                    .await
            });

            let resolver = AccountResolver::new(store.clone(), Arc::new(FixedIdentity))
                .with_schedule(RetrySchedule::from_millis(&[0]));
            let resolver_barrier = barrier.clone();
            let sync_path = tokio::spawn(async move {
                resolver_barrier.wait().await;
                resolver.resolve("user_race").await
            });

            let from_webhook = webhook.await.unwrap().unwrap();
            let from_resolver = sync_path.await.unwrap().unwrap();
            assert_eq!(from_webhook.account().id, from_resolver.id);
            assert_eq!(store.account_count().await, 1);
        }
    }
}

#[cfg(test)]
mod bootstrap_race_tests {
    use crate::bootstrap::SubscriptionBootstrapper;
    use crate::store::MemoryStore;
    use outcomesignal_shared::AccountId;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    // =========================================================================
    // Two bootstrap calls race - one subscription, one usage row, no errors
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_bootstrap_single_subscription() {
        let store = Arc::new(MemoryStore::new());
        let account_id = AccountId::new();
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let bootstrapper = SubscriptionBootstrapper::new(store.clone());
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                bootstrapper.ensure_trial(account_id).await
            }));
        }

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|h| h.unwrap().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_new).count(), 1);
        let id = results[0].subscription.id;
        assert!(results.iter().all(|r| r.subscription.id == id));
        assert_eq!(store.subscription_count().await, 1);
        assert_eq!(store.usage_rows(account_id).await.len(), 1);
    }
}

#[cfg(test)]
mod limit_tests {
    use crate::bootstrap::SubscriptionBootstrapper;
    use crate::limits::{LimitReason, UsageLimitEvaluator};
    use crate::store::{AccountStore, MemoryStore, StoreError, StoreOp};
    use outcomesignal_shared::{
        month_key, AccountProfile, DocumentType, NewAccount, SubscriptionTier, UsageTracking,
    };
    use std::sync::Arc;
    use time::OffsetDateTime;

    async fn trial_user(store: &Arc<MemoryStore>, external_id: &str) -> outcomesignal_shared::Account {
        let account = store
            .insert_account(&NewAccount {
                external_id: external_id.to_string(),
                profile: AccountProfile {
                    email: format!("{}@example.com", external_id),
                    ..Default::default()
                },
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
        SubscriptionBootstrapper::new(store.clone())
            .ensure_trial(account.id)
            .await
            .unwrap();
        account
    }

    // =========================================================================
    // Trial at limit 1 with count 1 is denied with counts
    // =========================================================================
    #[tokio::test]
    async fn test_trial_initiative_limit_reached() {
        let store = Arc::new(MemoryStore::new());
        let account = trial_user(&store, "user_t").await;
        store
            .increment_initiatives(account.id, &month_key(OffsetDateTime::now_utc()))
            .await
            .unwrap();

        let result = UsageLimitEvaluator::new(store)
            .check_initiative_limit("user_t")
            .await;
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "allowed": false,
                "reason": "limit_reached",
                "currentCount": 1,
                "limit": 1,
                "tier": "trial"
            })
        );
    }

    // =========================================================================
    // Trial document gating: prd denied, brief allowed
    // =========================================================================
    #[tokio::test]
    async fn test_trial_document_types() {
        let store = Arc::new(MemoryStore::new());
        trial_user(&store, "user_d").await;
        let evaluator = UsageLimitEvaluator::new(store);

        let prd = evaluator
            .check_document_generation("user_d", DocumentType::Prd)
            .await;
        assert_eq!(
            serde_json::to_value(&prd).unwrap(),
            serde_json::json!({
                "allowed": false,
                "reason": "document_type_restricted",
                "tier": "trial"
            })
        );

        let brief = evaluator
            .check_document_generation("user_d", DocumentType::Brief)
            .await;
        assert_eq!(
            serde_json::to_value(&brief).unwrap(),
            serde_json::json!({"allowed": true, "tier": "trial"})
        );

        let export = evaluator.check_export("user_d").await;
        assert_eq!(export.reason, Some(LimitReason::ExportRestricted));
    }

    // =========================================================================
    // Missing usage row is treated as zero usage
    // =========================================================================
    #[tokio::test]
    async fn test_missing_usage_row_allows() {
        let store = Arc::new(MemoryStore::new());
        store
            .fail_next(StoreOp::InsertUsage, StoreError::Database("down".to_string()))
            .await;
        let account = trial_user(&store, "user_m").await;
        assert!(store.usage_rows(account.id).await.is_empty());

        let result = UsageLimitEvaluator::new(store)
            .check_initiative_limit("user_m")
            .await;
        assert!(result.allowed);
        assert_eq!(result.current_count, Some(0));
        assert_eq!(result.limit, Some(1));
    }

    // =========================================================================
    // Unreadable usage row denies (fail closed)
    // =========================================================================
    #[tokio::test]
    async fn test_usage_read_failure_denies() {
        let store = Arc::new(MemoryStore::new());
        trial_user(&store, "user_f").await;
        store
            .fail_next(StoreOp::FindUsage, StoreError::Database("timeout".to_string()))
            .await;

        let result = UsageLimitEvaluator::new(store)
            .check_initiative_limit("user_f")
            .await;
        assert!(!result.allowed);
        assert_eq!(result.reason, Some(LimitReason::Unauthorized));
    }

    // =========================================================================
    // Store failure on account lookup: initiatives open, others closed
    // =========================================================================
    #[tokio::test]
    async fn test_account_lookup_failure_asymmetry() {
        let store = Arc::new(MemoryStore::new());
        trial_user(&store, "user_a").await;
        let evaluator = UsageLimitEvaluator::new(store.clone());

        store
            .fail_next(StoreOp::FindAccount, StoreError::Database("reset".to_string()))
            .await;
        assert!(evaluator.check_initiative_limit("user_a").await.allowed);

        store
            .fail_next(StoreOp::FindAccount, StoreError::Database("reset".to_string()))
            .await;
        let export = evaluator.check_export("user_a").await;
        assert_eq!(export.reason, Some(LimitReason::Unauthorized));
    }

    // =========================================================================
    // Account without subscription is unauthorized for every check
    // =========================================================================
    #[tokio::test]
    async fn test_no_subscription_denies() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(&NewAccount {
                external_id: "user_n".to_string(),
                profile: AccountProfile {
                    email: "n@example.com".to_string(),
                    ..Default::default()
                },
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
        let evaluator = UsageLimitEvaluator::new(store);

        let result = evaluator.check_initiative_limit("user_n").await;
        assert!(!result.allowed);
        assert_eq!(result.reason, Some(LimitReason::Unauthorized));
    }

    // =========================================================================
    // Enterprise with enormous usage still allowed
    // =========================================================================
    #[tokio::test]
    async fn test_enterprise_sentinel() {
        let store = Arc::new(MemoryStore::new());
        let account = trial_user(&store, "user_e").await;
        let mut sub = store.find_subscription(account.id).await.unwrap().unwrap();
        sub.tier = SubscriptionTier::Enterprise;
        sub.trial_ends_at = None;
        store.put_subscription(sub).await;
        store
            .put_usage(UsageTracking {
                account_id: account.id,
                month: month_key(OffsetDateTime::now_utc()),
                credits_used: 10_000,
                credits_limit: -1,
                initiatives_count: 10_000,
                initiatives_limit: -1,
            })
            .await;

        let evaluator = UsageLimitEvaluator::new(store);
        let result = evaluator.check_initiative_limit("user_e").await;
        assert!(result.allowed);
        assert_eq!(result.tier, SubscriptionTier::Enterprise);
        assert!(evaluator.check_export("user_e").await.allowed);
    }
}

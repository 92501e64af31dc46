//! Account provisioning from identity events
//!
//! Provisioning is insert-first: the unique constraint on the external id is
//! the only coordination between the webhook and the synchronous resolver.
//! A unique violation moves into [`reconcile`], which decides between a no-op
//! and a profile update.

use outcomesignal_shared::{Account, AccountProfile, NewAccount};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::store::AccountStore;
use crate::webhooks::UserCreatedData;

/// Terminal states of an insert-then-reconcile attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// No row existed; this call created it
    Created(Account),
    /// A row existed with identical profile fields
    DuplicateMatched(Account),
    /// A row existed and its profile was overwritten with the incoming values
    DuplicateUpdated(Account),
}

impl ProvisionOutcome {
    pub fn account(&self) -> &Account {
        match self {
            ProvisionOutcome::Created(a)
            | ProvisionOutcome::DuplicateMatched(a)
            | ProvisionOutcome::DuplicateUpdated(a) => a,
        }
    }

    pub fn into_account(self) -> Account {
        match self {
            ProvisionOutcome::Created(a)
            | ProvisionOutcome::DuplicateMatched(a)
            | ProvisionOutcome::DuplicateUpdated(a) => a,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ProvisionOutcome::Created(_))
    }
}

/// What to do with an existing row after a unique violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Keep,
    Update(AccountProfile),
}

/// Compare the stored profile with an incoming one
pub fn reconcile(existing: &Account, incoming: &AccountProfile) -> ReconcileAction {
    if existing.profile() == *incoming {
        ReconcileAction::Keep
    } else {
        ReconcileAction::Update(incoming.clone())
    }
}

/// Empty display fields are stored as absent
pub(crate) fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Validate a `user.created` payload into an insertable account.
///
/// Checks run in order: user id, email list, primary email.
pub fn account_from_event(data: &UserCreatedData) -> BillingResult<NewAccount> {
    let external_id = data
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BillingError::MalformedPayload("missing user ID".to_string()))?;

    let primary = data
        .email_addresses
        .first()
        .ok_or_else(|| BillingError::MalformedPayload("missing email address".to_string()))?;

    let email = primary.email_address.trim();
    if email.is_empty() {
        return Err(BillingError::MalformedPayload(
            "missing primary email".to_string(),
        ));
    }

    let created_at = data
        .created_at
        .and_then(|ms| {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
        })
        .unwrap_or_else(OffsetDateTime::now_utc);

    Ok(NewAccount {
        external_id: external_id.to_string(),
        profile: AccountProfile {
            email: email.to_string(),
            first_name: non_empty(&data.first_name),
            last_name: non_empty(&data.last_name),
            avatar_url: non_empty(&data.image_url),
        },
        created_at,
    })
}

#[derive(Clone)]
pub struct AccountProvisioner {
    store: Arc<dyn AccountStore>,
}

impl AccountProvisioner {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Provision the account described by a verified `user.created` event
    pub async fn provision(&self, data: &UserCreatedData) -> BillingResult<ProvisionOutcome> {
        let new = account_from_event(data)?;
        self.insert_or_reconcile(&new).await
    }

    /// Insert the account, falling back to compare-and-reconcile when another
    /// writer already created it.
    pub async fn insert_or_reconcile(&self, new: &NewAccount) -> BillingResult<ProvisionOutcome> {
        match self.store.insert_account(new).await {
            Ok(account) => {
                tracing::info!(
                    account_id = %account.id,
                    external_id = %account.external_id,
                    "Account created"
                );
                Ok(ProvisionOutcome::Created(account))
            }
            Err(e) if e.is_unique_violation() => {
                tracing::info!(
                    external_id = %new.external_id,
                    "Account already exists, reconciling"
                );
                self.reconcile_existing(new).await
            }
            Err(e) => {
                tracing::error!(
                    external_id = %new.external_id,
                    error = %e,
                    "Failed to insert account"
                );
                Err(e.into())
            }
        }
    }

    async fn reconcile_existing(&self, new: &NewAccount) -> BillingResult<ProvisionOutcome> {
        let existing = self
            .store
            .find_account_by_external_id(&new.external_id)
            .await?
            .ok_or_else(|| {
                // Unique violation without a visible row: the winner's transaction
                // is not visible yet, let the sender retry.
                tracing::error!(
                    external_id = %new.external_id,
                    "Unique violation but existing account not found"
                );
                BillingError::AccountNotFound(new.external_id.clone())
            })?;

        match reconcile(&existing, &new.profile) {
            ReconcileAction::Keep => {
                tracing::info!(
                    account_id = %existing.id,
                    external_id = %existing.external_id,
                    "Duplicate account event, profile unchanged (idempotent)"
                );
                Ok(ProvisionOutcome::DuplicateMatched(existing))
            }
            ReconcileAction::Update(profile) => {
                let updated = self
                    .store
                    .update_account_profile(existing.id, &profile)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            account_id = %existing.id,
                            error = %e,
                            "Failed to update account profile"
                        );
                        BillingError::from(e)
                    })?;
                tracing::info!(
                    account_id = %updated.id,
                    external_id = %updated.external_id,
                    "Duplicate account event, profile updated"
                );
                Ok(ProvisionOutcome::DuplicateUpdated(updated))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoreOp};
    use crate::webhooks::EmailAddress;
    use outcomesignal_shared::AccountId;

    fn event(id: &str, email: &str) -> UserCreatedData {
        UserCreatedData {
            id: Some(id.to_string()),
            email_addresses: vec![EmailAddress {
                id: Some("idn_1".to_string()),
                email_address: email.to_string(),
            }],
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            image_url: None,
            created_at: Some(1_700_000_000_000),
        }
    }

    fn account(email: &str) -> Account {
        let now = OffsetDateTime::now_utc();
        Account {
            id: AccountId::new(),
            external_id: "user_1".to_string(),
            email: email.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reconcile_keeps_identical_profile() {
        let existing = account("a@example.com");
        assert_eq!(reconcile(&existing, &existing.profile()), ReconcileAction::Keep);
    }

    #[test]
    fn test_reconcile_updates_on_any_field_drift() {
        let existing = account("a@example.com");

        let mut incoming = existing.profile();
        incoming.email = "b@example.com".to_string();
        assert_eq!(
            reconcile(&existing, &incoming),
            ReconcileAction::Update(incoming.clone())
        );

        let mut incoming = existing.profile();
        incoming.avatar_url = Some("https://img.example.com/a.png".to_string());
        assert!(matches!(
            reconcile(&existing, &incoming),
            ReconcileAction::Update(_)
        ));

        let mut incoming = existing.profile();
        incoming.last_name = None;
        assert!(matches!(
            reconcile(&existing, &incoming),
            ReconcileAction::Update(_)
        ));
    }

    #[test]
    fn test_validation_order() {
        let mut data = event("", "a@example.com");
        data.email_addresses.clear();
        let err = account_from_event(&data).unwrap_err();
        assert!(err.to_string().contains("missing user ID"));

        let mut data = event("user_1", "a@example.com");
        data.email_addresses.clear();
        let err = account_from_event(&data).unwrap_err();
        assert!(err.to_string().contains("missing email address"));

        let data = event("user_1", "  ");
        let err = account_from_event(&data).unwrap_err();
        assert!(err.to_string().contains("missing primary email"));
    }

    #[test]
    fn test_created_at_from_millis() {
        let new = account_from_event(&event("user_1", "a@example.com")).unwrap();
        assert_eq!(new.created_at.unix_timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_provision_three_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let provisioner = AccountProvisioner::new(store.clone());

        let first = provisioner
            .provision(&event("user_1", "a@example.com"))
            .await
            .unwrap();
        assert!(first.is_created());

        let second = provisioner
            .provision(&event("user_1", "a@example.com"))
            .await
            .unwrap();
        assert!(matches!(second, ProvisionOutcome::DuplicateMatched(_)));
        assert_eq!(second.account().id, first.account().id);

        let third = provisioner
            .provision(&event("user_1", "new@example.com"))
            .await
            .unwrap();
        match third {
            ProvisionOutcome::DuplicateUpdated(a) => {
                assert_eq!(a.id, first.account().id);
                assert_eq!(a.email, "new@example.com");
            }
            other => panic!("expected update, got {:?}", other),
        }

        assert_eq!(store.account_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_display_fields_match_absent_ones() {
        let mut blank = event("user_1", "a@example.com");
        blank.first_name = Some(String::new());
        blank.last_name = Some("  ".to_string());
        blank.image_url = Some(String::new());

        let new = account_from_event(&blank).unwrap();
        assert_eq!(new.profile.first_name, None);
        assert_eq!(new.profile.last_name, None);
        assert_eq!(new.profile.avatar_url, None);

        let store = Arc::new(MemoryStore::new());
        let provisioner = AccountProvisioner::new(store.clone());
        provisioner.provision(&blank).await.unwrap();

        let mut absent = event("user_1", "a@example.com");
        absent.first_name = None;
        absent.last_name = None;
        absent.image_url = None;
        let outcome = provisioner.provision(&absent).await.unwrap();
        assert!(matches!(outcome, ProvisionOutcome::DuplicateMatched(_)));
        assert_eq!(store.call_count(StoreOp::UpdateAccount).await, 0);
    }

    #[tokio::test]
    async fn test_non_unique_insert_error_is_storage() {
        let store = Arc::new(MemoryStore::new());
        store
            .fail_next(
                StoreOp::InsertAccount,
                StoreError::Database("connection reset".to_string()),
            )
            .await;
        let provisioner = AccountProvisioner::new(store.clone());

        let err = provisioner
            .provision(&event("user_1", "a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Storage(_)));
        assert_eq!(store.account_count().await, 0);
    }
}

//! Synchronous account resolution
//!
//! A user can reach the dashboard before the identity webhook has created
//! their account. The resolver polls for the row with backoff, then creates
//! it from the identity provider's profile. If the webhook wins that race the
//! unique constraint routes the insert into reconciliation.

use async_trait::async_trait;
use outcomesignal_shared::{Account, AccountProfile, NewAccount};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_retry::Retry;

use crate::error::{BillingError, BillingResult};
use crate::provisioning::{non_empty, AccountProvisioner};
use crate::store::AccountStore;
use crate::webhooks::EmailAddress;

pub const DEFAULT_IDENTITY_API_URL: &str = "https://api.clerk.com";

/// Default polling delays in milliseconds
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 5] = [500, 1000, 2000, 3000, 4000];

/// Default upper bound on a single resolve call
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Identity provider
// =============================================================================

/// User profile as returned by the identity provider's user API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityProfile {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl IdentityProfile {
    /// The provider-designated primary email, else the first on file
    pub fn primary_email(&self) -> Option<&str> {
        let designated = self.primary_email_address_id.as_deref().and_then(|primary| {
            self.email_addresses
                .iter()
                .find(|e| e.id.as_deref() == Some(primary))
        });
        designated
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.trim())
            .filter(|e| !e.is_empty())
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_user(&self, external_id: &str) -> BillingResult<IdentityProfile>;
}

/// HTTP client for the Clerk backend API
#[derive(Clone)]
pub struct ClerkClient {
    http: Client,
    api_url: String,
    secret_key: Option<String>,
}

impl ClerkClient {
    pub fn new(http: Client, api_url: impl Into<String>, secret_key: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.filter(|k| !k.is_empty()),
        }
    }
}

#[async_trait]
impl IdentityProvider for ClerkClient {
    async fn fetch_user(&self, external_id: &str) -> BillingResult<IdentityProfile> {
        let secret_key = self.secret_key.as_deref().ok_or_else(|| {
            tracing::error!("CLERK_SECRET_KEY not configured, cannot fetch identity profile");
            BillingError::IdentityProvider("secret key not configured".to_string())
        })?;

        let url = format!("{}/v1/users/{}", self.api_url, external_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(secret_key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(external_id = %external_id, error = %e, "Identity provider request failed");
                BillingError::IdentityProvider(e.to_string())
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(BillingError::IdentityProvider(format!(
                    "user {} not found",
                    external_id
                )));
            }
            status => {
                tracing::warn!(
                    external_id = %external_id,
                    status = %status,
                    "Identity provider returned an error status"
                );
                return Err(BillingError::IdentityProvider(format!(
                    "unexpected status {}",
                    status
                )));
            }
        }

        response.json::<IdentityProfile>().await.map_err(|e| {
            BillingError::IdentityProvider(format!("invalid user payload: {}", e))
        })
    }
}

// =============================================================================
// Retry schedule
// =============================================================================

/// Delays between lookup attempts. One attempt per entry; the sleep after the
/// last attempt is never taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RETRY_DELAYS_MS)
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().map(|ms| Duration::from_millis(*ms)).collect())
    }

    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    /// Sleeps taken between attempts
    fn between_attempts(&self) -> impl Iterator<Item = Duration> + '_ {
        self.delays
            .iter()
            .copied()
            .take(self.attempts().saturating_sub(1))
    }
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Debug)]
struct NotYetProvisioned;

#[derive(Clone)]
pub struct AccountResolver {
    store: Arc<dyn AccountStore>,
    provisioner: AccountProvisioner,
    identity: Arc<dyn IdentityProvider>,
    schedule: RetrySchedule,
    timeout: Duration,
}

impl AccountResolver {
    pub fn new(store: Arc<dyn AccountStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provisioner: AccountProvisioner::new(store.clone()),
            store,
            identity,
            schedule: RetrySchedule::default(),
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    pub fn with_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve using the configured timeout
    pub async fn resolve(&self, external_id: &str) -> BillingResult<Account> {
        self.resolve_until(external_id, Instant::now() + self.timeout)
            .await
    }

    /// Resolve, giving up with `DeadlineExceeded` at `deadline`. Dropping the
    /// returned future cancels any in-progress backoff sleep.
    pub async fn resolve_until(&self, external_id: &str, deadline: Instant) -> BillingResult<Account> {
        match tokio::time::timeout_at(deadline, self.resolve_inner(external_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(external_id = %external_id, "Account resolution deadline exceeded");
                Err(BillingError::DeadlineExceeded)
            }
        }
    }

    async fn resolve_inner(&self, external_id: &str) -> BillingResult<Account> {
        if let Ok(account) = self.poll(external_id).await {
            return Ok(account);
        }

        tracing::info!(
            external_id = %external_id,
            attempts = self.schedule.attempts(),
            "Account not provisioned by webhook, creating from identity profile"
        );
        self.create_from_identity(external_id).await
    }

    async fn poll(&self, external_id: &str) -> Result<Account, NotYetProvisioned> {
        let store = self.store.clone();
        Retry::spawn(self.schedule.between_attempts(), || {
            let store = store.clone();
            async move {
                match store.find_account_by_external_id(external_id).await {
                    Ok(Some(account)) => Ok(account),
                    Ok(None) => Err(NotYetProvisioned),
                    Err(e) => {
                        tracing::warn!(external_id = %external_id, error = %e, "Account lookup failed");
                        Err(NotYetProvisioned)
                    }
                }
            }
        })
        .await
    }

    async fn create_from_identity(&self, external_id: &str) -> BillingResult<Account> {
        let profile = self.identity.fetch_user(external_id).await?;

        let Some(email) = profile.primary_email() else {
            tracing::error!(external_id = %external_id, "Identity profile has no email address");
            return Err(BillingError::NoEmailAddress(external_id.to_string()));
        };

        let new = NewAccount {
            external_id: external_id.to_string(),
            profile: AccountProfile {
                email: email.to_string(),
                first_name: non_empty(&profile.first_name),
                last_name: non_empty(&profile.last_name),
                avatar_url: non_empty(&profile.image_url),
            },
            created_at: OffsetDateTime::now_utc(),
        };

        let outcome = self.provisioner.insert_or_reconcile(&new).await?;
        Ok(outcome.into_account())
    }
}

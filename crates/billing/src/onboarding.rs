//! "Ensure subscription" entry point for authenticated request paths

use outcomesignal_shared::Subscription;

use crate::bootstrap::SubscriptionBootstrapper;
use crate::error::BillingResult;
use crate::resolver::AccountResolver;

#[derive(Clone)]
pub struct Onboarding {
    resolver: AccountResolver,
    bootstrapper: SubscriptionBootstrapper,
}

impl Onboarding {
    pub fn new(resolver: AccountResolver, bootstrapper: SubscriptionBootstrapper) -> Self {
        Self {
            resolver,
            bootstrapper,
        }
    }

    pub fn resolver(&self) -> &AccountResolver {
        &self.resolver
    }

    /// Resolve the account and make sure it has a subscription.
    ///
    /// Never fails: any error is logged and reported as `None`, which callers
    /// surface as "account setup failed".
    pub async fn ensure_subscription(&self, external_id: &str) -> Option<Subscription> {
        match self.try_ensure_subscription(external_id).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::error!(
                    external_id = %external_id,
                    error = %e,
                    category = ?e.category(),
                    "Account setup failed"
                );
                None
            }
        }
    }

    async fn try_ensure_subscription(&self, external_id: &str) -> BillingResult<Subscription> {
        let account = self.resolver.resolve(external_id).await?;
        let result = self.bootstrapper.ensure_trial(account.id).await?;
        if result.is_new {
            tracing::info!(
                account_id = %account.id,
                external_id = %external_id,
                "Trial started from dashboard path"
            );
        }
        Ok(result.subscription)
    }
}

//! Application state

use std::sync::Arc;

use outcomesignal_billing::{
    AccountProvisioner, AccountResolver, AccountStore, IdentityProvider, Onboarding,
    RetrySchedule, SubscriptionBootstrapper, UsageLimitEvaluator, UsageMeter, WebhookVerifier,
};

use crate::{
    auth::AuthState,
    config::{Config, ConfigError},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AccountStore>,
    pub auth: AuthState,
    pub webhook_verifier: WebhookVerifier,
    pub provisioner: AccountProvisioner,
    pub bootstrapper: SubscriptionBootstrapper,
    pub onboarding: Onboarding,
    pub limits: UsageLimitEvaluator,
    pub usage: UsageMeter,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn AccountStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        let auth = AuthState::from_config(&config)?;
        Ok(Self::with_auth(config, store, identity, auth))
    }

    /// Build with an explicit auth state
    pub fn with_auth(
        config: Config,
        store: Arc<dyn AccountStore>,
        identity: Arc<dyn IdentityProvider>,
        auth: AuthState,
    ) -> Self {
        let webhook_verifier = WebhookVerifier::new(config.clerk_webhook_secret.clone())
            .with_tolerance_secs(config.webhook_tolerance_secs);
        if !webhook_verifier.is_configured() {
            tracing::error!("CLERK_WEBHOOK_SECRET not set; identity webhooks will be rejected with 500");
        }

        let bootstrapper = SubscriptionBootstrapper::new(store.clone());
        let resolver = AccountResolver::new(store.clone(), identity)
            .with_schedule(RetrySchedule::from_millis(&config.resolver_delays_ms))
            .with_timeout(config.resolver_timeout);

        Self {
            auth,
            webhook_verifier,
            provisioner: AccountProvisioner::new(store.clone()),
            onboarding: Onboarding::new(resolver, bootstrapper.clone()),
            bootstrapper,
            limits: UsageLimitEvaluator::new(store.clone()),
            usage: UsageMeter::new(store.clone()),
            store,
            config,
        }
    }
}

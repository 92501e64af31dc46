// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! OutcomeSignal Billing Module
//!
//! Account provisioning and subscription-limit enforcement.
//!
//! ## Features
//!
//! - **Webhooks**: Verify signed identity-provider events
//! - **Provisioning**: Idempotent insert-then-reconcile of account rows
//! - **Bootstrap**: Trial subscription and first usage row, race tolerant
//! - **Resolver**: Poll-then-create account lookup for synchronous paths
//! - **Limits**: Tier-scoped initiative, document type and export checks
//! - **Usage**: Monthly counters, summaries and rollover
//! - **Trials**: Lazy and batch trial expiry

pub mod bootstrap;
pub mod error;
pub mod limits;
pub mod onboarding;
pub mod provisioning;
pub mod resolver;
pub mod store;
pub mod trials;
pub mod usage;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Bootstrap
pub use bootstrap::{BootstrapResult, SubscriptionBootstrapper};

// Error
pub use error::{BillingError, BillingResult, ErrorCategory};

// Limits
pub use limits::{InitiativeReservation, LimitCheckResult, LimitReason, UsageLimitEvaluator};

// Onboarding
pub use onboarding::Onboarding;

// Provisioning
pub use provisioning::{account_from_event, reconcile, AccountProvisioner, ProvisionOutcome, ReconcileAction};

// Resolver
pub use resolver::{
    AccountResolver, ClerkClient, IdentityProfile, IdentityProvider, RetrySchedule,
    DEFAULT_IDENTITY_API_URL, DEFAULT_RESOLVE_TIMEOUT, DEFAULT_RETRY_DELAYS_MS,
};

// Store
pub use store::{AccountStore, MemoryStore, PgStore, StoreError, StoreOp, StoreResult};

// Trials
pub use trials::{effective_status, format_trial_status, trial_days_remaining, TrialExpiry};

// Usage
pub use usage::{ensure_usage_row, CounterSummary, RolloverReport, UsageMeter, UsageSummary};

// Webhooks
pub use webhooks::{
    decode_event, SignatureHeaders, UserCreatedData, WebhookEvent, WebhookVerifier,
    DEFAULT_TOLERANCE_SECS, SVIX_ID_HEADER, SVIX_SIGNATURE_HEADER, SVIX_TIMESTAMP_HEADER,
};

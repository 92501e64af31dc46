//! Billing error types

use thiserror::Error;

use crate::store::StoreError;

/// Coarse error classes used for logging level and HTTP status selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed request or payload (4xx)
    Client,
    /// Signature or credential failure (401)
    Auth,
    /// Missing deployment configuration (500, alert-worthy)
    Config,
    /// Unexpected store or upstream failure (500, sender retries)
    Storage,
    /// Terminal lookup failure that retrying cannot fix
    Unrecoverable,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Missing webhook signature headers")]
    MissingHeaders,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhook secret not configured")]
    NotConfigured,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Failed to create subscription: {0}")]
    SubscriptionCreationFailed(String),

    #[error("No email address on file for user {0}")]
    NoEmailAddress(String),

    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Deadline exceeded while resolving account")]
    DeadlineExceeded,
}

impl BillingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BillingError::MissingHeaders | BillingError::MalformedPayload(_) => {
                ErrorCategory::Client
            }
            BillingError::InvalidSignature => ErrorCategory::Auth,
            BillingError::NotConfigured => ErrorCategory::Config,
            BillingError::Storage(_)
            | BillingError::SubscriptionCreationFailed(_)
            | BillingError::IdentityProvider(_)
            | BillingError::AccountNotFound(_)
            | BillingError::DeadlineExceeded => ErrorCategory::Storage,
            BillingError::NoEmailAddress(_) => ErrorCategory::Unrecoverable,
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

//! Tier policy table
//!
//! Static per-tier quotas and feature gates. Quota fields use `UNLIMITED`
//! (-1) as a sentinel; callers must check [`is_unlimited`] before comparing.

use serde::Serialize;

use crate::types::{DocumentType, SubscriptionTier};

/// Sentinel limit value meaning "no cap"
pub const UNLIMITED: i32 = -1;

/// Length of the trial granted to new accounts
pub const TRIAL_DURATION_DAYS: i64 = 7;

/// Quotas and feature gates for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub tier: SubscriptionTier,
    /// Initiatives per month, or `UNLIMITED`
    pub initiatives_limit: i32,
    /// Credits per month, or `UNLIMITED`
    pub credits_limit: i32,
    pub allowed_document_types: &'static [DocumentType],
    pub export_enabled: bool,
    /// Only set for the trial tier
    pub trial_days: Option<i64>,
    /// Monthly price in whole dollars; `None` for the trial
    pub monthly_price_usd: Option<u32>,
}

const TRIAL_DOCUMENT_TYPES: &[DocumentType] = &[DocumentType::Brief];

const TRIAL: TierLimits = TierLimits {
    tier: SubscriptionTier::Trial,
    initiatives_limit: 1,
    credits_limit: 0,
    allowed_document_types: TRIAL_DOCUMENT_TYPES,
    export_enabled: false,
    trial_days: Some(TRIAL_DURATION_DAYS),
    monthly_price_usd: None,
};

const STARTER: TierLimits = TierLimits {
    tier: SubscriptionTier::Starter,
    initiatives_limit: 3,
    credits_limit: 25,
    allowed_document_types: &DocumentType::ALL,
    export_enabled: true,
    trial_days: None,
    monthly_price_usd: Some(49),
};

const PROFESSIONAL: TierLimits = TierLimits {
    tier: SubscriptionTier::Professional,
    initiatives_limit: UNLIMITED,
    credits_limit: 100,
    allowed_document_types: &DocumentType::ALL,
    export_enabled: true,
    trial_days: None,
    monthly_price_usd: Some(149),
};

const ENTERPRISE: TierLimits = TierLimits {
    tier: SubscriptionTier::Enterprise,
    initiatives_limit: UNLIMITED,
    credits_limit: UNLIMITED,
    allowed_document_types: &DocumentType::ALL,
    export_enabled: true,
    trial_days: None,
    monthly_price_usd: Some(499),
};

/// Look up the policy row for a tier
pub fn limits_for(tier: SubscriptionTier) -> &'static TierLimits {
    match tier {
        SubscriptionTier::Trial => &TRIAL,
        SubscriptionTier::Starter => &STARTER,
        SubscriptionTier::Professional => &PROFESSIONAL,
        SubscriptionTier::Enterprise => &ENTERPRISE,
    }
}

/// True when a limit value is the unlimited sentinel
pub fn is_unlimited(limit: i32) -> bool {
    limit == UNLIMITED
}

impl TierLimits {
    pub fn is_document_type_allowed(&self, document_type: DocumentType) -> bool {
        self.allowed_document_types.contains(&document_type)
    }

    /// Human readable price label shown next to the plan
    pub fn display_price(&self) -> String {
        match (self.monthly_price_usd, self.trial_days) {
            (Some(price), _) => format!("${}/mo", price),
            (None, Some(days)) => format!("Free {}-day trial", days),
            (None, None) => "Free".to_string(),
        }
    }
}

//! Common types used across OutcomeSignal

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Internal account ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscription ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Error returned when a string does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Trial,
    Starter,
    Professional,
    Enterprise,
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        Self::Trial
    }
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Trial,
        SubscriptionTier::Starter,
        SubscriptionTier::Professional,
        SubscriptionTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Professional => "professional",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Tiers a user can select through the plan picker (everything but trial)
    pub fn is_paid(&self) -> bool {
        !matches!(self, SubscriptionTier::Trial)
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(SubscriptionTier::Trial),
            "starter" => Ok(SubscriptionTier::Starter),
            "professional" => Ok(SubscriptionTier::Professional),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            _ => Err(ParseEnumError {
                kind: "subscription tier",
                value: s.to_string(),
            }),
        }
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    Expired,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::PastDue => "past_due",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            _ => Err(ParseEnumError {
                kind: "subscription status",
                value: s.to_string(),
            }),
        }
    }
}

/// Planning document subtypes an initiative can generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Brief,
    MarketResearch,
    CompetitiveAnalysis,
    Prd,
    Architecture,
    UxOverview,
    SecurityReview,
    QaStrategy,
}

impl DocumentType {
    pub const ALL: [DocumentType; 8] = [
        DocumentType::Brief,
        DocumentType::MarketResearch,
        DocumentType::CompetitiveAnalysis,
        DocumentType::Prd,
        DocumentType::Architecture,
        DocumentType::UxOverview,
        DocumentType::SecurityReview,
        DocumentType::QaStrategy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Brief => "brief",
            DocumentType::MarketResearch => "market_research",
            DocumentType::CompetitiveAnalysis => "competitive_analysis",
            DocumentType::Prd => "prd",
            DocumentType::Architecture => "architecture",
            DocumentType::UxOverview => "ux_overview",
            DocumentType::SecurityReview => "security_review",
            DocumentType::QaStrategy => "qa_strategy",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "document type",
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A user of the product, 1:1 with an identity-provider user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    /// Identity-provider user id (unique, immutable)
    pub external_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Profile fields carried by identity events and provider lookups
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountProfile {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Account {
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Input for inserting a new account row
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub external_id: String,
    pub profile: AccountProfile,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    pub account_id: AccountId,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Input for inserting a new subscription row
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub account_id: AccountId,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
}

/// Per-account, per-month usage counters. A limit of -1 means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct UsageTracking {
    pub account_id: AccountId,
    /// Calendar month in `YYYY-MM` form (UTC)
    pub month: String,
    pub credits_used: i32,
    pub credits_limit: i32,
    pub initiatives_count: i32,
    pub initiatives_limit: i32,
}

// =============================================================================
// Months
// =============================================================================

/// Usage month key (`YYYY-MM`) for an instant, evaluated in UTC
pub fn month_key(at: OffsetDateTime) -> String {
    let utc = at.to_offset(time::UtcOffset::UTC);
    format!("{:04}-{:02}", utc.year(), u8::from(utc.month()))
}

/// Usage month key for the current instant
pub fn current_month() -> String {
    month_key(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_tier_round_trips_through_display() {
        for tier in SubscriptionTier::ALL {
            assert_eq!(tier.to_string().parse::<SubscriptionTier>().unwrap(), tier);
        }
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_status_uses_snake_case() {
        assert_eq!(SubscriptionStatus::PastDue.to_string(), "past_due");
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::PastDue).unwrap(),
            "\"past_due\""
        );
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!("prd".parse::<DocumentType>().unwrap(), DocumentType::Prd);
        assert_eq!(
            "ux_overview".parse::<DocumentType>().unwrap(),
            DocumentType::UxOverview
        );
        assert!("PRD".parse::<DocumentType>().is_err());
    }

    #[test]
    fn test_month_key_is_utc() {
        // 23:30 at UTC-5 on Jan 31 is already February in UTC
        let at = datetime!(2025-01-31 23:30 -5);
        assert_eq!(month_key(at), "2025-02");
        assert_eq!(month_key(datetime!(2025-12-01 00:00 UTC)), "2025-12");
    }
}

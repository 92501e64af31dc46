//! Subscription and usage routes

use axum::{extract::State, http::StatusCode, Extension, Json};
use outcomesignal_billing::{
    effective_status, format_trial_status, trial_days_remaining, UsageSummary,
};
use outcomesignal_shared::{
    limits_for, Account, Subscription, SubscriptionStatus, SubscriptionTier, TierLimits,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    /// Status with lazy trial expiry applied
    pub effective_status: SubscriptionStatus,
    pub trial_days_remaining: Option<i64>,
    pub trial_status: Option<String>,
    pub limits: &'static TierLimits,
    pub display_price: String,
}

impl SubscriptionView {
    pub fn new(subscription: Subscription, now: OffsetDateTime) -> Self {
        let limits = limits_for(subscription.tier);
        Self {
            effective_status: effective_status(&subscription, now),
            trial_days_remaining: trial_days_remaining(subscription.trial_ends_at, now),
            trial_status: format_trial_status(&subscription, now),
            display_price: limits.display_price(),
            limits,
            subscription,
        }
    }
}

async fn find_account(state: &AppState, external_id: &str) -> ApiResult<Option<Account>> {
    state
        .store
        .find_account_by_external_id(external_id)
        .await
        .map_err(|e| ApiError::Billing(e.into()))
}

/// POST /api/v1/subscription/ensure
pub async fn ensure_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Json<Value> {
    match state.onboarding.ensure_subscription(&user.external_id).await {
        Some(subscription) => Json(json!({
            "subscription": SubscriptionView::new(subscription, OffsetDateTime::now_utc()),
        })),
        None => Json(json!({
            "subscription": null,
            "error": "account_setup_failed",
        })),
    }
}

/// GET /api/v1/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let Some(account) = find_account(&state, &user.external_id).await? else {
        return Ok(Json(json!({ "subscription": null })));
    };
    let subscription = state
        .store
        .find_subscription(account.id)
        .await
        .map_err(|e| ApiError::Billing(e.into()))?;

    let view = subscription.map(|s| SubscriptionView::new(s, OffsetDateTime::now_utc()));
    Ok(Json(json!({ "subscription": view })))
}

/// GET /api/v1/usage
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<UsageSummary>> {
    let account = find_account(&state, &user.external_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;
    let tier = state
        .store
        .find_subscription(account.id)
        .await
        .map_err(|e| ApiError::Billing(e.into()))?
        .map(|s| s.tier)
        .unwrap_or_default();

    let summary = state
        .usage
        .summary(account.id, tier, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct SelectPlanRequest {
    pub tier: String,
}

/// POST /api/v1/billing/plan
///
/// Records the upgrade intent only; no payment is captured.
pub async fn select_plan(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SelectPlanRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let target: SubscriptionTier = request
        .tier
        .parse()
        .map_err(|e: outcomesignal_shared::ParseEnumError| ApiError::BadRequest(e.to_string()))?;
    if !target.is_paid() {
        return Err(ApiError::BadRequest(
            "The trial tier cannot be selected".to_string(),
        ));
    }

    let account = find_account(&state, &user.external_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;
    let current = state
        .store
        .find_subscription(account.id)
        .await
        .map_err(|e| ApiError::Billing(e.into()))?
        .map(|s| s.tier);

    tracing::info!(
        account_id = %account.id,
        current_tier = ?current,
        target_tier = %target,
        "Plan selection intent recorded"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "pending",
            "tier": target,
            "price": limits_for(target).display_price(),
        })),
    ))
}

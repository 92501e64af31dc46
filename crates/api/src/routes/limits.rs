//! Usage-limit routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use outcomesignal_billing::{LimitCheckResult, LimitReason};
use outcomesignal_shared::DocumentType;
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// GET /api/v1/limits/initiatives
pub async fn check_initiatives(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Json<LimitCheckResult> {
    Json(state.limits.check_initiative_limit(&user.external_id).await)
}

/// GET /api/v1/limits/documents/{document_type}
pub async fn check_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(document_type): Path<String>,
) -> ApiResult<Json<LimitCheckResult>> {
    let document_type: DocumentType = document_type
        .parse()
        .map_err(|e: outcomesignal_shared::ParseEnumError| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(
        state
            .limits
            .check_document_generation(&user.external_id, document_type)
            .await,
    ))
}

/// GET /api/v1/limits/export
pub async fn check_export(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Json<LimitCheckResult> {
    Json(state.limits.check_export(&user.external_id).await)
}

/// POST /api/v1/usage/initiatives
///
/// Counts one initiative against the monthly allowance, or answers 403 with
/// the check that denied it.
pub async fn reserve_initiative(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Response> {
    let reservation = state
        .limits
        .reserve_initiative(&user.external_id, OffsetDateTime::now_utc())
        .await?;
    let check = reservation.check;

    if check.allowed {
        let body = json!({
            "count": reservation.new_count,
            "limit": check.limit,
            "tier": check.tier,
        });
        return Ok((StatusCode::CREATED, Json(body)).into_response());
    }

    let (message, code) = match check.reason {
        Some(LimitReason::TrialExpired) => ("Your trial has expired", "TRIAL_EXPIRED"),
        Some(LimitReason::LimitReached) => (
            "Monthly initiative limit reached for your plan",
            "INITIATIVE_LIMIT_REACHED",
        ),
        _ => ("No active subscription", "UNAUTHORIZED"),
    };
    tracing::info!(
        external_id = %user.external_id,
        code = code,
        current_count = ?check.current_count,
        limit = ?check.limit,
        "Initiative creation denied"
    );

    let body = json!({
        "error": message,
        "code": code,
        "currentCount": check.current_count,
        "limit": check.limit,
        "tier": check.tier,
    });
    Ok((StatusCode::FORBIDDEN, Json(body)).into_response())
}

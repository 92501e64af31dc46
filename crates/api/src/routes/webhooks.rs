//! Identity-provider webhook endpoint
//!
//! Responds in plain text. The sender retries on any non-2xx status, so
//! storage failures return 500 and benign duplicates return 200.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use outcomesignal_billing::{
    BillingError, ProvisionOutcome, SignatureHeaders, WebhookEvent, SVIX_ID_HEADER,
    SVIX_SIGNATURE_HEADER, SVIX_TIMESTAMP_HEADER,
};

use crate::{error::billing_status, state::AppState};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = SignatureHeaders {
        message_id: header(&headers, SVIX_ID_HEADER),
        timestamp: header(&headers, SVIX_TIMESTAMP_HEADER),
        signature: header(&headers, SVIX_SIGNATURE_HEADER),
    };

    let event = match state.webhook_verifier.verify(signature, &body) {
        Ok(event) => event,
        Err(e) => return failure(&e),
    };

    let data = match event {
        WebhookEvent::UserCreated(data) => data,
        WebhookEvent::Unhandled { event_type } => {
            tracing::debug!(event_type = %event_type, "Ignoring unsupported webhook event");
            return (StatusCode::OK, "Event type not supported").into_response();
        }
    };

    let outcome = match state.provisioner.provision(&data).await {
        Ok(outcome) => outcome,
        Err(e) => return failure(&e),
    };

    if let Err(e) = state.bootstrapper.ensure_trial(outcome.account().id).await {
        return failure(&e);
    }

    let message = match outcome {
        ProvisionOutcome::Created(_) => "User created successfully",
        ProvisionOutcome::DuplicateMatched(_) => "User already exists (idempotent)",
        ProvisionOutcome::DuplicateUpdated(_) => "User updated successfully",
    };
    (StatusCode::OK, message).into_response()
}

fn failure(err: &BillingError) -> Response {
    let status = billing_status(err);
    let message = match err {
        BillingError::MissingHeaders => "Missing required webhook headers".to_string(),
        BillingError::InvalidSignature => "Invalid webhook signature".to_string(),
        BillingError::NotConfigured => "Webhook secret not configured".to_string(),
        BillingError::MalformedPayload(reason) => format!("Invalid webhook payload: {}", reason),
        BillingError::SubscriptionCreationFailed(_) => "Failed to create subscription".to_string(),
        _ => "Failed to create user".to_string(),
    };

    if status.is_server_error() {
        tracing::error!(error = %err, status = %status, "Webhook processing failed");
    } else {
        tracing::warn!(error = %err, status = %status, "Webhook rejected");
    }

    (status, message).into_response()
}

//! Identity-provider webhook verification
//!
//! Events arrive in a signed envelope (svix scheme):
//!
//! - `svix-id`: unique message id
//! - `svix-timestamp`: unix seconds at send time
//! - `svix-signature`: space separated list of `v1,<base64 hmac>` entries
//!
//! The signature is HMAC-SHA256 over `{id}.{timestamp}.{body}` keyed with the
//! base64 part of the `whsec_` secret. Any matching entry is accepted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

pub const SVIX_ID_HEADER: &str = "svix-id";
pub const SVIX_TIMESTAMP_HEADER: &str = "svix-timestamp";
pub const SVIX_SIGNATURE_HEADER: &str = "svix-signature";

/// Default replay window in seconds, applied in both directions
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

/// Raw header values as received. Any may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureHeaders<'a> {
    pub message_id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Email entry on an identity-provider user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub id: Option<String>,
    pub email_address: String,
}

/// Payload of a `user.created` event. Fields are optional here and validated
/// by the provisioner so each gap maps to its own error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserCreatedData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Milliseconds since the unix epoch
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// A verified, decoded webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    UserCreated(UserCreatedData),
    Unhandled { event_type: String },
}

impl WebhookEvent {
    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::UserCreated(_) => "user.created",
            WebhookEvent::Unhandled { event_type } => event_type,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode an already-verified body into a [`WebhookEvent`]
pub fn decode_event(body: &[u8]) -> BillingResult<WebhookEvent> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "Webhook body is not a valid event envelope");
        BillingError::MalformedPayload(format!("invalid event envelope: {}", e))
    })?;

    match envelope.event_type.as_str() {
        "user.created" => {
            let data: UserCreatedData = serde_json::from_value(envelope.data).map_err(|e| {
                BillingError::MalformedPayload(format!("invalid user.created data: {}", e))
            })?;
            Ok(WebhookEvent::UserCreated(data))
        }
        _ => Ok(WebhookEvent::Unhandled {
            event_type: envelope.event_type,
        }),
    }
}

/// Verifies signed webhook envelopes against the shared secret
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    /// `None` leaves the verifier unconfigured; every request then fails with
    /// `NotConfigured` after header validation.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify and decode an event using the current time
    pub fn verify(&self, headers: SignatureHeaders<'_>, body: &[u8]) -> BillingResult<WebhookEvent> {
        self.verify_at(headers, body, OffsetDateTime::now_utc())
    }

    /// Verify and decode an event as of `now`
    pub fn verify_at(
        &self,
        headers: SignatureHeaders<'_>,
        body: &[u8],
        now: OffsetDateTime,
    ) -> BillingResult<WebhookEvent> {
        let (Some(message_id), Some(timestamp), Some(signature)) =
            (headers.message_id, headers.timestamp, headers.signature)
        else {
            tracing::warn!(
                has_id = headers.message_id.is_some(),
                has_timestamp = headers.timestamp.is_some(),
                has_signature = headers.signature.is_some(),
                "Webhook rejected: missing signature headers"
            );
            return Err(BillingError::MissingHeaders);
        };
        if message_id.is_empty() || timestamp.is_empty() || signature.is_empty() {
            return Err(BillingError::MissingHeaders);
        }

        let key = self.signing_key()?;

        let sent_at: i64 = timestamp.trim().parse().map_err(|_| {
            tracing::warn!(message_id = %message_id, "Webhook timestamp is not an integer");
            BillingError::InvalidSignature
        })?;
        let now_secs = now.unix_timestamp();
        if now_secs.abs_diff(sent_at) > self.tolerance_secs.unsigned_abs() {
            tracing::warn!(
                message_id = %message_id,
                timestamp = sent_at,
                now = now_secs,
                "Webhook timestamp outside tolerance window"
            );
            return Err(BillingError::InvalidSignature);
        }

        let expected = compute_signature(&key, message_id, timestamp, body)?;
        let matched = signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .filter_map(|(_, sig)| BASE64.decode(sig).ok())
            .any(|candidate| constant_time_eq(&candidate, &expected));

        if !matched {
            tracing::warn!(message_id = %message_id, "Webhook signature mismatch");
            return Err(BillingError::InvalidSignature);
        }

        tracing::debug!(message_id = %message_id, "Webhook signature verified");
        decode_event(body)
    }

    /// Produce a `v1,<base64>` signature for the given envelope
    pub fn sign(&self, message_id: &str, timestamp: i64, body: &[u8]) -> BillingResult<String> {
        let key = self.signing_key()?;
        let mac = compute_signature(&key, message_id, &timestamp.to_string(), body)?;
        Ok(format!("{},{}", SIGNATURE_VERSION, BASE64.encode(mac)))
    }

    fn signing_key(&self) -> BillingResult<Vec<u8>> {
        let Some(secret) = self.secret.as_deref() else {
            tracing::error!(
                "CLERK_WEBHOOK_SECRET is not configured; identity webhooks cannot be verified"
            );
            return Err(BillingError::NotConfigured);
        };
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        BASE64.decode(encoded).map_err(|e| {
            tracing::error!(error = %e, "Webhook secret is not valid base64");
            BillingError::NotConfigured
        })
    }
}

fn compute_signature(
    key: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> BillingResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| BillingError::NotConfigured)?;
    mac.update(message_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64("test-webhook-secret-key-material")
    const SECRET: &str = "whsec_dGVzdC13ZWJob29rLXNlY3JldC1rZXktbWF0ZXJpYWw=";
    const BODY: &[u8] = br#"{"type":"user.created","data":{"id":"user_123","email_addresses":[{"id":"idn_1","email_address":"a@example.com"}],"first_name":"Ada","last_name":null,"image_url":null,"created_at":1700000000000}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(Some(SECRET.to_string()))
    }

    fn signed(now: OffsetDateTime) -> (String, String, String) {
        let ts = now.unix_timestamp();
        let sig = verifier().sign("msg_1", ts, BODY).unwrap();
        ("msg_1".to_string(), ts.to_string(), sig)
    }

    fn headers<'a>(id: &'a str, ts: &'a str, sig: &'a str) -> SignatureHeaders<'a> {
        SignatureHeaders {
            message_id: Some(id),
            timestamp: Some(ts),
            signature: Some(sig),
        }
    }

    #[test]
    fn test_valid_signature_decodes_user_created() {
        let now = OffsetDateTime::now_utc();
        let (id, ts, sig) = signed(now);
        let event = verifier().verify_at(headers(&id, &ts, &sig), BODY, now).unwrap();
        match event {
            WebhookEvent::UserCreated(data) => {
                assert_eq!(data.id.as_deref(), Some("user_123"));
                assert_eq!(data.email_addresses[0].email_address, "a@example.com");
                assert_eq!(data.first_name.as_deref(), Some("Ada"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_any_matching_entry_in_signature_list_passes() {
        let now = OffsetDateTime::now_utc();
        let (id, ts, sig) = signed(now);
        let list = format!("v1,AAAA v2,whatever {}", sig);
        assert!(verifier().verify_at(headers(&id, &ts, &list), BODY, now).is_ok());
    }

    #[test]
    fn test_every_single_byte_body_mutation_fails() {
        let now = OffsetDateTime::now_utc();
        let (id, ts, sig) = signed(now);
        for i in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[i] ^= 0x01;
            let result = verifier().verify_at(headers(&id, &ts, &sig), &tampered, now);
            assert!(
                matches!(result, Err(BillingError::InvalidSignature)),
                "mutation at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_tampered_message_id_fails() {
        let now = OffsetDateTime::now_utc();
        let (_, ts, sig) = signed(now);
        let result = verifier().verify_at(headers("msg_2", &ts, &sig), BODY, now);
        assert!(matches!(result, Err(BillingError::InvalidSignature)));
    }

    #[test]
    fn test_stale_and_future_timestamps_rejected() {
        let now = OffsetDateTime::now_utc();
        let (id, ts, sig) = signed(now);

        let later = now + time::Duration::seconds(DEFAULT_TOLERANCE_SECS + 1);
        let result = verifier().verify_at(headers(&id, &ts, &sig), BODY, later);
        assert!(matches!(result, Err(BillingError::InvalidSignature)));

        let earlier = now - time::Duration::seconds(DEFAULT_TOLERANCE_SECS + 1);
        let result = verifier().verify_at(headers(&id, &ts, &sig), BODY, earlier);
        assert!(matches!(result, Err(BillingError::InvalidSignature)));

        let edge = now + time::Duration::seconds(DEFAULT_TOLERANCE_SECS);
        assert!(verifier().verify_at(headers(&id, &ts, &sig), BODY, edge).is_ok());
    }

    #[test]
    fn test_extreme_timestamps_rejected_without_overflow() {
        let now = OffsetDateTime::now_utc();
        let (id, _, sig) = signed(now);
        for ts in [i64::MIN.to_string(), i64::MAX.to_string(), "-1".to_string(), "0".to_string()] {
            let result = verifier().verify_at(headers(&id, &ts, &sig), BODY, now);
            assert!(
                matches!(result, Err(BillingError::InvalidSignature)),
                "timestamp {} was accepted",
                ts
            );
        }
    }

    #[test]
    fn test_every_single_byte_signature_mutation_fails() {
        let now = OffsetDateTime::now_utc();
        let (id, ts, sig) = signed(now);
        let original = sig.as_bytes();
        for i in 0..original.len() {
            for replacement in 0..=u8::MAX {
                if replacement == original[i] {
                    continue;
                }
                let mut tampered = original.to_vec();
                tampered[i] = replacement;
                // Non-UTF-8 values never reach the verifier as header strings
                let Ok(tampered) = String::from_utf8(tampered) else {
                    continue;
                };
                let result = verifier().verify_at(headers(&id, &ts, &tampered), BODY, now);
                assert!(
                    matches!(result, Err(BillingError::InvalidSignature)),
                    "signature mutation at byte {} to {:#04x} was accepted",
                    i,
                    replacement
                );
            }
        }
    }

    #[test]
    fn test_missing_headers_checked_before_secret() {
        let unconfigured = WebhookVerifier::new(None);
        let partial = SignatureHeaders {
            message_id: Some("msg_1"),
            timestamp: None,
            signature: Some("v1,abc"),
        };
        assert!(matches!(
            unconfigured.verify(partial, BODY),
            Err(BillingError::MissingHeaders)
        ));
        assert!(matches!(
            unconfigured.verify(headers("msg_1", "1", "v1,abc"), BODY),
            Err(BillingError::NotConfigured)
        ));
    }

    #[test]
    fn test_blank_secret_is_unconfigured() {
        assert!(!WebhookVerifier::new(Some("  ".to_string())).is_configured());
    }

    #[test]
    fn test_unhandled_event_type() {
        let event = decode_event(br#"{"type":"user.deleted","data":{"id":"user_1"}}"#).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Unhandled {
                event_type: "user.deleted".to_string()
            }
        );
    }

    #[test]
    fn test_non_json_body_is_malformed() {
        assert!(matches!(
            decode_event(b"not json"),
            Err(BillingError::MalformedPayload(_))
        ));
    }
}

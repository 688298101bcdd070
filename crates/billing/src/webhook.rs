//! Webhook signature verification and provider payload parsing.
//!
//! Signature header: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`,
//! where each `v1` is HMAC-SHA256 over `"<t>.<raw body>"`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use aquaops_core::{OrganizationId, Plan, SubscriptionStatus};

use crate::{BillingEvent, BillingEventKind};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(&'static str),

    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
}

impl core::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: tolerance_secs.max(0).unsigned_abs(),
        }
    }

    /// Check the signature header against the raw body.
    pub fn verify(&self, header: &str, body: &[u8], now: DateTime<Utc>) -> Result<(), WebhookError> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = Some(v),
                Some(("v1", v)) => signatures.push(v),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::InvalidSignature("missing timestamp"))?;
        let seconds: i64 = timestamp
            .parse()
            .map_err(|_| WebhookError::InvalidSignature("unparseable timestamp"))?;
        if signatures.is_empty() {
            return Err(WebhookError::InvalidSignature("missing v1 signature"));
        }
        if now.timestamp().abs_diff(seconds) > self.tolerance_secs {
            return Err(WebhookError::InvalidSignature("timestamp outside tolerance"));
        }

        let matched = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            self.mac(timestamp, body)
                .map(|mac| mac.verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            tracing::warn!("webhook signature mismatch");
            Err(WebhookError::InvalidSignature("signature mismatch"))
        }
    }

    /// Build a valid signature header for `body` at `timestamp`.
    pub fn sign(&self, body: &[u8], timestamp: i64) -> String {
        let ts = timestamp.to_string();
        let signature = self
            .mac(&ts, body)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("t={ts},v1={signature}")
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Some(mac)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a verified provider payload into a [`BillingEvent`].
pub fn parse_event(body: &[u8]) -> Result<BillingEvent, WebhookError> {
    let root: Value = serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

    let id = str_at(&root, "/id").ok_or_else(|| malformed("missing event id"))?;
    let event_type = str_at(&root, "/type").ok_or_else(|| malformed("missing event type"))?;
    let created = root
        .pointer("/created")
        .and_then(Value::as_i64)
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now);
    let object = root
        .pointer("/data/object")
        .ok_or_else(|| malformed("missing data.object"))?;

    let kind = match event_type.as_str() {
        "checkout.session.completed" => parse_checkout(object)?,
        "customer.subscription.updated" => parse_subscription_updated(object)?,
        "customer.subscription.deleted" => BillingEventKind::SubscriptionDeleted {
            customer_id: required(object, "/customer")?,
            subscription_id: required(object, "/id")?,
        },
        "invoice.paid" => BillingEventKind::InvoicePaid {
            customer_id: required(object, "/customer")?,
            subscription_id: str_at(object, "/subscription"),
            period_end: object
                .pointer("/lines/data/0/period/end")
                .or_else(|| object.pointer("/period_end"))
                .and_then(Value::as_i64)
                .and_then(|s| DateTime::from_timestamp(s, 0)),
        },
        "invoice.payment_failed" => BillingEventKind::InvoicePaymentFailed {
            customer_id: required(object, "/customer")?,
            subscription_id: str_at(object, "/subscription"),
        },
        other => {
            tracing::debug!(event_type = other, "ignoring unhandled billing event type");
            BillingEventKind::Other
        }
    };

    Ok(BillingEvent {
        id,
        event_type,
        created,
        kind,
    })
}

fn parse_checkout(object: &Value) -> Result<BillingEventKind, WebhookError> {
    let organization_id: OrganizationId = required(object, "/metadata/organization_id")?
        .parse()
        .map_err(|_| malformed("metadata.organization_id is not a valid id"))?;
    let plan = match str_at(object, "/metadata/plan") {
        Some(p) => p.parse::<Plan>().map_err(|_| malformed("unknown plan in metadata"))?,
        None => Plan::lowest_paid(),
    };
    Ok(BillingEventKind::CheckoutCompleted {
        organization_id,
        customer_id: required(object, "/customer")?,
        subscription_id: required(object, "/subscription")?,
        plan,
    })
}

fn parse_subscription_updated(object: &Value) -> Result<BillingEventKind, WebhookError> {
    let status_raw = required(object, "/status")?;
    let Ok(status) = status_raw.parse::<SubscriptionStatus>() else {
        // incomplete, paused and similar provider states are not tracked
        tracing::debug!(status = %status_raw, "ignoring untracked subscription status");
        return Ok(BillingEventKind::Other);
    };
    let plan = str_at(object, "/metadata/plan")
        .or_else(|| str_at(object, "/items/data/0/price/lookup_key"))
        .and_then(|p| p.parse::<Plan>().ok());

    Ok(BillingEventKind::SubscriptionUpdated {
        customer_id: required(object, "/customer")?,
        subscription_id: required(object, "/id")?,
        status,
        plan,
        current_period_end: object
            .pointer("/current_period_end")
            .and_then(Value::as_i64)
            .and_then(|s| DateTime::from_timestamp(s, 0)),
        cancel_at_period_end: object
            .pointer("/cancel_at_period_end")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn required(value: &Value, pointer: &str) -> Result<String, WebhookError> {
    str_at(value, pointer).ok_or_else(|| WebhookError::Malformed(format!("missing {pointer}")))
}

fn malformed(msg: &str) -> WebhookError {
    WebhookError::Malformed(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(b"whsec_test".to_vec(), DEFAULT_TOLERANCE_SECS)
    }

    #[test]
    fn accepts_own_signature() {
        let v = verifier();
        let now = Utc::now();
        let body = br#"{"id":"evt_1"}"#;
        let header = v.sign(body, now.timestamp());
        assert_eq!(v.verify(&header, body, now), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1() {
        let v = verifier();
        let now = Utc::now();
        let body = b"{}";
        let good = v.sign(body, now.timestamp());
        let sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t={},v1=deadbeef,v1={sig}", now.timestamp());
        assert_eq!(v.verify(&header, body, now), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(b"original", now.timestamp());
        assert!(v.verify(&header, b"tampered", now).is_err());

        let other = WebhookVerifier::new(b"another".to_vec(), DEFAULT_TOLERANCE_SECS);
        assert!(other.verify(&header, b"original", now).is_err());
    }

    #[test]
    fn rejects_stale_timestamp_and_garbage_header() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(b"x", now.timestamp() - 301);
        assert_eq!(
            v.verify(&header, b"x", now),
            Err(WebhookError::InvalidSignature("timestamp outside tolerance"))
        );
        assert!(v.verify("nonsense", b"x", now).is_err());
        assert!(v.verify("t=abc,v1=00", b"x", now).is_err());
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        let v = verifier();
        let now = Utc::now();
        for ts in [i64::MIN, i64::MAX, i64::MIN + 1] {
            let header = format!("t={ts},v1=00");
            assert_eq!(
                v.verify(&header, b"x", now),
                Err(WebhookError::InvalidSignature("timestamp outside tolerance"))
            );
        }
    }

    #[test]
    fn parses_checkout() {
        let org = OrganizationId::new();
        let body = json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "organization_id": org.to_string(), "plan": "pro" }
            }}
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.id, "evt_checkout");
        assert_eq!(
            event.kind,
            BillingEventKind::CheckoutCompleted {
                organization_id: org,
                customer_id: "cus_1".into(),
                subscription_id: "sub_1".into(),
                plan: Plan::Pro,
            }
        );
    }

    #[test]
    fn parses_subscription_updated_with_lookup_key() {
        let body = json!({
            "id": "evt_upd",
            "type": "customer.subscription.updated",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "past_due",
                "cancel_at_period_end": true,
                "current_period_end": 1_702_000_000,
                "items": { "data": [ { "price": { "lookup_key": "pro" } } ] }
            }}
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        match event.kind {
            BillingEventKind::SubscriptionUpdated {
                status,
                plan,
                cancel_at_period_end,
                current_period_end,
                ..
            } => {
                assert_eq!(status, SubscriptionStatus::PastDue);
                assert_eq!(plan, Some(Plan::Pro));
                assert!(cancel_at_period_end);
                assert_eq!(current_period_end.map(|t| t.timestamp()), Some(1_702_000_000));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn unknown_types_become_other() {
        let body = json!({ "id": "evt_x", "type": "customer.created", "data": { "object": {} } });
        assert_eq!(parse_event(body.to_string().as_bytes()).unwrap().kind, BillingEventKind::Other);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(parse_event(b"not json"), Err(WebhookError::Malformed(_))));
        let no_customer = json!({
            "id": "evt", "type": "invoice.paid", "data": { "object": {} }
        });
        assert!(parse_event(no_customer.to_string().as_bytes()).is_err());
    }
}

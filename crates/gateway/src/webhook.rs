//! Inbound webhook verification and event parsing.
//!
//! The gateway signs each delivery with a shared secret:
//! `Signature: t=<unix-seconds>,v1=<hex hmac-sha256 of "{t}.{body}">`.
//! Verification is constant-time and rejects stale timestamps, so captured
//! deliveries cannot be replayed later.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed age of a signed delivery.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Error type for signature verification failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    Malformed,

    #[error("Signature timestamp outside tolerance")]
    Stale,

    #[error("Signature mismatch")]
    Mismatch,
}

/// Verify a webhook delivery signature against the shared signing secret.
pub fn verify_signature(
    secret: &str,
    signature_header: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut provided: Option<Vec<u8>> = None;

    for part in signature_header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?);
            }
            Some(("v1", value)) => {
                provided = Some(decode_hex(value).ok_or(SignatureError::Malformed)?);
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let provided = provided.ok_or(SignatureError::Malformed)?;

    if (now.timestamp() - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice is a constant-time comparison.
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// Compute a signature header for a payload. Used by tests and by the mock
/// gateway to produce deliveries the verifier accepts.
pub fn sign_payload(secret: &str, payload: &[u8], at: DateTime<Utc>) -> String {
    let timestamp = at.timestamp();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    format!("t={timestamp},v1={}", encode_hex(&digest))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Event parsing
// ---------------------------------------------------------------------------

/// The webhook event types the escrow engine reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventType {
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    ChargeRefunded,
    ChargeDisputeCreated,
    ChargeDisputeClosed,
}

impl GatewayEventType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment_intent.succeeded" => Some(Self::PaymentIntentSucceeded),
            "payment_intent.payment_failed" => Some(Self::PaymentIntentFailed),
            "charge.refunded" => Some(Self::ChargeRefunded),
            "charge.dispute.created" => Some(Self::ChargeDisputeCreated),
            "charge.dispute.closed" => Some(Self::ChargeDisputeClosed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaymentIntentSucceeded => "payment_intent.succeeded",
            Self::PaymentIntentFailed => "payment_intent.payment_failed",
            Self::ChargeRefunded => "charge.refunded",
            Self::ChargeDisputeCreated => "charge.dispute.created",
            Self::ChargeDisputeClosed => "charge.dispute.closed",
        }
    }
}

/// Outcome of a closed external chargeback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeVerdict {
    ProviderWins,
    CustomerWins,
}

/// A parsed webhook delivery.
///
/// The payload shape is `{ "id", "type", "data": { "object": { ... } } }`;
/// the accessors read the fields each handler needs and tolerate absence.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type_raw: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Parse a delivery body.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// The recognized event type, if any.
    pub fn event_type(&self) -> Option<GatewayEventType> {
        GatewayEventType::parse(&self.event_type_raw)
    }

    fn object_str(&self, key: &str) -> Option<&str> {
        self.data.object.get(key).and_then(|v| v.as_str())
    }

    /// The payment intent id carried by the event, for both intent events
    /// (`id`) and charge events (`payment_intent`).
    pub fn intent_id(&self) -> Option<&str> {
        match self.event_type()? {
            GatewayEventType::PaymentIntentSucceeded | GatewayEventType::PaymentIntentFailed => {
                self.object_str("id")
            }
            _ => self.object_str("payment_intent"),
        }
    }

    /// The charge id carried by the event.
    pub fn charge_id(&self) -> Option<&str> {
        match self.event_type()? {
            GatewayEventType::PaymentIntentSucceeded | GatewayEventType::PaymentIntentFailed => {
                self.object_str("latest_charge")
            }
            GatewayEventType::ChargeRefunded => self.object_str("id"),
            GatewayEventType::ChargeDisputeCreated | GatewayEventType::ChargeDisputeClosed => {
                self.object_str("charge")
            }
        }
    }

    /// The gateway error message on a failed intent.
    pub fn failure_message(&self) -> Option<&str> {
        self.data
            .object
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
    }

    /// The dispute reason on `charge.dispute.created`.
    pub fn dispute_reason(&self) -> Option<&str> {
        self.object_str("reason")
    }

    /// The verdict on `charge.dispute.closed`: `status == "won"` means the
    /// platform (provider side) prevailed.
    pub fn dispute_verdict(&self) -> Option<DisputeVerdict> {
        match self.object_str("status")? {
            "won" => Some(DisputeVerdict::ProviderWins),
            "lost" => Some(DisputeVerdict::CustomerWins),
            _ => None,
        }
    }
}

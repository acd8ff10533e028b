//! Outbound gateway client: the [`PaymentGateway`] trait and its HTTP
//! implementation.
//!
//! Every call carries a bounded timeout; a timed-out call surfaces as
//! [`GatewayError`] and the caller's local state is left untouched, so the
//! operation is safely retryable.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// HTTP request timeout for a single gateway call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for gateway failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Gateway returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The gateway response could not be decoded.
    #[error("Unexpected gateway response: {0}")]
    Decode(String),
}

/// Handle returned by intent creation; the client secret goes back to the
/// paying customer's browser.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentHandle {
    pub intent_id: String,
    pub client_secret: String,
}

/// Current remote state of a payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentDetails {
    pub status: String,
    pub charge_id: Option<String>,
}

/// Handle returned by a refund call.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundHandle {
    pub refund_id: String,
}

/// The operations the escrow engine needs from the external payment
/// provider. Amounts are integer minor units (cents).
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent, returning its id and client secret.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<IntentHandle, GatewayError>;

    /// Change the amount of an existing, not-yet-captured intent.
    async fn update_intent_amount(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<(), GatewayError>;

    /// Fetch the current state of an intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentDetails, GatewayError>;

    /// Refund part or all of a captured charge.
    async fn refund(
        &self,
        charge_id: &str,
        amount_minor: i64,
        metadata: &HashMap<String, String>,
    ) -> Result<RefundHandle, GatewayError>;
}

/// HTTP implementation of [`PaymentGateway`] against the provider's REST
/// API.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    /// Create a client with a pre-configured HTTP timeout.
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            // The provider dedups retried POSTs by this key.
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<IntentHandle, GatewayError> {
        let body = serde_json::json!({
            "amount": amount_minor,
            "currency": currency,
            "metadata": metadata,
        });
        let handle: IntentHandle = self.post_json("/v1/payment_intents", &body).await?;
        tracing::debug!(intent_id = %handle.intent_id, amount_minor, "Created payment intent");
        Ok(handle)
    }

    async fn update_intent_amount(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<(), GatewayError> {
        let body = serde_json::json!({ "amount": amount_minor });
        let _: serde_json::Value = self
            .post_json(&format!("/v1/payment_intents/{intent_id}"), &body)
            .await?;
        tracing::debug!(intent_id, amount_minor, "Updated payment intent amount");
        Ok(())
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentDetails, GatewayError> {
        self.get_json(&format!("/v1/payment_intents/{intent_id}"))
            .await
    }

    async fn refund(
        &self,
        charge_id: &str,
        amount_minor: i64,
        metadata: &HashMap<String, String>,
    ) -> Result<RefundHandle, GatewayError> {
        let body = serde_json::json!({
            "charge": charge_id,
            "amount": amount_minor,
            "metadata": metadata,
        });
        let handle: RefundHandle = self.post_json("/v1/refunds", &body).await?;
        tracing::debug!(charge_id, amount_minor, refund_id = %handle.refund_id, "Refund issued");
        Ok(handle)
    }
}

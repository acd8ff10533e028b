//! Inbound payment gateway webhook endpoint.
//!
//! Deliveries are authenticated by an HMAC signature header before any
//! parsing. Duplicates and unrecognized event types are acknowledged with
//! 200 so the gateway stops retrying them; processing failures return 500
//! so the gateway retries, which the durable dedup makes safe.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use worklane_gateway::webhook::{verify_signature, WebhookEvent};

use crate::engine::WebhookOutcome;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Header carrying the delivery signature.
const SIGNATURE_HEADER: &str = "signature";

/// POST /api/v1/webhooks/gateway
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Signature header".to_string()))?;

    verify_signature(
        &state.config.webhook_signing_secret,
        signature,
        &body,
        Utc::now(),
    )
    .map_err(|e| AppError::BadRequest(format!("Invalid webhook signature: {e}")))?;

    let event = WebhookEvent::from_payload(&body)
        .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {e}")))?;

    let outcome = state.escrow().process_webhook(&event).await?;
    match outcome {
        WebhookOutcome::Processed => {
            tracing::info!(event_id = %event.id, event_type = %event.event_type_raw, "Webhook processed");
        }
        WebhookOutcome::Duplicate => {
            tracing::debug!(event_id = %event.id, "Duplicate webhook delivery");
        }
        WebhookOutcome::Ignored => {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type_raw, "Webhook ignored");
        }
    }
    Ok(StatusCode::OK)
}

//! Processed-webhook bookkeeping.

use serde::Serialize;
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

/// A row from the `webhook_events` table.
///
/// One row per gateway event id ever processed; inserting it is how the
/// webhook endpoint deduplicates redelivered events.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookEvent {
    pub id: DbId,
    pub gateway_event_id: String,
    pub event_type: String,
    pub processed_at: Timestamp,
}

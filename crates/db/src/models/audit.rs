//! Typed append-only audit entries for payments.
//!
//! Replaces ad-hoc metadata merge objects: every noteworthy payment event
//! (partial refund, redo marker, dispute annotation) is one immutable row.

use serde::Serialize;
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

/// A row from the `payment_audit_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentAuditEntry {
    pub id: DbId,
    pub payment_id: DbId,
    /// Who caused the entry: a user id, "gateway", or "system".
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: Timestamp,
}

//! Dispute entity model and resolution journal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

use crate::models::status::DisputeStatus;

/// A dispute row from the `disputes` table: a claim against a
/// project / milestone / payment triple.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Dispute {
    pub id: DbId,
    pub project_id: DbId,
    pub milestone_id: Option<DbId>,
    pub payment_id: Option<DbId>,
    /// Who raised the claim: "company", "provider", or "gateway" for
    /// external chargebacks.
    pub raised_by: String,
    pub reason: String,
    pub status: DisputeStatus,
    pub contested_amount: Option<Decimal>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row of the append-only `dispute_resolution_notes` journal.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DisputeResolutionNote {
    pub id: DbId,
    pub dispute_id: DbId,
    pub note: String,
    pub admin_id: DbId,
    pub admin_name: String,
    pub created_at: Timestamp,
}

/// DTO for a party raising a dispute.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDispute {
    pub project_id: DbId,
    pub milestone_id: Option<DbId>,
    pub payment_id: Option<DbId>,
    pub raised_by: String,
    pub reason: String,
    pub contested_amount: Option<Decimal>,
}

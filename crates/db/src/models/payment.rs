//! Payment entity model.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

use crate::models::status::{BankTransferStatus, PaymentStatus};

/// A payment row from the `payments` table.
///
/// One settlement instrument for exactly one milestone; at most one
/// reusable (pending / in_progress) payment exists per milestone at a time.
/// Rows are never deleted, only transitioned to a terminal status.
///
/// Invariant (also a CHECK constraint):
/// `platform_fee_amount + provider_amount == amount` exactly.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: DbId,
    pub milestone_id: DbId,
    pub project_id: DbId,
    pub amount: Decimal,
    pub platform_fee_amount: Decimal,
    pub provider_amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_intent_id: Option<String>,
    /// Client-side handle for completing the checkout of the live intent.
    pub gateway_client_secret: Option<String>,
    pub gateway_charge_id: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub bank_transfer_status: Option<BankTransferStatus>,
    pub bank_transfer_reference: Option<String>,
    pub escrowed_at: Option<Timestamp>,
    pub released_at: Option<Timestamp>,
    pub bank_transfer_date: Option<Timestamp>,
    pub failure_message: Option<String>,
    /// Cumulative refunded amount across partial refunds.
    pub refunded_total: Decimal,
    /// The amount before the first partial refund, if any occurred.
    pub original_amount: Option<Decimal>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

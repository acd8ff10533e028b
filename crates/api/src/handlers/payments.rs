//! Handlers for the `/payments` resource.

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use worklane_core::error::CoreError;
use worklane_core::types::DbId;
use worklane_db::models::audit::PaymentAuditEntry;
use worklane_db::models::payment::Payment;
use worklane_db::repositories::{PaymentAuditRepo, PaymentRepo};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body for `POST /payments/{id}/confirm-transfer`.
#[derive(Debug, Deserialize)]
pub struct ConfirmTransferRequest {
    pub admin_id: DbId,
    /// Bank reference of the executed transfer.
    pub reference: Option<String>,
}

/// Body for `POST /payments/{id}/refund`.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub admin_id: DbId,
    /// Amount to refund; omit for a full refund.
    pub amount: Option<Decimal>,
    pub reason: String,
}

/// GET /api/v1/payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Payment>>> {
    let payment = PaymentRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Payment",
            id,
        })?;
    Ok(Json(DataResponse { data: payment }))
}

/// GET /api/v1/payments/{id}/audit
///
/// The append-only audit trail of a payment, oldest first.
pub async fn list_audit(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<PaymentAuditEntry>>>> {
    PaymentRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Payment",
            id,
        })?;
    let entries = PaymentAuditRepo::list_for_payment(&state.pool, id).await?;
    Ok(Json(DataResponse { data: entries }))
}

/// POST /api/v1/payments/{id}/confirm-transfer
///
/// Admin confirms the bank transfer of a released payment completed.
pub async fn confirm_transfer(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ConfirmTransferRequest>,
) -> AppResult<Json<DataResponse<Payment>>> {
    let payment = state
        .escrow()
        .confirm_bank_transfer(id, body.admin_id, body.reference.as_deref())
        .await?;
    Ok(Json(DataResponse { data: payment }))
}

/// POST /api/v1/payments/{id}/refund
///
/// Admin refunds part or all of an escrowed payment.
pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<RefundRequest>,
) -> AppResult<Json<DataResponse<Payment>>> {
    let payment = state
        .escrow()
        .refund(id, body.admin_id, body.amount, &body.reason)
        .await?;
    Ok(Json(DataResponse { data: payment }))
}

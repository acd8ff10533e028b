//! Handlers for the `/disputes` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use worklane_core::types::DbId;
use worklane_db::models::dispute::{CreateDispute, Dispute, DisputeResolutionNote};
use worklane_db::models::status::DisputeStatus;

use crate::engine::PayoutSummary;
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body for `POST /disputes`.
#[derive(Debug, Deserialize)]
pub struct OpenDisputeRequest {
    pub actor_id: DbId,
    pub project_id: DbId,
    pub milestone_id: Option<DbId>,
    pub payment_id: Option<DbId>,
    pub reason: String,
    pub contested_amount: Option<Decimal>,
}

/// Body for `POST /disputes/{id}/resolve`.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub admin_id: DbId,
    /// One of `resolved`, `closed`, `rejected`.
    pub verdict: DisputeStatus,
    pub note: String,
}

/// Body for `POST /disputes/{id}/payout`.
#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub admin_id: DbId,
    #[serde(default)]
    pub refund_amount: Decimal,
    #[serde(default)]
    pub release_amount: Decimal,
    #[serde(default)]
    pub note: String,
    /// Bank reference for the released share.
    pub transfer_reference: Option<String>,
}

/// Body for `POST /disputes/{id}/redo`.
#[derive(Debug, Deserialize)]
pub struct RedoRequest {
    pub admin_id: DbId,
    #[serde(default)]
    pub note: String,
}

/// A dispute together with its resolution journal.
#[derive(Debug, Serialize)]
pub struct DisputeDetail {
    #[serde(flatten)]
    pub dispute: Dispute,
    pub notes: Vec<DisputeResolutionNote>,
}

/// POST /api/v1/disputes
///
/// A party raises a dispute against a project.
pub async fn open_dispute(
    State(state): State<AppState>,
    Json(body): Json<OpenDisputeRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<Dispute>>)> {
    let input = CreateDispute {
        project_id: body.project_id,
        milestone_id: body.milestone_id,
        payment_id: body.payment_id,
        raised_by: String::new(), // derived from the actor by the engine
        reason: body.reason,
        contested_amount: body.contested_amount,
    };
    let dispute = state.dispute().open(input, body.actor_id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: dispute })))
}

/// GET /api/v1/disputes/{id}
pub async fn get_dispute(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<DisputeDetail>>> {
    let (dispute, notes) = state.dispute().with_notes(id).await?;
    Ok(Json(DataResponse {
        data: DisputeDetail { dispute, notes },
    }))
}

/// POST /api/v1/disputes/{id}/resolve
///
/// Admin records a verdict (`resolved`, `closed`, or `rejected`) with a
/// mandatory journal note.
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ResolveRequest>,
) -> AppResult<Json<DataResponse<Dispute>>> {
    let dispute = state
        .dispute()
        .resolve(id, body.admin_id, body.verdict, &body.note)
        .await?;
    Ok(Json(DataResponse { data: dispute }))
}

/// POST /api/v1/disputes/{id}/payout
///
/// Admin settles the dispute with a partial split: refund one share to the
/// customer, release the remainder to the provider. Leg outcomes are
/// reported independently.
pub async fn payout(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<PayoutRequest>,
) -> AppResult<Json<DataResponse<PayoutSummary>>> {
    let summary = state
        .dispute()
        .settle_with_payout(
            id,
            body.admin_id,
            body.refund_amount,
            body.release_amount,
            &body.note,
            body.transfer_reference.as_deref(),
        )
        .await?;
    Ok(Json(DataResponse { data: summary }))
}

/// POST /api/v1/disputes/{id}/redo
///
/// Admin sends the contested milestone back to the provider; escrow is
/// untouched.
pub async fn redo_milestone(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<RedoRequest>,
) -> AppResult<Json<DataResponse<Dispute>>> {
    let dispute = state
        .dispute()
        .redo_milestone(id, body.admin_id, &body.note)
        .await?;
    Ok(Json(DataResponse { data: dispute }))
}

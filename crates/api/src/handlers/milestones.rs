//! Handlers for the `/milestones` work lifecycle and escrow funding.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use worklane_core::types::DbId;
use worklane_db::models::milestone::{Milestone, MilestoneSubmission};
use worklane_db::models::payment::Payment;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body for actions that only need the acting user.
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: DbId,
}

/// Body for `POST /milestones/{id}/submit`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub actor_id: DbId,
    pub note: Option<String>,
    pub attachment_url: Option<String>,
}

/// Body for `POST /milestones/{id}/request-changes`.
#[derive(Debug, Deserialize)]
pub struct RequestChangesRequest {
    pub actor_id: DbId,
    pub reason: Option<String>,
}

/// Body for `POST /milestones/{id}/payments`.
#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub actor_id: DbId,
    pub amount: Decimal,
}

/// POST /api/v1/milestones/{id}/start
pub async fn start_work(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ActorRequest>,
) -> AppResult<Json<DataResponse<Milestone>>> {
    let milestone = state.approval().start_work(id, body.actor_id).await?;
    Ok(Json(DataResponse { data: milestone }))
}

/// POST /api/v1/milestones/{id}/submit
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<SubmitRequest>,
) -> AppResult<Json<DataResponse<Milestone>>> {
    let milestone = state
        .approval()
        .submit(
            id,
            body.actor_id,
            body.note.as_deref(),
            body.attachment_url.as_deref(),
        )
        .await?;
    Ok(Json(DataResponse { data: milestone }))
}

/// POST /api/v1/milestones/{id}/request-changes
///
/// Archives the current submission and returns the milestone to
/// `in_progress` with a bumped revision number.
pub async fn request_changes(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<RequestChangesRequest>,
) -> AppResult<Json<DataResponse<Milestone>>> {
    let milestone = state
        .approval()
        .request_changes(id, body.actor_id, body.reason.as_deref())
        .await?;
    Ok(Json(DataResponse { data: milestone }))
}

/// POST /api/v1/milestones/{id}/approve
pub async fn approve_submission(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ActorRequest>,
) -> AppResult<Json<DataResponse<Milestone>>> {
    let milestone = state
        .approval()
        .approve_submission(id, body.actor_id)
        .await?;
    Ok(Json(DataResponse { data: milestone }))
}

/// GET /api/v1/milestones/{id}/submissions
///
/// The archived submission history, oldest first.
pub async fn list_submissions(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<MilestoneSubmission>>>> {
    let submissions = state.approval().submission_history(id).await?;
    Ok(Json(DataResponse { data: submissions }))
}

/// POST /api/v1/milestones/{id}/payments
///
/// Begin escrow funding for a locked milestone. Returns the payment with
/// the gateway client secret for checkout.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<InitiatePaymentRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<Payment>>)> {
    let payment = state
        .escrow()
        .initiate(id, body.actor_id, body.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: payment })))
}

/// POST /api/v1/milestones/{id}/release
///
/// Release the escrowed payment of an approved milestone to the provider.
pub async fn release(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ActorRequest>,
) -> AppResult<Json<DataResponse<Payment>>> {
    let payment = state.escrow().release(id, body.actor_id).await?;
    Ok(Json(DataResponse { data: payment }))
}

//! Handlers for the `/projects` resource and its milestone plan.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use worklane_core::error::CoreError;
use worklane_core::milestone_plan::MilestoneDraft;
use worklane_core::types::DbId;
use worklane_db::models::milestone::Milestone;
use worklane_db::models::project::{CreateProject, Project};
use worklane_db::repositories::{MilestoneRepo, ProjectRepo};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body for `PUT /projects/{id}/milestones`.
#[derive(Debug, Deserialize)]
pub struct ReplaceMilestonesRequest {
    pub actor_id: DbId,
    pub milestones: Vec<MilestoneDraft>,
}

/// Body for `POST /projects/{id}/milestones/approve`.
#[derive(Debug, Deserialize)]
pub struct ApprovePlanRequest {
    pub actor_id: DbId,
}

/// POST /api/v1/projects
///
/// Create a project from an accepted proposal. The milestone plan starts
/// empty and unlocked.
pub async fn create_project(
    State(state): State<AppState>,
    Json(input): Json<CreateProject>,
) -> AppResult<(StatusCode, Json<DataResponse<Project>>)> {
    if input.approved_price <= rust_decimal::Decimal::ZERO {
        return Err(CoreError::Validation(
            "Approved price must be positive".to_string(),
        )
        .into());
    }
    let project = ProjectRepo::create(&state.pool, &input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: project })))
}

/// GET /api/v1/projects/{id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Project>>> {
    let project = ProjectRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Project",
            id,
        })?;
    Ok(Json(DataResponse { data: project }))
}

/// GET /api/v1/projects/{id}/milestones
pub async fn list_milestones(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<Milestone>>>> {
    ProjectRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Project",
            id,
        })?;
    let milestones = MilestoneRepo::list_for_project(&state.pool, id).await?;
    Ok(Json(DataResponse { data: milestones }))
}

/// PUT /api/v1/projects/{id}/milestones
///
/// Replace the project's milestone plan wholesale. Only legal while the
/// plan is unlocked; resets both approval flags.
pub async fn replace_milestones(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ReplaceMilestonesRequest>,
) -> AppResult<Json<DataResponse<Vec<Milestone>>>> {
    let milestones = state
        .approval()
        .replace_milestones(id, body.actor_id, body.milestones)
        .await?;
    Ok(Json(DataResponse { data: milestones }))
}

/// POST /api/v1/projects/{id}/milestones/approve
///
/// Record the calling party's approval of the current plan; locks the plan
/// when it completes the dual approval.
pub async fn approve_plan(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<ApprovePlanRequest>,
) -> AppResult<Json<DataResponse<Project>>> {
    let project = state.approval().approve_plan(id, body.actor_id).await?;
    Ok(Json(DataResponse { data: project }))
}

//! Project entity model and DTOs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

use crate::models::status::ProjectStatus;

/// A project row from the `projects` table.
///
/// Invariant (also enforced by a CHECK constraint): `milestones_locked`
/// implies both `company_approved` and `provider_approved`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub company_id: DbId,
    pub provider_id: DbId,
    pub status: ProjectStatus,
    pub approved_price: Decimal,
    pub milestones_locked: bool,
    pub company_approved: bool,
    pub provider_approved: bool,
    pub milestones_approved_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a new project (proposal acceptance).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub company_id: DbId,
    pub provider_id: DbId,
    pub approved_price: Decimal,
}

//! Repository for the `projects` table.

use sqlx::PgPool;
use worklane_core::types::{DbId, Timestamp};

use crate::models::project::{CreateProject, Project};
use crate::models::status::ProjectStatus;
use crate::repositories::PgTx;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, company_id, provider_id, status, approved_price, milestones_locked, \
     company_approved, provider_approved, milestones_approved_at, created_at, updated_at";

/// Provides CRUD operations for projects.
pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert a new project in draft status, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateProject) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (company_id, provider_id, approved_price)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(input.company_id)
            .bind(input.provider_id)
            .bind(input.approved_price)
            .fetch_one(pool)
            .await
    }

    /// Find a project by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a project and take a row lock for the remainder of the
    /// transaction. All dual-approval and status transitions go through
    /// this to serialize concurrent writers.
    pub async fn find_by_id_for_update(
        tx: &mut PgTx<'_>,
        id: DbId,
    ) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Set one party's approval flag.
    pub async fn set_approval_flag(
        tx: &mut PgTx<'_>,
        id: DbId,
        company_approved: bool,
        provider_approved: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET company_approved = $2, provider_approved = $3, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(company_approved)
        .bind(provider_approved)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Lock the milestone plan: both approvals are already true, so the
    /// CHECK constraint permits setting the flag.
    pub async fn lock_milestones(
        tx: &mut PgTx<'_>,
        id: DbId,
        approved_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET milestones_locked = TRUE, milestones_approved_at = $2, \
             status = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(approved_at)
        .bind(ProjectStatus::InProgress)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Reset both approval flags after a plan replacement.
    pub async fn reset_approvals(tx: &mut PgTx<'_>, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE projects SET company_approved = FALSE, provider_approved = FALSE, \
             milestones_approved_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Set the project status.
    pub async fn set_status(
        tx: &mut PgTx<'_>,
        id: DbId,
        status: ProjectStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

//! Repository for the `disputes` table and its resolution journal.

use sqlx::PgPool;
use worklane_core::types::DbId;

use crate::models::dispute::{CreateDispute, Dispute, DisputeResolutionNote};
use crate::models::status::DisputeStatus;
use crate::repositories::PgTx;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, project_id, milestone_id, payment_id, raised_by, reason, status, \
     contested_amount, created_at, updated_at";

/// Provides operations on disputes.
pub struct DisputeRepo;

impl DisputeRepo {
    /// Insert a new open dispute inside an existing transaction.
    pub async fn create(tx: &mut PgTx<'_>, input: &CreateDispute) -> Result<Dispute, sqlx::Error> {
        let query = format!(
            "INSERT INTO disputes \
             (project_id, milestone_id, payment_id, raised_by, reason, contested_amount)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Dispute>(&query)
            .bind(input.project_id)
            .bind(input.milestone_id)
            .bind(input.payment_id)
            .bind(&input.raised_by)
            .bind(&input.reason)
            .bind(input.contested_amount)
            .fetch_one(&mut **tx)
            .await
    }

    /// Find a dispute by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Dispute>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM disputes WHERE id = $1");
        sqlx::query_as::<_, Dispute>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a dispute and take a row lock for the remainder of the
    /// transaction. Admin resolution actions serialize here.
    pub async fn find_by_id_for_update(
        tx: &mut PgTx<'_>,
        id: DbId,
    ) -> Result<Option<Dispute>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM disputes WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Dispute>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Set the dispute status.
    pub async fn set_status(
        tx: &mut PgTx<'_>,
        id: DbId,
        status: DisputeStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE disputes SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Append a note to the resolution journal. The journal is append-only;
    /// nothing here ever updates or removes an existing note.
    pub async fn append_note(
        tx: &mut PgTx<'_>,
        dispute_id: DbId,
        note: &str,
        admin_id: DbId,
        admin_name: &str,
    ) -> Result<DisputeResolutionNote, sqlx::Error> {
        sqlx::query_as::<_, DisputeResolutionNote>(
            "INSERT INTO dispute_resolution_notes (dispute_id, note, admin_id, admin_name)
             VALUES ($1, $2, $3, $4)
             RETURNING id, dispute_id, note, admin_id, admin_name, created_at",
        )
        .bind(dispute_id)
        .bind(note)
        .bind(admin_id)
        .bind(admin_name)
        .fetch_one(&mut **tx)
        .await
    }

    /// List the resolution journal of a dispute, oldest first.
    pub async fn list_notes(
        pool: &PgPool,
        dispute_id: DbId,
    ) -> Result<Vec<DisputeResolutionNote>, sqlx::Error> {
        sqlx::query_as::<_, DisputeResolutionNote>(
            "SELECT id, dispute_id, note, admin_id, admin_name, created_at \
             FROM dispute_resolution_notes WHERE dispute_id = $1 ORDER BY id",
        )
        .bind(dispute_id)
        .fetch_all(pool)
        .await
    }

    /// Find the open or under-review dispute attached to a payment, locking
    /// the row. Used to close the tracking dispute when the gateway reports
    /// a chargeback verdict.
    pub async fn find_open_for_payment(
        tx: &mut PgTx<'_>,
        payment_id: DbId,
    ) -> Result<Option<Dispute>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM disputes \
             WHERE payment_id = $1 AND status IN ('open', 'under_review') \
             ORDER BY id DESC LIMIT 1 FOR UPDATE"
        );
        sqlx::query_as::<_, Dispute>(&query)
            .bind(payment_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// List a project's disputes that are still open or under review,
    /// locking the rows. Used by auto-resolution on project completion.
    pub async fn list_unresolved_for_project(
        tx: &mut PgTx<'_>,
        project_id: DbId,
    ) -> Result<Vec<Dispute>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM disputes \
             WHERE project_id = $1 AND status IN ('open', 'under_review') \
             ORDER BY id FOR UPDATE"
        );
        sqlx::query_as::<_, Dispute>(&query)
            .bind(project_id)
            .fetch_all(&mut **tx)
            .await
    }
}

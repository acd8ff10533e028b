//! Repository for the `milestones` table and its submission history.

use sqlx::PgPool;
use worklane_core::milestone_plan::MilestoneDraft;
use worklane_core::types::{DbId, Timestamp};

use crate::models::milestone::{Milestone, MilestoneSubmission};
use crate::models::status::MilestoneStatus;
use crate::repositories::PgTx;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, project_id, title, amount, due_date, seq, status, is_paid, \
     submitted_at, submission_note, submission_attachment_url, revision_number, \
     approved_at, approved_by, created_at, updated_at";

/// Provides operations on milestones.
pub struct MilestoneRepo;

impl MilestoneRepo {
    /// Find a milestone by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Milestone>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM milestones WHERE id = $1");
        sqlx::query_as::<_, Milestone>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a milestone and take a row lock for the remainder of the
    /// transaction.
    pub async fn find_by_id_for_update(
        tx: &mut PgTx<'_>,
        id: DbId,
    ) -> Result<Option<Milestone>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM milestones WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Milestone>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// List a project's milestones in plan order.
    pub async fn list_for_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<Milestone>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM milestones WHERE project_id = $1 ORDER BY seq");
        sqlx::query_as::<_, Milestone>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Replace a project's milestone plan inside an existing transaction:
    /// delete every current row, then insert the new set as drafts.
    ///
    /// The submission history of replaced milestones is deleted with them;
    /// replacement is only legal before the plan is locked, when no
    /// submissions can exist yet.
    pub async fn replace_for_project(
        tx: &mut PgTx<'_>,
        project_id: DbId,
        drafts: &[MilestoneDraft],
    ) -> Result<Vec<Milestone>, sqlx::Error> {
        sqlx::query(
            "DELETE FROM milestone_submissions WHERE milestone_id IN \
             (SELECT id FROM milestones WHERE project_id = $1)",
        )
        .bind(project_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM milestones WHERE project_id = $1")
            .bind(project_id)
            .execute(&mut **tx)
            .await?;

        let mut created = Vec::with_capacity(drafts.len());
        let query = format!(
            "INSERT INTO milestones (project_id, title, amount, due_date, seq)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        for draft in drafts {
            let row = sqlx::query_as::<_, Milestone>(&query)
                .bind(project_id)
                .bind(&draft.title)
                .bind(draft.amount)
                .bind(draft.due_date)
                .bind(draft.seq)
                .fetch_one(&mut **tx)
                .await?;
            created.push(row);
        }
        Ok(created)
    }

    /// Set the status of a single milestone.
    pub async fn set_status(
        tx: &mut PgTx<'_>,
        id: DbId,
        status: MilestoneStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE milestones SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Transition every milestone of a project currently in `from` to `to`.
    pub async fn set_status_for_project(
        tx: &mut PgTx<'_>,
        project_id: DbId,
        from: MilestoneStatus,
        to: MilestoneStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE milestones SET status = $3, updated_at = NOW() \
             WHERE project_id = $1 AND status = $2",
        )
        .bind(project_id)
        .bind(from)
        .bind(to)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reject every non-terminal milestone of a project. Paid, cancelled,
    /// and already-rejected milestones keep their status.
    pub async fn reject_all_non_terminal(
        tx: &mut PgTx<'_>,
        project_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE milestones SET status = $2, updated_at = NOW() \
             WHERE project_id = $1 AND status NOT IN ('paid', 'cancelled', 'rejected')",
        )
        .bind(project_id)
        .bind(MilestoneStatus::Rejected)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark a milestone funded: escrow confirmed, work may begin.
    pub async fn mark_escrow_funded(tx: &mut PgTx<'_>, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE milestones SET status = $2, is_paid = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(MilestoneStatus::InProgress)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Record a work submission.
    pub async fn record_submission(
        tx: &mut PgTx<'_>,
        id: DbId,
        note: Option<&str>,
        attachment_url: Option<&str>,
        submitted_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE milestones SET status = $2, submitted_at = $3, submission_note = $4, \
             submission_attachment_url = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(MilestoneStatus::Submitted)
        .bind(submitted_at)
        .bind(note)
        .bind(attachment_url)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Archive the current submission into the append-only history and
    /// clear the live submission fields, bumping the revision number.
    pub async fn archive_submission(
        tx: &mut PgTx<'_>,
        milestone: &Milestone,
    ) -> Result<(), sqlx::Error> {
        // A milestone without a live submission has nothing to archive.
        let submitted_at = milestone.submitted_at.ok_or(sqlx::Error::RowNotFound)?;

        sqlx::query(
            "INSERT INTO milestone_submissions \
             (milestone_id, revision_number, note, attachment_url, submitted_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(milestone.id)
        .bind(milestone.revision_number + 1)
        .bind(&milestone.submission_note)
        .bind(&milestone.submission_attachment_url)
        .bind(submitted_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE milestones SET status = $2, revision_number = revision_number + 1, \
             submitted_at = NULL, submission_note = NULL, submission_attachment_url = NULL, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(milestone.id)
        .bind(MilestoneStatus::InProgress)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// List the archived submissions of a milestone, oldest first.
    pub async fn list_submissions(
        pool: &PgPool,
        milestone_id: DbId,
    ) -> Result<Vec<MilestoneSubmission>, sqlx::Error> {
        sqlx::query_as::<_, MilestoneSubmission>(
            "SELECT id, milestone_id, revision_number, note, attachment_url, submitted_at, \
             archived_at FROM milestone_submissions WHERE milestone_id = $1 ORDER BY id",
        )
        .bind(milestone_id)
        .fetch_all(pool)
        .await
    }

    /// Record approval of the submitted work.
    pub async fn record_approval(
        tx: &mut PgTx<'_>,
        id: DbId,
        approved_by: DbId,
        approved_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE milestones SET status = $2, approved_at = $3, approved_by = $4, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(MilestoneStatus::Approved)
        .bind(approved_at)
        .bind(approved_by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Count milestones of a project that are neither approved nor paid.
    pub async fn count_unapproved(tx: &mut PgTx<'_>, project_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM milestones \
             WHERE project_id = $1 AND status NOT IN ('approved', 'paid')",
        )
        .bind(project_id)
        .fetch_one(&mut **tx)
        .await
    }

    /// Count milestones of a project that have not reached paid.
    pub async fn count_unpaid(tx: &mut PgTx<'_>, project_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM milestones WHERE project_id = $1 AND status <> 'paid'",
        )
        .bind(project_id)
        .fetch_one(&mut **tx)
        .await
    }
}

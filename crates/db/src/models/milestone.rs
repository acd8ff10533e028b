//! Milestone entity model and submission history.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

use crate::models::status::MilestoneStatus;

/// A milestone row from the `milestones` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Milestone {
    pub id: DbId,
    pub project_id: DbId,
    pub title: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    /// Position within the project plan; unique per project, contiguous
    /// from 1.
    pub seq: i32,
    pub status: MilestoneStatus,
    pub is_paid: bool,
    pub submitted_at: Option<Timestamp>,
    pub submission_note: Option<String>,
    pub submission_attachment_url: Option<String>,
    pub revision_number: i32,
    pub approved_at: Option<Timestamp>,
    pub approved_by: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An archived submission from the `milestone_submissions` table.
///
/// Written when the company requests changes; the log is append-only so a
/// change request never loses the prior submission.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MilestoneSubmission {
    pub id: DbId,
    pub milestone_id: DbId,
    pub revision_number: i32,
    pub note: Option<String>,
    pub attachment_url: Option<String>,
    pub submitted_at: Timestamp,
    pub archived_at: Timestamp,
}

//! Notification entity model.

use serde::Serialize;
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: DbId,
    pub user_id: DbId,
    pub title: String,
    pub notification_type: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub created_at: Timestamp,
}

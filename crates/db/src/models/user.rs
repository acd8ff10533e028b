//! User entity model.
//!
//! Authentication lives outside this system; users exist here only so
//! projects, payouts, and notifications have owners.

use serde::Serialize;
use sqlx::FromRow;
use worklane_core::types::{DbId, Timestamp};

/// A user row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub role: String,
    pub display_name: String,
    /// Gateway payout destination; required before a payment can be
    /// released to this provider.
    pub payout_account_id: Option<String>,
    pub created_at: Timestamp,
}

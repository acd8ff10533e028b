//! Repository for the `users` table.

use sqlx::PgPool;
use worklane_core::types::DbId;

use crate::models::user::User;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, role, display_name, payout_account_id, created_at";

/// Provides read operations for users. User provisioning happens upstream;
/// this system only consumes the rows.
pub struct UserRepo;

impl UserRepo {
    /// Find a user by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert a user. Exposed for integration tests and seeding.
    pub async fn create(
        pool: &PgPool,
        role: &str,
        display_name: &str,
        payout_account_id: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (role, display_name, payout_account_id)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(role)
            .bind(display_name)
            .bind(payout_account_id)
            .fetch_one(pool)
            .await
    }
}

//! Repository for the append-only `payment_audit_log` table.

use sqlx::PgPool;
use worklane_core::types::DbId;

use crate::models::audit::PaymentAuditEntry;
use crate::repositories::PgTx;

/// Appends and reads payment audit entries. There is deliberately no
/// update or delete here.
pub struct PaymentAuditRepo;

impl PaymentAuditRepo {
    /// Append an audit entry for a payment.
    pub async fn append(
        tx: &mut PgTx<'_>,
        payment_id: DbId,
        actor: &str,
        action: &str,
        details: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO payment_audit_log (payment_id, actor, action, details) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(payment_id)
        .bind(actor)
        .bind(action)
        .bind(details)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// List the audit trail of a payment, oldest first.
    pub async fn list_for_payment(
        pool: &PgPool,
        payment_id: DbId,
    ) -> Result<Vec<PaymentAuditEntry>, sqlx::Error> {
        sqlx::query_as::<_, PaymentAuditEntry>(
            "SELECT id, payment_id, actor, action, details, created_at \
             FROM payment_audit_log WHERE payment_id = $1 ORDER BY id",
        )
        .bind(payment_id)
        .fetch_all(pool)
        .await
    }
}

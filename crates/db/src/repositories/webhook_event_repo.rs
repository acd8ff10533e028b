//! Repository for the `webhook_events` dedup table.

use crate::repositories::PgTx;

/// Records which gateway events have already been processed.
pub struct WebhookEventRepo;

impl WebhookEventRepo {
    /// Record a gateway event id if it has not been seen before.
    ///
    /// Returns `true` if the row was inserted (first delivery) and `false`
    /// on a duplicate. Running inside the same transaction as the event's
    /// effects makes "processed" and "recorded" atomic: if processing fails
    /// and the transaction rolls back, the event stays unrecorded and the
    /// gateway's retry will be accepted.
    pub async fn insert_if_new(
        tx: &mut PgTx<'_>,
        gateway_event_id: &str,
        event_type: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (gateway_event_id, event_type) \
             VALUES ($1, $2) ON CONFLICT (gateway_event_id) DO NOTHING",
        )
        .bind(gateway_event_id)
        .bind(event_type)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

//! Event-to-notification persistence.
//!
//! [`NotificationWriter`] subscribes to the platform event bus and writes
//! an in-app notification row for every recipient of every event. Failures
//! are logged and swallowed; notification delivery never feeds back into
//! the operation that published the event.

use tokio::sync::broadcast;
use worklane_db::repositories::NotificationRepo;
use worklane_db::DbPool;
use worklane_events::PlatformEvent;

/// Writes notifications for published platform events.
pub struct NotificationWriter {
    pool: DbPool,
}

impl NotificationWriter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run the main loop.
    ///
    /// Consumes events from `receiver` until the channel closes (i.e. the
    /// [`EventBus`](worklane_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_for_event(&event).await {
                        tracing::error!(
                            error = %e,
                            event_type = %event.event_type,
                            "Failed to write notifications"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification writer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification writer shutting down");
                    break;
                }
            }
        }
    }

    /// Write one notification row per recipient.
    async fn write_for_event(&self, event: &PlatformEvent) -> Result<(), sqlx::Error> {
        for &user_id in &event.recipient_user_ids {
            NotificationRepo::create(
                &self.pool,
                user_id,
                &title_for(&event.event_type),
                &event.event_type,
                &content_for(event),
                &event.payload,
            )
            .await?;
        }
        Ok(())
    }
}

/// Human-readable title for an event type.
fn title_for(event_type: &str) -> String {
    match event_type {
        "milestone.plan_replaced" => "Milestone plan updated".to_string(),
        "milestone.plan_approved" => "Milestone plan approved".to_string(),
        "milestone.plan_locked" => "Milestone plan locked".to_string(),
        "milestone.started" => "Work started".to_string(),
        "milestone.submitted" => "Work submitted for review".to_string(),
        "milestone.changes_requested" => "Changes requested".to_string(),
        "milestone.approved" => "Milestone approved".to_string(),
        "payment.escrowed" => "Funds secured in escrow".to_string(),
        "payment.failed" => "Payment failed".to_string(),
        "payment.released" => "Payment released".to_string(),
        "payment.transferred" => "Payment transferred".to_string(),
        "payment.refunded" => "Payment refunded".to_string(),
        "dispute.opened" => "Dispute opened".to_string(),
        "dispute.resolved" => "Dispute resolved".to_string(),
        "dispute.closed" => "Dispute closed".to_string(),
        "dispute.rejected" => "Dispute rejected".to_string(),
        "dispute.redo" => "Milestone returned for rework".to_string(),
        "dispute.payout_settled" => "Dispute settled with payout".to_string(),
        "project.completed" => "Project completed".to_string(),
        other => other.replace('.', " ").replace('_', " "),
    }
}

/// Short body text; the payload carries the structured detail.
fn content_for(event: &PlatformEvent) -> String {
    match (&event.source_entity_type, event.source_entity_id) {
        (Some(entity), Some(id)) => format!("{}: {entity} #{id}", title_for(&event.event_type)),
        _ => title_for(&event.event_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_event_types_have_titles() {
        assert_eq!(title_for("payment.escrowed"), "Funds secured in escrow");
        assert_eq!(title_for("dispute.redo"), "Milestone returned for rework");
    }

    #[test]
    fn unknown_event_types_fall_back_to_the_name() {
        assert_eq!(title_for("foo.bar_baz"), "foo bar baz");
    }

    #[test]
    fn content_includes_the_source_entity() {
        let event = PlatformEvent::new("payment.escrowed").with_source("payment", 7);
        assert_eq!(content_for(&event), "Funds secured in escrow: payment #7");
    }
}

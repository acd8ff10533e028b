//! Lifecycle engines.
//!
//! Each engine owns one slice of the domain's write paths: milestone plan
//! approval and work review ([`ApprovalEngine`]), escrow funding and
//! settlement ([`EscrowEngine`]), and admin dispute resolution
//! ([`DisputeEngine`]). Every state transition runs inside a transaction
//! that first re-reads the affected rows with `FOR UPDATE`, so concurrent
//! calls against the same entity serialize at the database. Events are
//! published only after the transaction commits.

pub mod approval;
pub mod dispute;
pub mod escrow;

pub use approval::ApprovalEngine;
pub use dispute::{DisputeEngine, LegStatus, PayoutSummary};
pub use escrow::{EscrowEngine, WebhookOutcome};

use std::sync::Arc;

use worklane_events::{EventBus, PlatformEvent};

/// Publish a batch of events collected during a committed transaction.
fn publish_all(bus: &Arc<EventBus>, events: Vec<PlatformEvent>) {
    for event in events {
        bus.publish(event);
    }
}

//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` for plain reads and `&mut Transaction` for anything
//! participating in a state transition. Transition paths re-read rows with
//! `FOR UPDATE` inside the same transaction that writes them, so two
//! concurrent transitions on the same row serialize at the database.

pub mod dispute_repo;
pub mod milestone_repo;
pub mod notification_repo;
pub mod payment_audit_repo;
pub mod payment_repo;
pub mod project_repo;
pub mod user_repo;
pub mod webhook_event_repo;

pub use dispute_repo::DisputeRepo;
pub use milestone_repo::MilestoneRepo;
pub use notification_repo::NotificationRepo;
pub use payment_audit_repo::PaymentAuditRepo;
pub use payment_repo::PaymentRepo;
pub use project_repo::ProjectRepo;
pub use user_repo::UserRepo;
pub use webhook_event_repo::WebhookEventRepo;

/// Shorthand for a Postgres transaction.
pub type PgTx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

//! HTTP handlers, grouped by resource.

pub mod disputes;
pub mod milestones;
pub mod notifications;
pub mod payments;
pub mod projects;
pub mod webhooks;

//! Worklane domain core.
//!
//! Pure domain rules shared by the DB and API layers: the error taxonomy,
//! monetary arithmetic (fee splits, minor-unit conversion), milestone plan
//! validation, and actor roles. No I/O lives here.

pub mod error;
pub mod milestone_plan;
pub mod money;
pub mod roles;
pub mod types;

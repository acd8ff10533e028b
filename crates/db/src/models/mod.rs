//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - `Deserialize` create DTOs for inserts where handlers accept input

pub mod audit;
pub mod dispute;
pub mod milestone;
pub mod notification;
pub mod payment;
pub mod project;
pub mod status;
pub mod user;
pub mod webhook_event;

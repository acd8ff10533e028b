//! Worklane event bus.
//!
//! In-process publish/subscribe hub for platform events. Engines publish
//! fire-and-forget; the notification writer in the API crate subscribes.
//! A failure anywhere downstream never affects the publishing operation.

pub mod bus;

pub use bus::{EventBus, PlatformEvent};

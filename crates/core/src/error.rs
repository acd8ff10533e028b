use crate::types::DbId;

/// Domain-level error taxonomy.
///
/// Every fallible core operation returns one of these. The API layer maps
/// them onto HTTP statuses; callers get enough detail to act (for state
/// errors: the current state and the state the operation requires).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Operation attempted from a state that forbids it. These are reachable
    /// through normal concurrent usage and are expected, not exceptional.
    #[error("{entity} is {current}, operation requires {required}")]
    InvalidState {
        entity: &'static str,
        current: String,
        required: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A prerequisite outside the entity itself is missing, e.g. the
    /// provider has no registered payout destination.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// External payment provider failure, distinguished from local errors so
    /// callers can decide to retry.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build an [`CoreError::InvalidState`] from displayable states.
    pub fn invalid_state(
        entity: &'static str,
        current: impl std::fmt::Display,
        required: &'static str,
    ) -> Self {
        CoreError::InvalidState {
            entity,
            current: current.to_string(),
            required,
        }
    }
}

use crate::types::DbId;

/// Error taxonomy surfaced by the engine to its callers.
///
/// A non-zero process exit is deliberately absent: it is recorded as a
/// `failed` execution, not raised.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl CoreError {
    /// Shorthand used by lookups that miss.
    pub fn not_found(entity: &'static str, id: DbId) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Result alias used across the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

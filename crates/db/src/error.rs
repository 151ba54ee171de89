use scriptd_core::error::CoreError;

/// Failures raised by a [`ScriptStore`](crate::store::ScriptStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Input rejected before reaching storage.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(inner) => inner,
            err @ StoreError::Database(_) => CoreError::Infrastructure(err.to_string()),
        }
    }
}

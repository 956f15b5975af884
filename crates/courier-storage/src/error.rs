/// Errors that can occur within the storage layer.
///
/// The `Store` methods return `anyhow::Result` at the boundary; callers that
/// must discriminate (the dispatcher's idempotency handling, the state
/// machine guard) downcast to this type.
///
/// # Examples
///
/// ```rust
/// use courier_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "notification",
///     id: "n-99".to_string(),
/// };
/// assert!(err.to_string().contains("notification"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// Another notification row already holds this idempotency key.
    /// The existing row is the authoritative result for the request.
    #[error("Storage: duplicate idempotency key '{key}'")]
    DuplicateIdempotency { key: String },

    /// A status change violates the notification state machine
    /// (e.g. SENT back to PENDING outside of force-retry).
    #[error("Storage: invalid status transition {from} -> {to} (id={id})")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// An underlying SeaORM / SQLite error.
    #[error("Storage: database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure (metadata,
    /// allowed_channels, template variables columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A table lock was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// A transaction touched an entity it did not declare in its scope.
    #[error("{entity} {id} is outside the transaction scope")]
    OutOfScope { entity: &'static str, id: String },

    /// An insert collided with an existing record.
    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    /// A write referenced a record that does not exist.
    #[error("{entity} {id} not found")]
    Missing { entity: &'static str, id: String },

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from snapshot persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn out_of_scope(entity: &'static str, id: impl ToString) -> Self {
        Self::OutOfScope {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

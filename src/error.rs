//! Error types shared across the crate.

/// Crate-wide result alias. Components with a dedicated error type (the state
/// store, the API client) declare it explicitly; everything else uses anyhow.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Errors from the persistent state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state database error: {0}")]
    Database(String),

    #[error("corrupt record for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Wrap any redb error variant. redb exposes a separate error type per
    /// operation, so the store maps them all through this one constructor.
    pub fn database(error: impl std::fmt::Display) -> Self {
        Self::Database(error.to_string())
    }
}

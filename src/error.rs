//! Error types for the object store.
//!
//! Every failure surfaced by the repository is one of the variants below.
//! Storage errors other than duplicate keys are passed through untouched, so
//! callers can inspect the underlying `sqlx::Error` when they need to.

/// Errors returned by the repository, the metadata store and the compiler.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A create or rename would violate the name uniqueness constraint.
    #[error("an object named '{name}' already exists")]
    DuplicateName { name: String },

    /// The call itself was malformed (empty predicate, empty name, bad identifier).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other storage failure, unchanged.
    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    /// The cache client failed.
    #[error("cache failure: {0:#}")]
    Cache(anyhow::Error),

    /// A cached payload could not be encoded or decoded.
    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }

    pub fn is_duplicate_name(&self) -> bool {
        matches!(self, StoreError::DuplicateName { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

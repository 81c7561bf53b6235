use thiserror::Error;

/// Typed errors for table operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// Bucket storage or an entry could not be allocated
    #[error("allocation failure")]
    AllocationFailure,
    /// An entry with the same composite key is already linked
    #[error("duplicate key")]
    DuplicateKey,
    /// No entry matches the composite key
    #[error("key not found")]
    NotFound,
    /// The table cannot serve the request in its current state
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

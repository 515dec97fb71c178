//! Blob store error types.
//!
//! Every failure surfaced by [`crate::store::BlobStore`] is one of these
//! variants.  Validation errors are fatal to the single call and never
//! retried internally; `NotFound` carries the hash so callers can tell
//! "never existed" apart from a transient fetch failure.

use thiserror::Error;

use crate::hash::HashError;
use crate::storage::persistor::PersistorError;

/// Errors surfaced by the blob store and its collaborators.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The project identifier matches neither supported shape.
    #[error("bad project id: {id}")]
    InvalidProjectId { id: String },

    /// The hash is not 40 lowercase hexadecimal characters.
    #[error("bad hash: {hash}")]
    InvalidHash { hash: String },

    /// No blob with this hash exists at its expected location.
    #[error("blob not found: {hash}")]
    NotFound { hash: String },

    /// Content hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The object persistor failed for a reason other than "not found"
    /// (not-found conditions are translated into [`BlobError::NotFound`]
    /// before reaching callers).
    #[error(transparent)]
    Persistor(PersistorError),

    /// An object blob could not be decoded as JSON.
    #[error("failed to decode object blob")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal failure (metadata backend, filesystem, ...).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BlobError {
    /// Whether this error means the blob does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

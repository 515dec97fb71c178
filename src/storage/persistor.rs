//! Abstract object persistor trait.
//!
//! Every persistor must implement [`ObjectPersistor`].  The trait works
//! in terms of opaque byte streams with backpressure — whole objects are
//! never buffered in memory on these paths.  Streams do not retry after
//! an initial failure; retry policy belongs to callers.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::io::AsyncRead;

/// A readable byte stream handed out by (or into) a persistor.
pub type ObjectStream = Pin<Box<dyn AsyncRead + Send>>;

/// Options for sending a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Declared content length.  When present, persistors verify the
    /// written byte count against it and fail the send on a mismatch.
    pub source_byte_length: Option<u64>,
}

/// Options for fetching an object stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// First byte offset to read (inclusive).
    pub start: Option<u64>,
    /// Last byte offset to read (inclusive).
    pub end: Option<u64>,
}

/// Errors raised by object persistors.
///
/// `NotFound` is its own variant so callers can translate "object absent
/// at the expected location" into their own typed error instead of
/// treating it as a transient failure.
#[derive(Debug, Error)]
pub enum PersistorError {
    /// No object exists at (bucket, key).
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The number of bytes written differs from the declared length.
    #[error("wrote {actual} bytes to {key} but {declared} were declared")]
    LengthMismatch {
        key: String,
        declared: u64,
        actual: u64,
    },

    /// An I/O failure in the underlying medium.
    #[error("object storage i/o failure")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Async object persistor contract.
pub trait ObjectPersistor: Send + Sync + 'static {
    /// Stream `data` to `key` in `bucket`, replacing any existing object.
    fn send_stream(
        &self,
        bucket: &str,
        key: &str,
        data: ObjectStream,
        opts: SendOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistorError>> + Send + '_>>;

    /// Open a readable stream over the object at `key` in `bucket`.
    fn get_object_stream(
        &self,
        bucket: &str,
        key: &str,
        opts: GetOptions,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStream, PersistorError>> + Send + '_>>;

    /// Copy an object within `bucket` without a read+write round trip
    /// through the caller.
    fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dest_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistorError>> + Send + '_>>;

    /// Delete every object under `prefix` in `bucket`.  Idempotent: a
    /// prefix with no objects is a no-op.
    fn delete_directory(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistorError>> + Send + '_>>;
}

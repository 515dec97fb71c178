//! Abstract metadata backend trait and project-id routing.
//!
//! Any metadata backend must implement [`MetadataBackend`].  The trait
//! uses manually desugared async methods (pinned futures) so it can be
//! used as a trait object behind `Arc`.
//!
//! A project's backend is fixed by the shape of its own identifier and is
//! never migrated implicitly: 24-hex-character ids belong to the document
//! backend, bounded integers to the relational backend.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::blob::Blob;
use crate::errors::BlobError;

/// Largest accepted numeric project id (legacy storage keeps these in a
/// signed 32-bit column).
pub const MAX_NUMERIC_PROJECT_ID: i64 = i32::MAX as i64;

/// A validated project identifier.
///
/// Parsing is total over the error case: any string that is neither a
/// 24-hex-character id nor a bounded integer fails with
/// [`BlobError::InvalidProjectId`], which is fatal to the calling
/// operation and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectId {
    /// Exactly 24 lowercase hexadecimal characters.
    Hex(String),
    /// A positive integer within [`MAX_NUMERIC_PROJECT_ID`].
    Numeric(i64),
}

impl ProjectId {
    /// Parse and validate a raw project identifier.
    pub fn parse(id: &str) -> Result<Self, BlobError> {
        if id.len() == 24 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Ok(ProjectId::Hex(id.to_string()));
        }
        // Strict integer: digits only, no leading zeros, within bound.
        if !id.is_empty()
            && id.bytes().all(|b| b.is_ascii_digit())
            && !(id.len() > 1 && id.starts_with('0'))
        {
            if let Ok(n) = id.parse::<i64>() {
                if (1..=MAX_NUMERIC_PROJECT_ID).contains(&n) {
                    return Ok(ProjectId::Numeric(n));
                }
            }
        }
        Err(BlobError::InvalidProjectId { id: id.to_string() })
    }

    /// The 24-hex form, if this is a document-backend id.
    pub fn as_hex(&self) -> Option<&str> {
        match self {
            ProjectId::Hex(s) => Some(s),
            ProjectId::Numeric(_) => None,
        }
    }

    /// The integer form, if this is a relational-backend id.
    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            ProjectId::Hex(_) => None,
            ProjectId::Numeric(n) => Some(*n),
        }
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectId::Hex(s) => f.write_str(s),
            ProjectId::Numeric(n) => write!(f, "{n}"),
        }
    }
}

/// Result of a cross-project batch metadata read.
#[derive(Debug, Default)]
pub struct ProjectBlobsBatch {
    /// Total number of blob records returned.
    pub n_blobs: usize,
    /// Blob records grouped by owning project.
    pub blobs: HashMap<ProjectId, Vec<Blob>>,
}

impl ProjectBlobsBatch {
    /// Record `blob` under `project`, keeping the total in step.
    pub fn push(&mut self, project: ProjectId, blob: Blob) {
        self.blobs.entry(project).or_default().push(blob);
        self.n_blobs += 1;
    }

    /// Fold another batch result into this one.
    pub fn merge(&mut self, other: ProjectBlobsBatch) {
        for (project, blobs) in other.blobs {
            self.n_blobs += blobs.len();
            self.blobs.entry(project).or_default().extend(blobs);
        }
    }
}

/// Async metadata backend contract.
///
/// All operations are keyed by project id and 40-hex content hash.  The
/// caller (the blob store) validates hash shape before calling in.
pub trait MetadataBackend: Send + Sync + 'static {
    /// Prepare backend state for a new project.  Idempotent: initializing
    /// an already-initialized project is success, not an error.
    fn initialize(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Look up a single blob record.
    fn find_blob(
        &self,
        project: &ProjectId,
        hash: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Blob>>> + Send + '_>>;

    /// Look up many blob records in one pass.  Returned order is
    /// unspecified; missing hashes are silently absent.
    fn find_blobs(
        &self,
        project: &ProjectId,
        hashes: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Blob>>> + Send + '_>>;

    /// Record a blob.  Idempotent: inserting an already-present hash is a
    /// no-op, never a duplicate.
    fn insert_blob(
        &self,
        project: &ProjectId,
        blob: &Blob,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// All blob records for a project.
    fn get_project_blobs(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Blob>>> + Send + '_>>;

    /// All blob records across many projects, grouped by owner.
    fn get_project_blobs_batch(
        &self,
        projects: &[ProjectId],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProjectBlobsBatch>> + Send + '_>>;

    /// Delete every blob record for a project.  Safe to call on a project
    /// with no blobs.
    fn delete_blobs(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

// ── Tests ───────────────────────────────────────────────────────────

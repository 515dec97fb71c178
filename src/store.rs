//! Blob store orchestrator.
//!
//! [`BlobStore`] is the only component application code calls directly.
//! It combines content hashing, backend selection, the two metadata
//! backends, the global-blob deduplication table, and the object
//! persistor to implement put/get/copy/delete of blobs.
//!
//! Concurrency: none of the put operations are mutually exclusive for
//! the same hash.  Two concurrent callers with identical content may both
//! pass the existence check, both upload (same bytes, same key), and both
//! insert metadata (idempotent).  The invariant protected is correctness
//! of the final state, not avoidance of duplicate work.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::blob::{eligible_string_length, Blob, EligibilityBounds};
use crate::config::{BlobStoreConfig, Config};
use crate::errors::BlobError;
use crate::hash::{hash_from_stream, hash_from_string, is_valid_hash};
use crate::metadata::backend::{MetadataBackend, ProjectBlobsBatch, ProjectId};
use crate::metadata::document::DocumentBackend;
use crate::metadata::relational::RelationalBackend;
use crate::storage::local::LocalPersistor;
use crate::storage::memory::MemoryPersistor;
use crate::storage::persistor::{
    GetOptions, ObjectPersistor, ObjectStream, PersistorError, SendOptions,
};

// ── Key derivation ──────────────────────────────────────────────────
//
// These must be bit-exact between write and read.

/// Object key for a project-scoped blob: `{project}/{hash[0:2]}/{hash[2:]}`.
pub fn make_project_key(project: &ProjectId, hash: &str) -> String {
    format!("{}/{}/{}", project, &hash[0..2], &hash[2..])
}

/// Object-key prefix covering every blob of a project.
pub fn make_project_prefix(project: &ProjectId) -> String {
    format!("{project}/")
}

/// Object key for a global blob: `{hash[0:2]}/{hash[2:4]}/{hash[4:]}`.
pub fn make_global_key(hash: &str) -> String {
    format!("{}/{}/{}", &hash[0..2], &hash[2..4], &hash[4..])
}

fn check_hash(hash: &str) -> Result<(), BlobError> {
    if is_valid_hash(hash) {
        Ok(())
    } else {
        Err(BlobError::InvalidHash {
            hash: hash.to_string(),
        })
    }
}

// ── Global blobs ────────────────────────────────────────────────────

/// One entry of the global deduplication table.
#[derive(Debug, Clone)]
pub struct GlobalBlob {
    pub blob: Blob,
    /// A demoted entry still serves reads but no longer short-circuits
    /// writes, so an operator can downgrade a formerly-global blob
    /// without breaking existing references.
    pub demoted: bool,
}

/// Process-wide table of blobs deduplicated across all projects.
///
/// Loaded once at startup and immutable afterwards; picking up new
/// global blobs requires a restart.
#[derive(Debug, Default)]
pub struct GlobalBlobs {
    map: HashMap<String, GlobalBlob>,
}

impl GlobalBlobs {
    /// Load the table from the document backend's `global_blobs`
    /// collection.
    pub fn load(backend: &DocumentBackend) -> anyhow::Result<Self> {
        let mut map = HashMap::new();
        for record in backend.load_global_blobs()? {
            map.insert(
                record.blob.hash().to_string(),
                GlobalBlob {
                    blob: record.blob,
                    demoted: record.demoted,
                },
            );
        }
        Ok(Self { map })
    }

    pub fn get(&self, hash: &str) -> Option<&GlobalBlob> {
        self.map.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.map.contains_key(hash)
    }
}

// ── Services ────────────────────────────────────────────────────────

/// Shared collaborators behind every [`BlobStore`] handle: both metadata
/// backends, the object persistor, and the global-blob table.
pub struct BlobStoreServices {
    config: BlobStoreConfig,
    document: Arc<DocumentBackend>,
    relational: Arc<RelationalBackend>,
    persistor: Arc<dyn ObjectPersistor>,
    global_blobs: GlobalBlobs,
}

impl BlobStoreServices {
    /// Build the full service stack from configuration and load the
    /// global-blob table.
    pub fn open(config: &Config) -> anyhow::Result<Arc<Self>> {
        let document = Arc::new(DocumentBackend::open(&config.metadata.document.path)?);
        let relational = Arc::new(RelationalBackend::open(&config.metadata.relational.path)?);
        let persistor: Arc<dyn ObjectPersistor> = match config.storage.persistor.as_str() {
            "memory" => Arc::new(MemoryPersistor::new()),
            _ => Arc::new(LocalPersistor::new(&config.storage.local.root_dir)?),
        };
        Self::assemble(config.blob_store.clone(), document, relational, persistor)
    }

    /// Assemble services from pre-built collaborators.  This is where
    /// the global-blob table is loaded — once, for the process lifetime.
    pub fn assemble(
        config: BlobStoreConfig,
        document: Arc<DocumentBackend>,
        relational: Arc<RelationalBackend>,
        persistor: Arc<dyn ObjectPersistor>,
    ) -> anyhow::Result<Arc<Self>> {
        let global_blobs = GlobalBlobs::load(&document)?;
        Ok(Arc::new(Self {
            config,
            document,
            relational,
            persistor,
            global_blobs,
        }))
    }

    /// The backend owning `project`, selected purely by id shape.
    pub fn backend_for(&self, project: &ProjectId) -> Arc<dyn MetadataBackend> {
        match project {
            ProjectId::Hex(_) => self.document.clone(),
            ProjectId::Numeric(_) => self.relational.clone(),
        }
    }

    /// A blob store handle scoped to one project.
    pub fn blob_store(self: &Arc<Self>, project_id: &str) -> Result<BlobStore, BlobError> {
        let project = ProjectId::parse(project_id)?;
        let backend = self.backend_for(&project);
        Ok(BlobStore {
            project,
            backend,
            services: Arc::clone(self),
        })
    }

    /// The loaded global-blob table.
    pub fn global_blobs(&self) -> &GlobalBlobs {
        &self.global_blobs
    }

    /// Blob metadata across many projects in one pass, with ids routed
    /// to their owning backends and the results merged.
    pub async fn get_project_blobs_batch(
        &self,
        project_ids: &[&str],
    ) -> Result<ProjectBlobsBatch, BlobError> {
        let mut hex_ids = Vec::new();
        let mut numeric_ids = Vec::new();
        for id in project_ids {
            match ProjectId::parse(id)? {
                p @ ProjectId::Hex(_) => hex_ids.push(p),
                p @ ProjectId::Numeric(_) => numeric_ids.push(p),
            }
        }

        let mut batch = ProjectBlobsBatch::default();
        if !hex_ids.is_empty() {
            batch.merge(self.document.get_project_blobs_batch(&hex_ids).await?);
        }
        if !numeric_ids.is_empty() {
            batch.merge(self.relational.get_project_blobs_batch(&numeric_ids).await?);
        }
        Ok(batch)
    }
}

// ── Blob store ──────────────────────────────────────────────────────

/// Content-addressed blob store scoped to a single project.
pub struct BlobStore {
    project: ProjectId,
    backend: Arc<dyn MetadataBackend>,
    services: Arc<BlobStoreServices>,
}

impl BlobStore {
    /// The project this store is scoped to.
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    fn bounds(&self) -> EligibilityBounds {
        self.services.config.eligibility_bounds()
    }

    fn project_bucket(&self) -> &str {
        &self.services.config.project_bucket
    }

    fn global_bucket(&self) -> &str {
        &self.services.config.global_bucket
    }

    /// Prepare backend state for this project.  Idempotent.
    pub async fn initialize(&self) -> Result<(), BlobError> {
        self.backend.initialize(&self.project).await?;
        Ok(())
    }

    /// The existence check used by the put operations: a non-demoted
    /// global entry wins, otherwise the project's own backend decides.
    async fn find_blob_before_insert(&self, hash: &str) -> Result<Option<Blob>, BlobError> {
        if let Some(entry) = self.services.global_blobs.get(hash) {
            if !entry.demoted {
                return Ok(Some(entry.blob.clone()));
            }
        }
        Ok(self.backend.find_blob(&self.project, hash).await?)
    }

    async fn upload(&self, blob: &Blob, data: ObjectStream) -> Result<(), BlobError> {
        let key = make_project_key(&self.project, blob.hash());
        self.services
            .persistor
            .send_stream(
                self.project_bucket(),
                &key,
                data,
                SendOptions {
                    source_byte_length: Some(blob.byte_length()),
                },
            )
            .await
            .map_err(BlobError::Persistor)
    }

    /// Store a string, deduplicating against global and per-project
    /// records.  Returns the blob metadata, possibly pre-existing.
    pub async fn put_string(&self, content: &str) -> Result<Blob, BlobError> {
        let hash = hash_from_string(content);
        if let Some(existing) = self.find_blob_before_insert(&hash).await? {
            return Ok(existing);
        }

        let string_length = eligible_string_length(content.as_bytes(), &self.bounds());
        let blob = Blob::new(hash, content.len() as u64, string_length);
        let data: ObjectStream = Box::pin(std::io::Cursor::new(content.as_bytes().to_vec()));
        self.upload(&blob, data).await?;
        self.backend.insert_blob(&self.project, &blob).await?;
        Ok(blob)
    }

    /// Store the contents of a file.
    ///
    /// The hash and the string-eligibility check are both computed before
    /// anything is persisted; the file is never re-read once its bytes
    /// have been uploaded.
    pub async fn put_file(&self, path: &Path) -> Result<Blob, BlobError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(anyhow::Error::from)?;
        let byte_length = file
            .metadata()
            .await
            .map_err(anyhow::Error::from)?
            .len();
        let hash = hash_from_stream(byte_length, file).await?;

        if let Some(existing) = self.find_blob_before_insert(&hash).await? {
            return Ok(existing);
        }

        let bounds = self.bounds();
        // Only content within the byte bound is worth decoding at all.
        let string_length = if byte_length <= bounds.max_editable_byte_length {
            let bytes = tokio::fs::read(path).await.map_err(anyhow::Error::from)?;
            eligible_string_length(&bytes, &bounds)
        } else {
            None
        };

        let blob = Blob::new(hash, byte_length, string_length);
        self.put_blob(path, &blob).await?;
        Ok(blob)
    }

    /// Upload a file's bytes and record metadata for an
    /// already-finalized blob.  The caller guarantees the existence
    /// check and string length have been handled; bulk import paths use
    /// this to skip redundant checks.
    pub async fn put_blob(&self, path: &Path, blob: &Blob) -> Result<(), BlobError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(anyhow::Error::from)?;
        self.upload(blob, Box::pin(file)).await?;
        self.backend.insert_blob(&self.project, blob).await?;
        Ok(())
    }

    /// JSON-serialize a value and store it as a string blob.
    pub async fn put_object<T: serde::Serialize>(&self, object: &T) -> Result<Blob, BlobError> {
        let json = serde_json::to_string(object)?;
        self.put_string(&json).await
    }

    /// Open a readable stream over a blob's bytes.
    ///
    /// Resolves the physical location first: a hash known to the global
    /// table (demoted or not) reads from the global bucket, anything
    /// else from the project-scoped key.  A missing object surfaces as
    /// [`BlobError::NotFound`] carrying the hash.  Streams do not retry
    /// after an initial failure; retry policy belongs to the caller.
    pub async fn get_stream(
        &self,
        hash: &str,
        opts: GetOptions,
    ) -> Result<ObjectStream, BlobError> {
        check_hash(hash)?;
        let (bucket, key) = if self.services.global_blobs.contains(hash) {
            (self.global_bucket(), make_global_key(hash))
        } else {
            (self.project_bucket(), make_project_key(&self.project, hash))
        };

        match self
            .services
            .persistor
            .get_object_stream(bucket, &key, opts)
            .await
        {
            Ok(stream) => Ok(stream),
            Err(PersistorError::NotFound { .. }) => Err(BlobError::NotFound {
                hash: hash.to_string(),
            }),
            Err(err) => Err(BlobError::Persistor(err)),
        }
    }

    async fn get_bytes(&self, hash: &str) -> Result<Vec<u8>, BlobError> {
        let mut stream = self.get_stream(hash, GetOptions::default()).await?;
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(buf)
    }

    /// Fetch a blob's content as a string.
    ///
    /// The content is assumed to be text; invalid UTF-8 is replaced
    /// rather than rejected.
    pub async fn get_string(&self, hash: &str) -> Result<String, BlobError> {
        let buf = self.get_bytes(hash).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Fetch and JSON-decode an object blob.
    pub async fn get_object<T: serde::de::DeserializeOwned>(
        &self,
        hash: &str,
    ) -> Result<T, BlobError> {
        let buf = self.get_bytes(hash).await?;
        match serde_json::from_slice(&buf) {
            Ok(value) => Ok(value),
            Err(parse_err) => {
                // Deprecated: some historical object blobs were stored
                // gzip-compressed.  TODO: remove once production metrics
                // confirm this branch is no longer reached.
                use std::io::Read;
                let mut inflated = Vec::new();
                let mut decoder = flate2::read::GzDecoder::new(&buf[..]);
                match decoder.read_to_end(&mut inflated) {
                    Ok(_) => {
                        warn!("getObject: gunzip fallback used for legacy blob {}", hash);
                        Ok(serde_json::from_slice(&inflated)?)
                    }
                    Err(_) => Err(BlobError::Serialization(parse_err)),
                }
            }
        }
    }

    /// Metadata for a single hash.  The global table is consulted first
    /// (demoted entries included); only a miss reaches the backend.
    pub async fn get_blob(&self, hash: &str) -> Result<Option<Blob>, BlobError> {
        check_hash(hash)?;
        if let Some(entry) = self.services.global_blobs.get(hash) {
            return Ok(Some(entry.blob.clone()));
        }
        Ok(self.backend.find_blob(&self.project, hash).await?)
    }

    /// Metadata for many hashes.  Duplicates are collapsed; hashes fully
    /// resolved from the global table never reach the backend at all.
    pub async fn get_blobs(&self, hashes: &[String]) -> Result<Vec<Blob>, BlobError> {
        let mut seen = std::collections::HashSet::new();
        let mut blobs = Vec::new();
        let mut remaining = Vec::new();
        for hash in hashes {
            check_hash(hash)?;
            if !seen.insert(hash.as_str()) {
                continue;
            }
            match self.services.global_blobs.get(hash) {
                Some(entry) => blobs.push(entry.blob.clone()),
                None => remaining.push(hash.clone()),
            }
        }
        if !remaining.is_empty() {
            blobs.extend(self.backend.find_blobs(&self.project, &remaining).await?);
        }
        Ok(blobs)
    }

    /// All blob metadata for this project.
    pub async fn get_project_blobs(&self) -> Result<Vec<Blob>, BlobError> {
        Ok(self.backend.get_project_blobs(&self.project).await?)
    }

    /// Destroy every blob of this project: backend metadata and the
    /// project's whole object-storage prefix, deleted concurrently.
    /// Both deletes are attempted regardless of the other's outcome.
    pub async fn delete_blobs(&self) -> Result<(), BlobError> {
        let prefix = make_project_prefix(&self.project);
        let (metadata, objects) = tokio::join!(
            self.backend.delete_blobs(&self.project),
            self.services
                .persistor
                .delete_directory(self.project_bucket(), &prefix),
        );
        metadata?;
        objects.map_err(BlobError::Persistor)?;
        Ok(())
    }

    /// Copy a blob's bytes to another project using the object store's
    /// native copy, then record metadata in the target project's backend
    /// (selected independently — source and target may differ).
    ///
    /// Intentionally unconditional: no existence check on the target;
    /// correctness relies on `insert_blob` idempotence.
    pub async fn copy_blob(&self, blob: &Blob, target_project_id: &str) -> Result<(), BlobError> {
        let target = ProjectId::parse(target_project_id)?;
        let src_key = make_project_key(&self.project, blob.hash());
        let dest_key = make_project_key(&target, blob.hash());

        match self
            .services
            .persistor
            .copy_object(self.project_bucket(), &src_key, &dest_key)
            .await
        {
            Ok(()) => {}
            Err(PersistorError::NotFound { .. }) => {
                return Err(BlobError::NotFound {
                    hash: blob.hash().to_string(),
                });
            }
            Err(err) => return Err(BlobError::Persistor(err)),
        }

        let target_backend = self.services.backend_for(&target);
        target_backend.insert_blob(&target, blob).await?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

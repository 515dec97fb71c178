//! Relational (tabular) metadata backend.
//!
//! One row per (project id, hash bytes) pair; the relational engine
//! handles large per-project row counts natively, so there is no
//! bucketing or sharding here.  Inserts are idempotent via
//! `INSERT OR IGNORE` on the composite primary key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::backend::{MetadataBackend, ProjectBlobsBatch, ProjectId};
use crate::blob::Blob;

/// Metadata backend backed by a single `project_blobs` table.
pub struct RelationalBackend {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl RelationalBackend {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for
    /// tests).
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.init_db()?;
        Ok(backend)
    }

    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS project_blobs (
                project_id    INTEGER NOT NULL,
                hash_bytes    BLOB NOT NULL,
                byte_length   INTEGER NOT NULL,
                string_length INTEGER,

                PRIMARY KEY (project_id, hash_bytes)
            );
            ",
        )?;
        Ok(())
    }

    fn numeric_id(project: &ProjectId) -> anyhow::Result<i64> {
        project
            .as_numeric()
            .ok_or_else(|| anyhow::anyhow!("relational backend requires an integer project id"))
    }

    fn hash_bytes(hash: &str) -> anyhow::Result<Vec<u8>> {
        Ok(hex::decode(hash)?)
    }

    fn row_to_blob(
        hash_bytes: Vec<u8>,
        byte_length: i64,
        string_length: Option<i64>,
    ) -> Blob {
        Blob::new(
            hex::encode(hash_bytes),
            byte_length as u64,
            string_length.map(|n| n as u64),
        )
    }
}

impl MetadataBackend for RelationalBackend {
    fn initialize(
        &self,
        _project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        // The schema pre-exists; there is no per-project state to create.
        Box::pin(async { Ok(()) })
    }

    fn find_blob(
        &self,
        project: &ProjectId,
        hash: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Blob>>> + Send + '_>> {
        let project = Self::numeric_id(project);
        let hash = hash.to_string();
        Box::pin(async move {
            let project = project?;
            let hash_bytes = Self::hash_bytes(&hash)?;
            let conn = self.conn.lock().expect("mutex poisoned");
            let row = conn
                .query_row(
                    "SELECT hash_bytes, byte_length, string_length FROM project_blobs
                     WHERE project_id = ?1 AND hash_bytes = ?2",
                    params![project, hash_bytes],
                    |row| {
                        Ok(Self::row_to_blob(row.get(0)?, row.get(1)?, row.get(2)?))
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    fn find_blobs(
        &self,
        project: &ProjectId,
        hashes: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Blob>>> + Send + '_>> {
        let project = Self::numeric_id(project);
        let hashes = hashes.to_vec();
        Box::pin(async move {
            let project = project?;
            if hashes.is_empty() {
                return Ok(Vec::new());
            }
            let mut args: Vec<rusqlite::types::Value> = vec![project.into()];
            for hash in &hashes {
                args.push(Self::hash_bytes(hash)?.into());
            }

            let conn = self.conn.lock().expect("mutex poisoned");
            let placeholders = vec!["?"; hashes.len()].join(", ");
            let sql = format!(
                "SELECT hash_bytes, byte_length, string_length FROM project_blobs
                 WHERE project_id = ?1 AND hash_bytes IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
                Ok(Self::row_to_blob(row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            let mut blobs = Vec::new();
            for row in rows {
                blobs.push(row?);
            }
            Ok(blobs)
        })
    }

    fn insert_blob(
        &self,
        project: &ProjectId,
        blob: &Blob,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project = Self::numeric_id(project);
        let blob = blob.clone();
        Box::pin(async move {
            let project = project?;
            let hash_bytes = Self::hash_bytes(blob.hash())?;
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR IGNORE INTO project_blobs
                 (project_id, hash_bytes, byte_length, string_length)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    project,
                    hash_bytes,
                    blob.byte_length() as i64,
                    blob.string_length().map(|n| n as i64)
                ],
            )?;
            Ok(())
        })
    }

    fn get_project_blobs(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Blob>>> + Send + '_>> {
        let project = Self::numeric_id(project);
        Box::pin(async move {
            let project = project?;
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT hash_bytes, byte_length, string_length FROM project_blobs
                 WHERE project_id = ?1",
            )?;
            let rows = stmt.query_map(params![project], |row| {
                Ok(Self::row_to_blob(row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            let mut blobs = Vec::new();
            for row in rows {
                blobs.push(row?);
            }
            Ok(blobs)
        })
    }

    fn get_project_blobs_batch(
        &self,
        projects: &[ProjectId],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProjectBlobsBatch>> + Send + '_>> {
        let projects: anyhow::Result<Vec<i64>> =
            projects.iter().map(Self::numeric_id).collect();
        Box::pin(async move {
            let projects = projects?;
            let mut batch = ProjectBlobsBatch::default();
            if projects.is_empty() {
                return Ok(batch);
            }

            let conn = self.conn.lock().expect("mutex poisoned");
            let placeholders = vec!["?"; projects.len()].join(", ");
            // Ordered scan so rows stream out grouped by project; the
            // grouping below never holds more than the result set itself.
            let sql = format!(
                "SELECT project_id, hash_bytes, byte_length, string_length FROM project_blobs
                 WHERE project_id IN ({placeholders}) ORDER BY project_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(projects.iter()), |row| {
                let project: i64 = row.get(0)?;
                Ok((
                    project,
                    Self::row_to_blob(row.get(1)?, row.get(2)?, row.get(3)?),
                ))
            })?;
            for row in rows {
                let (project, blob) = row?;
                batch.push(ProjectId::Numeric(project), blob);
            }
            Ok(batch)
        })
    }

    fn delete_blobs(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project = Self::numeric_id(project);
        Box::pin(async move {
            let project = project?;
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "DELETE FROM project_blobs WHERE project_id = ?1",
                params![project],
            )?;
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

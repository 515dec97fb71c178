//! Document-oriented sharded metadata backend.
//!
//! Blob records for a project live in a single bucket-document: a JSON
//! object mapping the first three hex digits of the hash to a bounded
//! list of compact records.  Once a bucket reaches capacity, further
//! records for that prefix divert to an overflow table keyed by a
//! composite binary key (the 12 project-id bytes plus a shard nibble,
//! one shard per leading hex digit), with unbounded buckets keyed by hex
//! digits 2-4 of the hash.  This keeps the per-project document small no
//! matter how many blobs a project accumulates.
//!
//! All async trait methods are thin wrappers around synchronous rusqlite
//! calls executed under a `Mutex`.  The conditional bucket append runs
//! inside a single transaction on the guarded connection, standing in
//! for a document store's atomic "append if under capacity" primitive: a
//! hash is discoverable via exactly one of the primary bucket or the
//! overflow bucket, never both.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::backend::{MetadataBackend, ProjectBlobsBatch, ProjectId};
use crate::blob::Blob;

/// Capacity of one primary bucket.
pub const MAX_BLOBS_IN_BUCKET: usize = 8;

/// Compact representation of a blob record inside a bucket document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobRecord {
    h: String,
    b: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<u64>,
}

impl BlobRecord {
    fn from_blob(blob: &Blob) -> Self {
        Self {
            h: blob.hash().to_string(),
            b: blob.byte_length(),
            s: blob.string_length(),
        }
    }

    fn into_blob(self) -> Blob {
        Blob::new(self.h, self.b, self.s)
    }
}

type Buckets = HashMap<String, Vec<BlobRecord>>;

/// A global blob entry as stored by this backend.
#[derive(Debug, Clone)]
pub struct GlobalBlobRecord {
    pub blob: Blob,
    pub demoted: bool,
}

/// Metadata backend backed by a single database file.
pub struct DocumentBackend {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

fn bucket_key(hash: &str) -> &str {
    &hash[0..3]
}

fn shard_digit(hash: &str) -> char {
    hash.as_bytes()[0] as char
}

fn overflow_bucket_key(hash: &str) -> &str {
    &hash[1..4]
}

/// Composite binary key for one overflow shard: the project-id bytes
/// followed by a byte holding the shard's hex digit in its low nibble.
fn shard_key(project_hex: &str, shard: char) -> Vec<u8> {
    hex::decode(format!("{project_hex}0{shard}")).expect("project id and shard digit are hex")
}

/// Recover the owning project id from an overflow shard key.
fn project_of_shard_key(key: &[u8]) -> String {
    hex::encode(&key[..12])
}

impl DocumentBackend {
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

            -- One bucket-document per project.
            CREATE TABLE IF NOT EXISTS project_blob_index (
                project_id TEXT PRIMARY KEY,
                buckets    TEXT NOT NULL DEFAULT '{}'
            );

            -- Overflow tier, keyed by project bytes + shard nibble.
            CREATE TABLE IF NOT EXISTS project_blob_shards (
                shard_key BLOB PRIMARY KEY,
                buckets   TEXT NOT NULL DEFAULT '{}'
            );

            -- Blobs deduplicated across all projects, loaded once at
            -- process start.
            CREATE TABLE IF NOT EXISTS global_blobs (
                hash          TEXT PRIMARY KEY,
                byte_length   INTEGER NOT NULL,
                string_length INTEGER,
                demoted       INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }

    /// Record a blob in the global deduplication table (administrative
    /// seeding; the table is read-mostly after process start).
    pub fn insert_global_blob(&self, blob: &Blob, demoted: bool) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO global_blobs (hash, byte_length, string_length, demoted)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                blob.hash(),
                blob.byte_length() as i64,
                blob.string_length().map(|n| n as i64),
                demoted as i64
            ],
        )?;
        Ok(())
    }

    /// Read every global blob entry.
    pub fn load_global_blobs(&self) -> anyhow::Result<Vec<GlobalBlobRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT hash, byte_length, string_length, demoted FROM global_blobs")?;
        let rows = stmt.query_map([], |row| {
            let hash: String = row.get(0)?;
            let byte_length: i64 = row.get(1)?;
            let string_length: Option<i64> = row.get(2)?;
            let demoted: i64 = row.get(3)?;
            Ok(GlobalBlobRecord {
                blob: Blob::new(
                    hash,
                    byte_length as u64,
                    string_length.map(|n| n as u64),
                ),
                demoted: demoted != 0,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn hex_id(project: &ProjectId) -> anyhow::Result<String> {
        project
            .as_hex()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("document backend requires a 24-hex project id"))
    }

    fn load_buckets(conn: &Connection, project: &str) -> anyhow::Result<Option<Buckets>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT buckets FROM project_blob_index WHERE project_id = ?1",
                params![project],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn load_shard(conn: &Connection, key: &[u8]) -> anyhow::Result<Option<Buckets>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT buckets FROM project_blob_shards WHERE shard_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn find_blob_sync(&self, project: &str, hash: &str) -> anyhow::Result<Option<Blob>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let Some(buckets) = Self::load_buckets(&conn, project)? else {
            return Ok(None);
        };
        let bucket = buckets.get(bucket_key(hash));
        if let Some(records) = bucket {
            if let Some(record) = records.iter().find(|r| r.h == hash) {
                return Ok(Some(record.clone().into_blob()));
            }
            // A full bucket means records for this prefix may have
            // overflowed; probe the shard before concluding "not found".
            if records.len() >= MAX_BLOBS_IN_BUCKET {
                return Self::find_blob_sharded(&conn, project, hash);
            }
        }
        Ok(None)
    }

    fn find_blob_sharded(
        conn: &Connection,
        project: &str,
        hash: &str,
    ) -> anyhow::Result<Option<Blob>> {
        let key = shard_key(project, shard_digit(hash));
        let Some(buckets) = Self::load_shard(conn, &key)? else {
            return Ok(None);
        };
        let record = buckets
            .get(overflow_bucket_key(hash))
            .and_then(|records| records.iter().find(|r| r.h == hash));
        Ok(record.cloned().map(BlobRecord::into_blob))
    }

    fn find_blobs_sync(&self, project: &str, hashes: &[String]) -> anyhow::Result<Vec<Blob>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let buckets = Self::load_buckets(&conn, project)?.unwrap_or_default();

        let mut found = Vec::new();
        // Hashes not resolved from a full primary bucket, grouped by the
        // shard that may hold them.
        let mut shard_probes: HashMap<char, Vec<&String>> = HashMap::new();

        for hash in hashes {
            let records = buckets.get(bucket_key(hash));
            match records {
                Some(records) => {
                    if let Some(record) = records.iter().find(|r| &r.h == hash) {
                        found.push(record.clone().into_blob());
                    } else if records.len() >= MAX_BLOBS_IN_BUCKET {
                        shard_probes.entry(shard_digit(hash)).or_default().push(hash);
                    }
                }
                None => {}
            }
        }

        for (shard, hashes) in shard_probes {
            let key = shard_key(project, shard);
            let Some(shard_buckets) = Self::load_shard(&conn, &key)? else {
                continue;
            };
            for hash in hashes {
                let record = shard_buckets
                    .get(overflow_bucket_key(hash))
                    .and_then(|records| records.iter().find(|r| &r.h == hash));
                if let Some(record) = record {
                    found.push(record.clone().into_blob());
                }
            }
        }

        Ok(found)
    }

    fn insert_blob_sync(&self, project: &str, blob: &Blob) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        // The capacity check and the append must observe the same state:
        // the transaction (serialized by the connection mutex) stands in
        // for the store's atomic conditional-update primitive.
        let tx = conn.unchecked_transaction()?;

        let bucket = bucket_key(blob.hash());
        if let Some(mut buckets) = Self::load_buckets(&tx, project)? {
            let records = buckets.entry(bucket.to_string()).or_default();
            // Add-to-set: a hash already in the primary bucket is a
            // no-op even when the bucket is full — it must never also be
            // written to the overflow tier.
            if records.iter().any(|r| r.h == blob.hash()) {
                tx.commit()?;
                return Ok(());
            }
            if records.len() < MAX_BLOBS_IN_BUCKET {
                records.push(BlobRecord::from_blob(blob));
                tx.execute(
                    "UPDATE project_blob_index SET buckets = ?1 WHERE project_id = ?2",
                    params![serde_json::to_string(&buckets)?, project],
                )?;
                tx.commit()?;
                return Ok(());
            }
        }

        // Bucket full (or project document absent): divert to the
        // overflow shard, upsert + add-to-set.
        let key = shard_key(project, shard_digit(blob.hash()));
        let mut shard_buckets = Self::load_shard(&tx, &key)?.unwrap_or_default();
        let records = shard_buckets
            .entry(overflow_bucket_key(blob.hash()).to_string())
            .or_default();
        if !records.iter().any(|r| r.h == blob.hash()) {
            records.push(BlobRecord::from_blob(blob));
        }
        tx.execute(
            "INSERT OR REPLACE INTO project_blob_shards (shard_key, buckets) VALUES (?1, ?2)",
            params![key, serde_json::to_string(&shard_buckets)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_project_blobs_sync(&self, project: &str) -> anyhow::Result<Vec<Blob>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut blobs = Vec::new();
        if let Some(buckets) = Self::load_buckets(&conn, project)? {
            for records in buckets.into_values() {
                blobs.extend(records.into_iter().map(BlobRecord::into_blob));
            }
        }
        for (_, buckets) in Self::shard_range(&conn, project)? {
            for records in buckets.into_values() {
                blobs.extend(records.into_iter().map(BlobRecord::into_blob));
            }
        }
        Ok(blobs)
    }

    /// All overflow documents for a project: a bounded range scan over
    /// the 16 possible shard keys.
    fn shard_range(
        conn: &Connection,
        project: &str,
    ) -> anyhow::Result<Vec<(Vec<u8>, Buckets)>> {
        let lo = shard_key(project, '0');
        let hi = shard_key(project, 'f');
        let mut stmt = conn.prepare(
            "SELECT shard_key, buckets FROM project_blob_shards
             WHERE shard_key >= ?1 AND shard_key <= ?2",
        )?;
        let rows = stmt.query_map(params![lo, hi], |row| {
            let key: Vec<u8> = row.get(0)?;
            let json: String = row.get(1)?;
            Ok((key, json))
        })?;
        let mut shards = Vec::new();
        for row in rows {
            let (key, json) = row?;
            shards.push((key, serde_json::from_str(&json)?));
        }
        Ok(shards)
    }

    fn get_project_blobs_batch_sync(
        &self,
        projects: &[String],
    ) -> anyhow::Result<ProjectBlobsBatch> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut batch = ProjectBlobsBatch::default();

        if projects.is_empty() {
            return Ok(batch);
        }

        let placeholders = vec!["?"; projects.len()].join(", ");
        let sql = format!(
            "SELECT project_id, buckets FROM project_blob_index WHERE project_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(projects.iter()), |row| {
            let project: String = row.get(0)?;
            let json: String = row.get(1)?;
            Ok((project, json))
        })?;
        for row in rows {
            let (project, json) = row?;
            let buckets: Buckets = serde_json::from_str(&json)?;
            let owner = ProjectId::Hex(project);
            for records in buckets.into_values() {
                for record in records {
                    batch.push(owner.clone(), record.into_blob());
                }
            }
        }

        // Overflow records carry their owner inside the composite key;
        // decode it back out rather than trusting scan order.
        for project in projects {
            for (key, buckets) in Self::shard_range(&conn, project)? {
                let owner = ProjectId::Hex(project_of_shard_key(&key));
                for records in buckets.into_values() {
                    for record in records {
                        batch.push(owner.clone(), record.into_blob());
                    }
                }
            }
        }

        Ok(batch)
    }

    fn delete_blobs_sync(&self, project: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM project_blob_index WHERE project_id = ?1",
            params![project],
        )?;
        let lo = shard_key(project, '0');
        let hi = shard_key(project, 'f');
        tx.execute(
            "DELETE FROM project_blob_shards WHERE shard_key >= ?1 AND shard_key <= ?2",
            params![lo, hi],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl MetadataBackend for DocumentBackend {
    fn initialize(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project = Self::hex_id(project);
        Box::pin(async move {
            let project = project?;
            let conn = self.conn.lock().expect("mutex poisoned");
            // OR IGNORE: re-initializing an existing project is success.
            conn.execute(
                "INSERT OR IGNORE INTO project_blob_index (project_id, buckets) VALUES (?1, '{}')",
                params![project],
            )?;
            Ok(())
        })
    }

    fn find_blob(
        &self,
        project: &ProjectId,
        hash: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Blob>>> + Send + '_>> {
        let project = Self::hex_id(project);
        let hash = hash.to_string();
        Box::pin(async move { self.find_blob_sync(&project?, &hash) })
    }

    fn find_blobs(
        &self,
        project: &ProjectId,
        hashes: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Blob>>> + Send + '_>> {
        let project = Self::hex_id(project);
        let hashes = hashes.to_vec();
        Box::pin(async move { self.find_blobs_sync(&project?, &hashes) })
    }

    fn insert_blob(
        &self,
        project: &ProjectId,
        blob: &Blob,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project = Self::hex_id(project);
        let blob = blob.clone();
        Box::pin(async move { self.insert_blob_sync(&project?, &blob) })
    }

    fn get_project_blobs(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Blob>>> + Send + '_>> {
        let project = Self::hex_id(project);
        Box::pin(async move { self.get_project_blobs_sync(&project?) })
    }

    fn get_project_blobs_batch(
        &self,
        projects: &[ProjectId],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProjectBlobsBatch>> + Send + '_>> {
        let projects: anyhow::Result<Vec<String>> =
            projects.iter().map(Self::hex_id).collect();
        Box::pin(async move { self.get_project_blobs_batch_sync(&projects?) })
    }

    fn delete_blobs(
        &self,
        project: &ProjectId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let project = Self::hex_id(project);
        Box::pin(async move { self.delete_blobs_sync(&project?) })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

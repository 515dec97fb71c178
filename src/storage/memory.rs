//! In-memory object persistor.
//!
//! Holds all objects in a `RwLock<HashMap>`.  Useful for tests and
//! ephemeral deployments; not durable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use super::persistor::{GetOptions, ObjectPersistor, ObjectStream, PersistorError, SendOptions};

type ObjectKey = (String, String);

/// Stores objects in process memory.
#[derive(Default)]
pub struct MemoryPersistor {
    objects: RwLock<HashMap<ObjectKey, Bytes>>,
}

impl MemoryPersistor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects under `prefix` in `bucket`.
    pub fn object_count(&self, bucket: &str, prefix: &str) -> usize {
        let objects = self.objects.read().expect("rwlock poisoned");
        objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .count()
    }
}

impl ObjectPersistor for MemoryPersistor {
    fn send_stream(
        &self,
        bucket: &str,
        key: &str,
        mut data: ObjectStream,
        opts: SendOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistorError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut buf = Vec::new();
            data.read_to_end(&mut buf).await?;

            if let Some(declared) = opts.source_byte_length {
                if buf.len() as u64 != declared {
                    return Err(PersistorError::LengthMismatch {
                        key,
                        declared,
                        actual: buf.len() as u64,
                    });
                }
            }

            let mut objects = self.objects.write().expect("rwlock poisoned");
            objects.insert((bucket, key), Bytes::from(buf));
            Ok(())
        })
    }

    fn get_object_stream(
        &self,
        bucket: &str,
        key: &str,
        opts: GetOptions,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStream, PersistorError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            let Some(data) = objects.get(&(bucket.clone(), key.clone())) else {
                return Err(PersistorError::NotFound { bucket, key });
            };

            let start = opts.start.unwrap_or(0).min(data.len() as u64) as usize;
            let end = match opts.end {
                // Inclusive range end.
                Some(end) => ((end + 1).min(data.len() as u64)) as usize,
                None => data.len(),
            };
            let slice = data.slice(start..end.max(start));
            let stream: ObjectStream = Box::pin(std::io::Cursor::new(slice.to_vec()));
            Ok(stream)
        })
    }

    fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dest_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistorError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let src_key = src_key.to_string();
        let dest_key = dest_key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            let Some(data) = objects.get(&(bucket.clone(), src_key.clone())).cloned() else {
                return Err(PersistorError::NotFound {
                    bucket,
                    key: src_key,
                });
            };
            objects.insert((bucket, dest_key), data);
            Ok(())
        })
    }

    fn delete_directory(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistorError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            objects.retain(|(b, k), _| !(b == &bucket && k.starts_with(&prefix)));
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

//! Local filesystem persistor.
//!
//! Objects are stored as flat files under `root/bucket/key`, with key
//! separators mapped to directories.  All writes follow the
//! temp-fsync-rename pattern so a crash never leaves a partial object at
//! a final key.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use std::future::Future;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::persistor::{GetOptions, ObjectPersistor, ObjectStream, PersistorError, SendOptions};

/// Stores objects on the local filesystem.
pub struct LocalPersistor {
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl LocalPersistor {
    /// Create a new `LocalPersistor` rooted at `root`.
    ///
    /// The directory (and its `.tmp` staging area) will be created if it
    /// does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a bucket + key to an absolute file path, rejecting path
    /// traversal in either part.
    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, PersistorError> {
        for part in [bucket, key] {
            for component in Path::new(part).components() {
                if let std::path::Component::ParentDir = component {
                    return Err(PersistorError::Other(anyhow::anyhow!(
                        "path traversal detected in storage key: {part}"
                    )));
                }
            }
        }
        Ok(self.root.join(bucket).join(key))
    }

    /// Generate a temp file path under `.tmp/` for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }
}

impl ObjectPersistor for LocalPersistor {
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
            let final_path = self.resolve(&bucket, &key)?;
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Temp-fsync-rename: the final key only ever holds a
            // complete object.
            let tmp_path = self.temp_path();
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            let written = tokio::io::copy(&mut data, &mut file).await?;
            file.sync_all().await?;
            drop(file);

            if let Some(declared) = opts.source_byte_length {
                if written != declared {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Err(PersistorError::LengthMismatch {
                        key,
                        declared,
                        actual: written,
                    });
                }
            }

            tokio::fs::rename(&tmp_path, &final_path).await?;
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
            let path = self.resolve(&bucket, &key)?;
            let mut file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(PersistorError::NotFound { bucket, key });
                }
                Err(err) => return Err(err.into()),
            };

            let start = opts.start.unwrap_or(0);
            if start > 0 {
                file.seek(std::io::SeekFrom::Start(start)).await?;
            }
            let stream: ObjectStream = match opts.end {
                // Ranges are inclusive at both ends.
                Some(end) => Box::pin(file.take(end.saturating_sub(start) + 1)),
                None => Box::pin(file),
            };
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
            let src = self.resolve(&bucket, &src_key)?;
            let dest = self.resolve(&bucket, &dest_key)?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::copy(&src, &dest).await {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Err(PersistorError::NotFound {
                        bucket,
                        key: src_key,
                    })
                }
                Err(err) => Err(err.into()),
            }
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
            let path = self.resolve(&bucket, &prefix)?;
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => Ok(()),
                // Idempotent: nothing under the prefix is fine.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn test_persistor() -> (tempfile::TempDir, LocalPersistor) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let persistor = LocalPersistor::new(dir.path()).expect("failed to create persistor");
        (dir, persistor)
    }

    fn stream_of(content: &str) -> ObjectStream {
        Box::pin(std::io::Cursor::new(content.as_bytes().to_vec()))
    }

    async fn read_all(mut stream: ObjectStream) -> Vec<u8> {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_send_and_get_round_trip() {
        let (_dir, persistor) = test_persistor();
        persistor
            .send_stream("bucket", "ab/cdef", stream_of("hello"), SendOptions::default())
            .await
            .unwrap();

        let stream = persistor
            .get_object_stream("bucket", "ab/cdef", GetOptions::default())
            .await
            .unwrap();
        assert_eq!(read_all(stream).await, b"hello");
    }

    #[tokio::test]
    async fn test_get_missing_object_is_typed_not_found() {
        let (_dir, persistor) = test_persistor();
        let err = persistor
            .get_object_stream("bucket", "no/such/key", GetOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, PersistorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let (_dir, persistor) = test_persistor();
        persistor
            .send_stream("bucket", "key", stream_of("0123456789"), SendOptions::default())
            .await
            .unwrap();

        let stream = persistor
            .get_object_stream(
                "bucket",
                "key",
                GetOptions {
                    start: Some(2),
                    end: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(read_all(stream).await, b"2345");
    }

    #[tokio::test]
    async fn test_length_mismatch_fails_send() {
        let (_dir, persistor) = test_persistor();
        let err = persistor
            .send_stream(
                "bucket",
                "key",
                stream_of("hello"),
                SendOptions {
                    source_byte_length: Some(99),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PersistorError::LengthMismatch { .. }));

        // The failed send must not leave an object behind.
        let err = persistor
            .get_object_stream("bucket", "key", GetOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, PersistorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_copy_object() {
        let (_dir, persistor) = test_persistor();
        persistor
            .send_stream("bucket", "proj1/ab/cd", stream_of("data"), SendOptions::default())
            .await
            .unwrap();
        persistor
            .copy_object("bucket", "proj1/ab/cd", "proj2/ab/cd")
            .await
            .unwrap();

        let stream = persistor
            .get_object_stream("bucket", "proj2/ab/cd", GetOptions::default())
            .await
            .unwrap();
        assert_eq!(read_all(stream).await, b"data");
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_not_found() {
        let (_dir, persistor) = test_persistor();
        let err = persistor
            .copy_object("bucket", "missing", "dest")
            .await
            .unwrap_err();
        assert!(matches!(err, PersistorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_directory_scopes_to_prefix() {
        let (_dir, persistor) = test_persistor();
        persistor
            .send_stream("bucket", "proj1/ab/cd", stream_of("one"), SendOptions::default())
            .await
            .unwrap();
        persistor
            .send_stream("bucket", "proj2/ab/cd", stream_of("two"), SendOptions::default())
            .await
            .unwrap();

        persistor.delete_directory("bucket", "proj1").await.unwrap();

        assert!(persistor
            .get_object_stream("bucket", "proj1/ab/cd", GetOptions::default())
            .await
            .is_err());
        assert!(persistor
            .get_object_stream("bucket", "proj2/ab/cd", GetOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_directory_is_ok() {
        let (_dir, persistor) = test_persistor();
        persistor.delete_directory("bucket", "ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_dir, persistor) = test_persistor();
        let err = persistor
            .get_object_stream("bucket", "../../etc/passwd", GetOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, PersistorError::Other(_)));
    }
}

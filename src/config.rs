//! Configuration loading and types for Inkstore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: blob-store behavior, metadata persistence, object storage,
//! batch maintenance tasks, and logging.

use serde::Deserialize;
use std::path::Path;

use crate::blob::EligibilityBounds;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Blob store settings (buckets, text-eligibility bounds).
    #[serde(default)]
    pub blob_store: BlobStoreConfig,

    /// Metadata backend settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch maintenance task settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Blob store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    /// Bucket holding per-project blobs.
    #[serde(default = "default_project_bucket")]
    pub project_bucket: String,

    /// Bucket holding globally deduplicated blobs.
    #[serde(default = "default_global_bucket")]
    pub global_bucket: String,

    /// Content larger than this many bytes is never treated as editable
    /// text.  Align with the deployment's editor limits.
    #[serde(default = "default_max_editable_byte_length")]
    pub max_editable_byte_length: u64,

    /// Upper bound on the UTF-16 code-unit length of editable text.
    #[serde(default = "default_max_string_length")]
    pub max_string_length: u64,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            project_bucket: default_project_bucket(),
            global_bucket: default_global_bucket(),
            max_editable_byte_length: default_max_editable_byte_length(),
            max_string_length: default_max_string_length(),
        }
    }
}

impl BlobStoreConfig {
    /// The text-eligibility bounds carried by this configuration.
    pub fn eligibility_bounds(&self) -> EligibilityBounds {
        EligibilityBounds {
            max_editable_byte_length: self.max_editable_byte_length,
            max_string_length: self.max_string_length,
        }
    }
}

/// Metadata backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Document-oriented backend (24-hex-character project ids).
    #[serde(default)]
    pub document: DocumentBackendConfig,

    /// Relational backend (integer project ids).
    #[serde(default)]
    pub relational: RelationalBackendConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            document: DocumentBackendConfig::default(),
            relational: RelationalBackendConfig::default(),
        }
    }
}

/// Document-oriented backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentBackendConfig {
    /// Path to the backend's database file.
    #[serde(default = "default_document_path")]
    pub path: String,
}

impl Default for DocumentBackendConfig {
    fn default() -> Self {
        Self {
            path: default_document_path(),
        }
    }
}

/// Relational backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationalBackendConfig {
    /// Path to the backend's database file.
    #[serde(default = "default_relational_path")]
    pub path: String,
}

impl Default for RelationalBackendConfig {
    fn default() -> Self {
        Self {
            path: default_relational_path(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Persistor type: `local` or `memory`.
    #[serde(default = "default_storage_persistor")]
    pub persistor: String,

    /// Local filesystem persistor configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persistor: default_storage_persistor(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local filesystem persistor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Batch maintenance task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Number of ids processed per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Bounded worker count within a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry ceiling for failed units within a batch; exceeding it is
    /// fatal for the whole task.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Fixed delay between retry rounds, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            retry_limit: default_retry_limit(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_project_bucket() -> String {
    "project-blobs".to_string()
}

fn default_global_bucket() -> String {
    "global-blobs".to_string()
}

fn default_max_string_length() -> u64 {
    2 * 1024 * 1024
}

fn default_max_editable_byte_length() -> u64 {
    // Worst-case UTF-8 width of BMP text is three bytes per code unit.
    3 * default_max_string_length()
}

fn default_document_path() -> String {
    "./data/document-metadata.db".to_string()
}

fn default_relational_path() -> String {
    "./data/relational-metadata.db".to_string()
}

fn default_storage_persistor() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_batch_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    10
}

fn default_retry_limit() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.blob_store.project_bucket, "project-blobs");
        assert_eq!(config.blob_store.max_string_length, 2 * 1024 * 1024);
        assert_eq!(config.batch.retry_limit, 10);
        assert_eq!(config.storage.persistor, "local");
    }

    #[test]
    fn test_partial_override() {
        let config: Config = serde_yaml::from_str(
            "blob_store:\n  max_string_length: 1024\nstorage:\n  persistor: memory\n",
        )
        .unwrap();
        assert_eq!(config.blob_store.max_string_length, 1024);
        assert_eq!(config.storage.persistor, "memory");
        // Untouched sections keep their defaults.
        assert_eq!(config.batch.batch_size, 100);
    }
}

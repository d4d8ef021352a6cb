//! Configuration management

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default local scratch root for shard files.
pub const DEFAULT_TMP_DIR: &str = "/tmp";

/// Default column delimiter: a non-printable separator that never appears
/// in row values.
pub const DEFAULT_DELIMITER: u8 = 0x01;

/// Default number of shard files per destination table.
pub const DEFAULT_SHARD_COUNT: usize = 5;

/// Default flush threshold for the summed shard-file size, in megabytes.
pub const DEFAULT_MAX_SUM_FILE_SIZE_MB: f64 = 50.0;

/// Default maximum reconnect attempts for warehouse operations.
pub const DEFAULT_MAX_CONNECTION_RETRIES: u32 = 5;

/// Default number of concurrent upload workers.
pub const DEFAULT_UPLOAD_WORKERS: usize = 5;

/// Default placeholder the bulk-load command maps back to NULL.
pub const DEFAULT_NULL_SENTINEL: &str = "*null_string*";

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "granary-staging".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

/// Warehouse bulk-load pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Warehouse connection string (Postgres wire protocol)
    pub database_url: String,

    pub storage: StorageConfig,

    /// IAM role the warehouse assumes when reading from object storage
    pub iam_role: String,

    /// Local scratch root for shard files
    pub tmp_dir: PathBuf,

    /// Single-byte column delimiter for shard files and the bulk load
    pub delimiter: u8,

    /// Shard files per destination table
    pub shard_count_per_table: usize,

    /// Summed shard-file size that triggers a mid-stream push, in MB
    pub max_sum_file_size_mb: f64,

    /// Reconnect attempts before a disconnect becomes fatal
    pub max_connection_retries: u32,

    /// Concurrent upload workers in the object-storage pusher
    pub upload_workers: usize,

    /// Placeholder string the bulk load maps back to NULL
    pub null_sentinel: String,

    /// Cache table-schema lookups per (schema, table)
    pub cache_table_schemas: bool,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost:5439/warehouse".to_string(),
            storage: StorageConfig {
                endpoint: None,
                region: "us-east-1".to_string(),
                bucket: "granary-staging".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                path_style: false,
            },
            iam_role: String::new(),
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
            delimiter: DEFAULT_DELIMITER,
            shard_count_per_table: DEFAULT_SHARD_COUNT,
            max_sum_file_size_mb: DEFAULT_MAX_SUM_FILE_SIZE_MB,
            max_connection_retries: DEFAULT_MAX_CONNECTION_RETRIES,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            null_sentinel: DEFAULT_NULL_SENTINEL.to_string(),
            cache_table_schemas: true,
        }
    }
}

impl WarehouseConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = WarehouseConfig {
            database_url: env::var("WAREHOUSE_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .unwrap_or_else(|_| "postgresql://localhost:5439/warehouse".to_string()),
            storage: StorageConfig::from_env()?,
            iam_role: env::var("WAREHOUSE_IAM_ROLE").unwrap_or_default(),
            tmp_dir: env::var("GRANARY_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_TMP_DIR)),
            delimiter: DEFAULT_DELIMITER,
            shard_count_per_table: env::var("GRANARY_SHARDS_PER_TABLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SHARD_COUNT),
            max_sum_file_size_mb: env::var("GRANARY_MAX_SUM_FILE_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_SUM_FILE_SIZE_MB),
            max_connection_retries: env::var("GRANARY_MAX_CONNECTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTION_RETRIES),
            upload_workers: env::var("GRANARY_UPLOAD_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_UPLOAD_WORKERS),
            null_sentinel: env::var("GRANARY_NULL_SENTINEL")
                .unwrap_or_else(|_| DEFAULT_NULL_SENTINEL.to_string()),
            cache_table_schemas: env::var("GRANARY_CACHE_TABLE_SCHEMAS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("Warehouse URL cannot be empty");
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("Staging bucket cannot be empty");
        }

        if self.shard_count_per_table == 0 {
            anyhow::bail!("Shard count per table must be greater than 0");
        }

        if self.upload_workers == 0 {
            anyhow::bail!("Upload worker count must be greater than 0");
        }

        if self.max_sum_file_size_mb <= 0.0 {
            anyhow::bail!(
                "Flush threshold must be positive, got {} MB",
                self.max_sum_file_size_mb
            );
        }

        if self.null_sentinel.is_empty() {
            anyhow::bail!("Null sentinel cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WarehouseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shard_count_per_table, DEFAULT_SHARD_COUNT);
        assert_eq!(config.delimiter, 0x01);
        assert_eq!(config.null_sentinel, "*null_string*");
        assert!(config.cache_table_schemas);
    }

    #[test]
    fn test_validate_rejects_zero_shards() {
        let config = WarehouseConfig {
            shard_count_per_table: 0,
            ..WarehouseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nonpositive_threshold() {
        let config = WarehouseConfig {
            max_sum_file_size_mb: 0.0,
            ..WarehouseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_minio() {
        let storage = StorageConfig::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(storage.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(storage.bucket, "test-bucket");
        assert!(storage.path_style);
    }
}

//! Concurrent uploads into the staging bucket

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ObjectPusher;
use crate::config::StorageConfig;
use crate::error::EtlError;

/// Uploads sets of local files into one bucket with a bounded worker pool,
/// and lists/deletes staged objects by key prefix.
#[derive(Clone)]
pub struct BucketPusher {
    client: Client,
    bucket: String,
    worker_count: usize,
}

impl BucketPusher {
    /// Build the client and verify the bucket exists.
    ///
    /// Fails fast with [`EtlError::BucketMissing`] so a bad bucket name is
    /// caught before any rows are buffered.
    pub async fn new(
        config: &StorageConfig,
        worker_count: usize,
    ) -> std::result::Result<Self, EtlError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "granary-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        if let Err(err) = client.head_bucket().bucket(&config.bucket).send().await {
            let service_err = err.into_service_error();
            if service_err.is_not_found() {
                return Err(EtlError::BucketMissing(config.bucket.clone()));
            }
            return Err(EtlError::Storage(
                anyhow::Error::new(service_err).context("Failed to check staging bucket"),
            ));
        }

        info!(bucket = %config.bucket, "storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            worker_count: worker_count.max(1),
        })
    }

    /// Build a client without the bucket-existence check, for unit tests
    /// that never touch storage.
    #[cfg(test)]
    pub(crate) fn unchecked_for_tests(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "granary-storage",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style)
            .build();
        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            worker_count: 1,
        }
    }

    /// List all object keys under a prefix.
    pub async fn object_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .context("Failed to list staged objects")?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|k| k.to_string()))
            .collect())
    }

    /// Delete every object under a prefix; returns how many were removed.
    pub async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.object_keys_with_prefix(prefix).await?;
        for key in &keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .context(format!("Failed to delete staged object: {}", key))?;
        }

        debug!(prefix, deleted = keys.len(), "deleted staged objects");

        Ok(keys.len())
    }
}

#[async_trait]
impl ObjectPusher for BucketPusher {
    /// Upload `files` under `remote_folder`.
    ///
    /// Workers pull from a shared list until it drains; zero-byte files are
    /// skipped. Returns the uploaded keys.
    async fn push(&self, remote_folder: &str, files: &[PathBuf]) -> Result<Vec<String>> {
        let pending = Arc::new(Mutex::new(files.to_vec()));
        let uploaded = Arc::new(Mutex::new(Vec::with_capacity(files.len())));

        let mut workers = Vec::with_capacity(self.worker_count);
        for _ in 0..self.worker_count {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let folder = remote_folder.to_string();
            let pending = Arc::clone(&pending);
            let uploaded = Arc::clone(&uploaded);

            workers.push(tokio::spawn(async move {
                loop {
                    let file = { pending.lock().await.pop() };
                    let Some(file) = file else { break };

                    let size = tokio::fs::metadata(&file)
                        .await
                        .context(format!("Failed to stat shard file: {}", file.display()))?
                        .len();
                    if size == 0 {
                        continue;
                    }

                    let name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .context("Shard file path has no file name")?;
                    let key = format!("{}/{}", folder, name);

                    debug!(key = %key, size, "uploading shard file");

                    let body = ByteStream::from_path(&file)
                        .await
                        .context(format!("Failed to open shard file: {}", file.display()))?;
                    client
                        .put_object()
                        .bucket(&bucket)
                        .key(&key)
                        .body(body)
                        .send()
                        .await
                        .context(format!("Failed to upload shard file to {}", key))?;

                    uploaded.lock().await.push(key);
                }
                anyhow::Ok(())
            }));
        }

        for worker in workers {
            worker.await.context("Upload worker panicked")??;
        }

        let keys = uploaded.lock().await.clone();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bucket_error_names_the_bucket() {
        let err = EtlError::BucketMissing("non-existent-bucket-10".to_string());
        assert_eq!(
            err.to_string(),
            "The bucket 'non-existent-bucket-10' doesn't exist"
        );
    }

    #[test]
    fn test_unchecked_client_keeps_bucket_and_single_worker() {
        let pusher = BucketPusher::unchecked_for_tests(&crate::config::StorageConfig::for_minio(
            "http://localhost:9000",
            "test-bucket",
        ));
        assert_eq!(pusher.bucket, "test-bucket");
        assert_eq!(pusher.worker_count, 1);
    }
}

use async_trait::async_trait;
use log::{error, info, warn};
use ssh::RemoteShell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{copy_in_chunks, full_path, sort_newest_first, DestinationSink, StoredArtifact, CHUNK_SIZE};
use crate::{content_type_for, StorageError, StorageProvider};

/// Persists artifacts in an S3-compatible bucket.
///
/// The remote artifact is pulled into a local staging file first, then
/// streamed into a multipart upload; at no point is the whole object in
/// memory. The staging file is removed whatever the outcome.
pub struct ObjectStorageSink {
    provider: Arc<dyn StorageProvider>,
    bucket: String,
    staging_dir: PathBuf,
}

impl ObjectStorageSink {
    pub fn new(provider: Arc<dyn StorageProvider>, bucket: String, staging_dir: PathBuf) -> Self {
        Self {
            provider,
            bucket,
            staging_dir,
        }
    }

    async fn download_to_staging(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        staging_path: &Path,
    ) -> Result<u64, StorageError> {
        let mut reader = source.open_read(remote_artifact_path).await?;
        let mut file = File::create(staging_path).await.map_err(|e| {
            error!("Failed to create staging file {}: {}", staging_path.display(), e);
            StorageError::Io(e)
        })?;
        let bytes = copy_in_chunks(&mut reader, &mut file).await?;
        file.shutdown().await?;
        Ok(bytes)
    }

    async fn transfer(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        staging_path: &Path,
        key: &str,
    ) -> Result<u64, StorageError> {
        let bytes = self
            .download_to_staging(source, remote_artifact_path, staging_path)
            .await?;
        info!(
            "Downloaded {} ({} bytes) from {} into {}",
            remote_artifact_path,
            bytes,
            source.host(),
            staging_path.display()
        );

        let file = File::open(staging_path).await?;
        let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
        self.provider
            .upload_stream(&self.bucket, key, Box::pin(stream), content_type_for(key), None)
            .await?;
        Ok(bytes)
    }
}

#[async_trait]
impl DestinationSink for ObjectStorageSink {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn check(&self) -> Result<(), StorageError> {
        if self.provider.bucket_exists(&self.bucket).await? {
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("bucket {} does not exist", self.bucket)))
        }
    }

    async fn store(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        artifact_name: &str,
        subpath: Option<&str>,
    ) -> Result<StoredArtifact, StorageError> {
        let key = full_path(subpath, artifact_name);
        info!(
            "Starting stream of {} from {} to s3://{}/{}",
            remote_artifact_path,
            source.host(),
            self.bucket,
            key
        );

        let staging = tempfile::Builder::new()
            .prefix("outrider-")
            .tempfile_in(&self.staging_dir)?
            .into_temp_path();

        let result = self
            .transfer(source, remote_artifact_path, &staging, &key)
            .await;

        if let Err(e) = staging.close() {
            warn!("Failed to remove local staging file: {e}");
        }

        match result {
            Ok(bytes) => {
                info!("Stored s3://{}/{} ({} bytes)", self.bucket, key, bytes);
                Ok(StoredArtifact {
                    location: format!("s3://{}/{}", self.bucket, key),
                    bytes,
                })
            }
            Err(e) => {
                error!("Streaming to s3://{}/{} failed: {}", self.bucket, key, e);
                Err(e)
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .provider
            .list_objects(&self.bucket, Some(prefix))
            .await?
            .into_iter()
            .map(|object| object.key)
            .filter(|key| key.starts_with(prefix))
            .collect();
        sort_newest_first(&mut keys);
        Ok(keys)
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.provider.delete_object(&self.bucket, name).await
    }
}

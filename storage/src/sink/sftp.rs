use async_trait::async_trait;
use log::{error, info};
use ssh::{RemoteFileKind, RemoteShell};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use super::{copy_in_chunks, full_path, sort_newest_first, DestinationSink, StoredArtifact};
use crate::StorageError;

/// Persists artifacts on another host over SFTP, piping bytes straight from
/// the source session into the destination session.
pub struct SftpSink {
    destination: Arc<dyn RemoteShell>,
    base_path: String,
}

impl SftpSink {
    pub fn new(destination: Arc<dyn RemoteShell>, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        let trimmed = base_path.trim_end_matches('/');
        Self {
            destination,
            base_path: if trimmed.is_empty() && base_path.starts_with('/') {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    fn absolute(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return self.base_path.clone();
        }
        match self.base_path.as_str() {
            "" => relative.to_string(),
            "/" => format!("/{relative}"),
            base => format!("{base}/{relative}"),
        }
    }

    async fn transfer(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        target: &str,
    ) -> Result<u64, StorageError> {
        if let Some((parent, _)) = target.rsplit_once('/') {
            if !parent.is_empty() {
                self.destination.create_dir_all(parent).await?;
            }
        }
        let mut reader = source.open_read(remote_artifact_path).await?;
        let mut writer = self.destination.open_write(target).await?;
        let bytes = copy_in_chunks(&mut reader, &mut writer).await?;
        writer.shutdown().await?;
        Ok(bytes)
    }
}

#[async_trait]
impl DestinationSink for SftpSink {
    fn name(&self) -> &str {
        "SFTP"
    }

    async fn check(&self) -> Result<(), StorageError> {
        match self.destination.stat(&self.absolute("")).await? {
            Some(stat) if stat.kind == RemoteFileKind::Directory => Ok(()),
            Some(_) => Err(StorageError::Configuration(format!(
                "{} on {} is not a directory",
                self.base_path,
                self.destination.host()
            ))),
            None => Err(StorageError::NotFound(format!(
                "{} does not exist on {}",
                self.base_path,
                self.destination.host()
            ))),
        }
    }

    async fn store(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        artifact_name: &str,
        subpath: Option<&str>,
    ) -> Result<StoredArtifact, StorageError> {
        let target = self.absolute(&full_path(subpath, artifact_name));
        info!(
            "Starting stream of {} from {} to sftp://{}{}",
            remote_artifact_path,
            source.host(),
            self.destination.host(),
            target
        );

        match self.transfer(source, remote_artifact_path, &target).await {
            Ok(bytes) => {
                info!("Stored {} on {} ({} bytes)", target, self.destination.host(), bytes);
                Ok(StoredArtifact {
                    location: format!("sftp://{}{}", self.destination.host(), target),
                    bytes,
                })
            }
            Err(e) => {
                error!("Streaming to {} on {} failed: {}", target, self.destination.host(), e);
                Err(e)
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((dir, name_prefix)) => (Some(dir), name_prefix),
            None => (None, prefix),
        };
        let absolute_dir = self.absolute(dir.unwrap_or(""));

        match self.destination.stat(&absolute_dir).await? {
            Some(stat) if stat.kind == RemoteFileKind::Directory => {}
            _ => return Ok(Vec::new()),
        }

        let mut names: Vec<String> = self
            .destination
            .list_dir(&absolute_dir)
            .await?
            .into_iter()
            .filter(|name| name.starts_with(name_prefix))
            .map(|name| full_path(dir, &name))
            .collect();
        sort_newest_first(&mut names);
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.destination
            .delete(&self.absolute(name), false)
            .await
            .map_err(StorageError::from)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.destination.close().await.map_err(StorageError::from)
    }
}

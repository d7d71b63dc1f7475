//! Destination sinks: where a finished artifact gets persisted.

mod object;
mod sftp;

pub use object::ObjectStorageSink;
pub use sftp::SftpSink;

use async_trait::async_trait;
use ssh::RemoteShell;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::StorageError;

/// Chunk size used when moving artifact bytes between streams.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Where an artifact ended up and how many bytes were moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub location: String,
    pub bytes: u64,
}

#[async_trait]
pub trait DestinationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap reachability probe for the destination.
    async fn check(&self) -> Result<(), StorageError>;

    /// Streams `remote_artifact_path` from `source` to
    /// `{subpath}/{artifact_name}` on the destination.
    ///
    /// Failures come back as an error value, never a panic, so the caller
    /// can still clean up and record what went wrong.
    async fn store(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        artifact_name: &str,
        subpath: Option<&str>,
    ) -> Result<StoredArtifact, StorageError>;

    /// Names starting with `prefix`, newest first (lexicographically descending).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Releases any session the sink holds open.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Joins an optional destination subpath and a file name.
pub fn full_path(subpath: Option<&str>, name: &str) -> String {
    match subpath.map(|s| s.trim_matches('/')).filter(|s| !s.is_empty()) {
        Some(subpath) => format!("{subpath}/{name}"),
        None => name.to_string(),
    }
}

pub(crate) fn sort_newest_first(names: &mut [String]) {
    names.sort_unstable_by(|a, b| b.cmp(a));
}

/// Copies `reader` into `writer` in `CHUNK_SIZE` pieces and returns the byte count.
pub(crate) async fn copy_in_chunks<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes_written = 0u64;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        bytes_written += n as u64;
    }
    writer.flush().await?;
    Ok(bytes_written)
}

#[cfg(test)]
pub(crate) mod memory;

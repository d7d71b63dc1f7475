//! In-memory stand-ins for a remote host and an S3 bucket.

use async_trait::async_trait;
use futures::StreamExt;
use ssh::{CommandOutput, RemoteFileKind, RemoteReader, RemoteShell, RemoteStat, RemoteWriter, SshError};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use crate::{ByteStream, Metadata, StorageError, StorageObject, StorageProvider};

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

#[derive(Default, Clone)]
pub struct MemoryShell {
    pub files: Files,
}

impl MemoryShell {
    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_vec());
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

struct MemoryWriter {
    path: String,
    files: Files,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.files
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RemoteShell for MemoryShell {
    fn host(&self) -> &str {
        "memory"
    }

    async fn execute(&self, _command: &str) -> Result<CommandOutput, SshError> {
        Ok(CommandOutput::new(""))
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>, SshError> {
        let files = self.files.lock().unwrap();
        if let Some(contents) = files.get(path) {
            return Ok(Some(RemoteStat {
                kind: RemoteFileKind::File,
                size: contents.len() as u64,
            }));
        }
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(files
            .keys()
            .any(|k| k.starts_with(&dir_prefix))
            .then_some(RemoteStat {
                kind: RemoteFileKind::Directory,
                size: 0,
            }))
    }

    async fn upload(&self, contents: &[u8], remote_path: &str) -> Result<(), SshError> {
        self.files.lock().unwrap().insert(remote_path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SshError> {
        self.file(remote_path)
            .ok_or_else(|| SshError::SftpError(format!("no such file: {remote_path}")))
    }

    async fn open_read(&self, remote_path: &str) -> Result<RemoteReader, SshError> {
        let contents = self.download(remote_path).await?;
        Ok(Box::pin(io::Cursor::new(contents)))
    }

    async fn open_write(&self, remote_path: &str) -> Result<RemoteWriter, SshError> {
        self.files.lock().unwrap().insert(remote_path.to_string(), Vec::new());
        Ok(Box::pin(MemoryWriter {
            path: remote_path.to_string(),
            files: self.files.clone(),
        }))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, SshError> {
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter_map(|k| k.strip_prefix(&dir_prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn create_dir_all(&self, _path: &str) -> Result<(), SshError> {
        Ok(())
    }

    async fn delete(&self, path: &str, _recursive: bool) -> Result<(), SshError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn close(&self) -> Result<(), SshError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProvider {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub fail_uploads: bool,
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn bucket_exists(&self, _bucket: &str) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn list_objects(
        &self,
        _bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, StorageError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .map(|(k, v)| StorageObject {
                key: k.clone(),
                size: v.len() as u64,
                last_modified: None,
                etag: None,
            })
            .collect())
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn upload_stream(
        &self,
        _bucket: &str,
        key: &str,
        mut stream: ByteStream,
        _content_type: Option<&str>,
        _metadata: Option<Metadata>,
    ) -> Result<(), StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Aws("simulated quota exceeded".to_string()));
        }
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }
}

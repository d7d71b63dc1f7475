use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SshError;

pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;
pub type RemoteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: Some(0),
        }
    }

    /// True when the remote side reported exit status 0.
    pub fn ok(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Stdout followed by stderr, the way an interactive shell would show them.
    pub fn text(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileKind {
    File,
    Directory,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: RemoteFileKind,
    pub size: u64,
}

/// Operations the backup engine needs from a remote host.
///
/// A non-zero exit status is not an error: `execute` hands back whatever the
/// command printed and callers decide what counts as failure. Errors are
/// reserved for transport problems and for calls made without a session.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Host this shell talks to, used for logging and status reporting.
    fn host(&self) -> &str;

    async fn execute(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Returns `None` when nothing exists at `path`.
    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>, SshError>;

    async fn upload(&self, contents: &[u8], remote_path: &str) -> Result<(), SshError>;

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SshError>;

    async fn open_read(&self, remote_path: &str) -> Result<RemoteReader, SshError>;

    /// Opens `remote_path` for writing, truncating any existing file.
    async fn open_write(&self, remote_path: &str) -> Result<RemoteWriter, SshError>;

    /// File names (not paths) directly inside `path`.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, SshError>;

    async fn create_dir_all(&self, path: &str) -> Result<(), SshError>;

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), SshError>;

    async fn close(&self) -> Result<(), SshError>;
}

/// Quotes `arg` for a POSIX shell.
pub fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

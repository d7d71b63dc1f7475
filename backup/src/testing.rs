//! Scripted stand-ins for remote hosts, destinations and time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ssh::{
    CommandOutput, ConnectionSettings, RemoteFileKind, RemoteReader, RemoteShell, RemoteStat,
    RemoteWriter, SshError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{full_path, DestinationSink, StorageError, StoredArtifact};

use crate::clock::Clock;
use crate::ports::Connector;
use crate::task::DestinationTarget;
use crate::BackupError;

struct Rule {
    needle: String,
    replies: Vec<CommandOutput>,
    served: usize,
}

/// A remote host answering commands from a script.
///
/// The first rule whose needle occurs in a command answers it; sequences
/// repeat their last reply. Unscripted commands succeed with no output.
#[derive(Default)]
pub struct FakeShell {
    host: String,
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    deleted: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeShell {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }

    fn rule(self, needle: &str, replies: Vec<CommandOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            replies,
            served: 0,
        });
        self
    }

    pub fn on(self, needle: &str, stdout: &str) -> Self {
        self.rule(needle, vec![CommandOutput::new(stdout)])
    }

    pub fn on_failure(self, needle: &str, stderr: &str, exit_status: u32) -> Self {
        self.rule(
            needle,
            vec![CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_status: Some(exit_status),
            }],
        )
    }

    pub fn on_sequence(self, needle: &str, stdouts: &[&str]) -> Self {
        self.rule(needle, stdouts.iter().map(|s| CommandOutput::new(*s)).collect())
    }

    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_vec());
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.dirs.lock().unwrap().insert(path.trim_end_matches('/').to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, SshError> {
        if self.is_closed() {
            return Err(SshError::NotConnected);
        }
        self.commands.lock().unwrap().push(command.to_string());
        let mut rules = self.rules.lock().unwrap();
        let reply = rules
            .iter_mut()
            .find(|rule| command.contains(&rule.needle))
            .map(|rule| {
                let index = rule.served.min(rule.replies.len() - 1);
                rule.served += 1;
                rule.replies[index].clone()
            });
        Ok(reply.unwrap_or_else(|| CommandOutput::new("")))
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>, SshError> {
        let path = path.trim_end_matches('/');
        if let Some(contents) = self.files.lock().unwrap().get(path) {
            return Ok(Some(RemoteStat {
                kind: RemoteFileKind::File,
                size: contents.len() as u64,
            }));
        }
        Ok(self.dirs.lock().unwrap().contains(path).then_some(RemoteStat {
            kind: RemoteFileKind::Directory,
            size: 4096,
        }))
    }

    async fn upload(&self, contents: &[u8], remote_path: &str) -> Result<(), SshError> {
        self.uploads
            .lock()
            .unwrap()
            .push((remote_path.to_string(), contents.to_vec()));
        self.files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), contents.to_vec());
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

    async fn open_write(&self, _remote_path: &str) -> Result<RemoteWriter, SshError> {
        Ok(Box::pin(tokio::io::sink()))
    }

    async fn list_dir(&self, _path: &str) -> Result<Vec<String>, SshError> {
        Ok(Vec::new())
    }

    async fn create_dir_all(&self, path: &str) -> Result<(), SshError> {
        self.dirs.lock().unwrap().insert(path.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str, _recursive: bool) -> Result<(), SshError> {
        self.deleted.lock().unwrap().push(path.to_string());
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn close(&self) -> Result<(), SshError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    names: BTreeSet<String>,
    stored: Vec<String>,
    fail_store: bool,
    fail_delete: bool,
    fail_list: bool,
    closed: bool,
}

/// A destination keeping only artifact names. Clones share state.
#[derive(Clone, Default)]
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn with_existing(self, names: &[String]) -> Self {
        for name in names {
            self.insert(name);
        }
        self
    }

    pub fn insert(&self, name: &str) {
        self.state.lock().unwrap().names.insert(name.to_string());
    }

    pub fn failing_store(self) -> Self {
        self.state.lock().unwrap().fail_store = true;
        self
    }

    pub fn failing_deletes(self) -> Self {
        self.state.lock().unwrap().fail_delete = true;
        self
    }

    pub fn failing_list(self) -> Self {
        self.state.lock().unwrap().fail_list = true;
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().unwrap().names.iter().cloned().collect()
    }

    pub fn stored(&self) -> Vec<String> {
        self.state.lock().unwrap().stored.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl DestinationSink for FakeSink {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn store(
        &self,
        source: &dyn RemoteShell,
        remote_artifact_path: &str,
        artifact_name: &str,
        subpath: Option<&str>,
    ) -> Result<StoredArtifact, StorageError> {
        if self.state.lock().unwrap().fail_store {
            return Err(StorageError::Aws("simulated quota exceeded".to_string()));
        }
        let bytes = source
            .stat(remote_artifact_path)
            .await?
            .map(|stat| stat.size)
            .unwrap_or(0);
        let key = full_path(subpath, artifact_name);
        let mut state = self.state.lock().unwrap();
        state.names.insert(key.clone());
        state.stored.push(key.clone());
        Ok(StoredArtifact {
            location: format!("fake://{key}"),
            bytes,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(StorageError::Remote("listing refused".to_string()));
        }
        Ok(state
            .names
            .iter()
            .rev()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(StorageError::Remote(format!("permission denied: {name}")));
        }
        state.names.remove(name);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// A clock that only moves when slept on.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
    }
}

/// Hands out the same fake shell and sink to every execution.
pub struct FakeConnector {
    pub shell: Arc<FakeShell>,
    pub sink: FakeSink,
    pub refuse_connection: bool,
    pub connections: Mutex<Vec<ConnectionSettings>>,
}

impl FakeConnector {
    pub fn new(shell: FakeShell, sink: FakeSink) -> Self {
        Self {
            shell: Arc::new(shell),
            sink,
            refuse_connection: false,
            connections: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect_source(
        &self,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn RemoteShell>, BackupError> {
        let host = settings.host.clone();
        self.connections.lock().unwrap().push(settings);
        if self.refuse_connection {
            return Err(BackupError::Connection(format!("{host}: connection refused")));
        }
        Ok(self.shell.clone())
    }

    async fn open_sink(
        &self,
        _target: &DestinationTarget,
    ) -> Result<Box<dyn DestinationSink>, BackupError> {
        Ok(Box::new(self.sink.clone()))
    }
}

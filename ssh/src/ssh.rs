use async_trait::async_trait;
use log;
use russh::keys::*;
use russh::*;
use russh_sftp::client::SftpSession;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::shell::{quote, CommandOutput, RemoteFileKind, RemoteReader, RemoteShell, RemoteStat, RemoteWriter};
use crate::SshError;

/// Everything needed to open a session to one remote host.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_path: PathBuf,
    passphrase: Option<String>,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, username: impl Into<String>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            private_key_path: private_key_path.into(),
            passphrase: None,
            connect_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_passphrase(mut self, passphrase: String) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn has_passphrase(&self) -> bool {
        self.passphrase.as_deref().is_some_and(|p| !p.is_empty())
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key_path", &self.private_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

struct Client;

impl client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH session with an SFTP subsystem attached.
pub struct SshSession {
    settings: ConnectionSettings,
    handle: Mutex<Option<Arc<client::Handle<Client>>>>,
    sftp: Mutex<Option<Arc<SftpSession>>>,
}

impl fmt::Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// A session object that has not been connected. Every call fails with
    /// `NotConnected` until replaced by a connected one.
    pub fn disconnected(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            handle: Mutex::new(None),
            sftp: Mutex::new(None),
        }
    }

    pub async fn connect(settings: ConnectionSettings) -> Result<Self, SshError> {
        let key_pair = load_secret_key(&settings.private_key_path, settings.passphrase.as_deref())
            .map_err(|e| {
                SshError::ConfigurationError(format!(
                    "unable to load private key {}: {}",
                    settings.private_key_path.display(),
                    e
                ))
            })?;

        let timeout = settings.connect_timeout;
        let (handle, sftp) = tokio::time::timeout(timeout, Self::establish(&settings, key_pair))
            .await
            .map_err(|_| {
                SshError::ConnectionError(format!(
                    "timed out after {}s connecting to {}:{}",
                    timeout.as_secs(),
                    settings.host,
                    settings.port
                ))
            })??;

        log::info!(
            "Connected to {}@{}:{}",
            settings.username,
            settings.host,
            settings.port
        );

        Ok(Self {
            settings,
            handle: Mutex::new(Some(Arc::new(handle))),
            sftp: Mutex::new(Some(Arc::new(sftp))),
        })
    }

    /// Handshake, authentication and the SFTP subsystem, bounded as one unit
    /// by the connect timeout.
    async fn establish(
        settings: &ConnectionSettings,
        key_pair: PrivateKey,
    ) -> Result<(client::Handle<Client>, SftpSession), SshError> {
        let handle = Self::authenticate(settings, key_pair).await?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok((handle, sftp))
    }

    async fn authenticate(
        settings: &ConnectionSettings,
        key_pair: PrivateKey,
    ) -> Result<client::Handle<Client>, SshError> {
        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, (settings.host.as_str(), settings.port), Client)
            .await
            .map_err(|e| {
                SshError::ConnectionError(format!("{}:{}: {}", settings.host, settings.port, e))
            })?;

        let auth_res = session
            .authenticate_publickey(
                &settings.username,
                PrivateKeyWithHashAlg::new(
                    Arc::new(key_pair),
                    session.best_supported_rsa_hash().await?.flatten(),
                ),
            )
            .await?;

        if !auth_res.success() {
            return Err(SshError::AuthenticationError(format!(
                "public key rejected for {}@{}",
                settings.username, settings.host
            )));
        }

        Ok(session)
    }

    async fn handle(&self) -> Result<Arc<client::Handle<Client>>, SshError> {
        self.handle.lock().await.clone().ok_or(SshError::NotConnected)
    }

    async fn sftp(&self) -> Result<Arc<SftpSession>, SshError> {
        self.sftp.lock().await.clone().ok_or(SshError::NotConnected)
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    fn host(&self) -> &str {
        &self.settings.host
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, SshError> {
        let handle = self.handle().await?;
        let mut channel = handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>, SshError> {
        let sftp = self.sftp().await?;
        if !sftp.try_exists(path).await? {
            return Ok(None);
        }
        let attrs = sftp.metadata(path).await?;
        let kind = if attrs.is_dir() {
            RemoteFileKind::Directory
        } else if attrs.is_regular() {
            RemoteFileKind::File
        } else {
            RemoteFileKind::Other
        };
        Ok(Some(RemoteStat {
            kind,
            size: attrs.size.unwrap_or(0),
        }))
    }

    async fn upload(&self, contents: &[u8], remote_path: &str) -> Result<(), SshError> {
        let mut writer = self.open_write(remote_path).await?;
        writer.write_all(contents).await?;
        writer.shutdown().await?;
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SshError> {
        let mut reader = self.open_read(remote_path).await?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    async fn open_read(&self, remote_path: &str) -> Result<RemoteReader, SshError> {
        let file = self.sftp().await?.open(remote_path).await?;
        Ok(Box::pin(file))
    }

    async fn open_write(&self, remote_path: &str) -> Result<RemoteWriter, SshError> {
        let file = self.sftp().await?.create(remote_path).await?;
        Ok(Box::pin(file))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, SshError> {
        let entries = self.sftp().await?.read_dir(path).await?;
        Ok(entries
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    async fn create_dir_all(&self, path: &str) -> Result<(), SshError> {
        let sftp = self.sftp().await?;
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if current.is_empty() && !path.starts_with('/') {
                current.push_str(component);
            } else {
                current.push('/');
                current.push_str(component);
            }
            if !sftp.try_exists(current.as_str()).await? {
                sftp.create_dir(current.as_str()).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), SshError> {
        if recursive {
            let output = self.execute(&format!("rm -rf {}", quote(path))).await?;
            if !output.ok() {
                return Err(SshError::SftpError(format!(
                    "rm -rf {} failed: {}",
                    path,
                    output.text().trim()
                )));
            }
            return Ok(());
        }
        self.sftp().await?.remove_file(path).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SshError> {
        if let Some(sftp) = self.sftp.lock().await.take() {
            if let Err(e) = sftp.close().await {
                log::warn!("Failed to close SFTP subsystem on {}: {}", self.settings.host, e);
            }
        }
        if let Some(handle) = self.handle.lock().await.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await?;
            log::info!("Disconnected from {}", self.settings.host);
        }
        Ok(())
    }
}

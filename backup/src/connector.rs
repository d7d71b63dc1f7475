use async_trait::async_trait;
use log::info;
use ssh::{ConnectionSettings, RemoteShell, SshSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{DestinationSink, ObjectStorageSink, S3Provider, SftpSink};

use crate::ports::Connector;
use crate::task::DestinationTarget;
use crate::BackupError;

/// Opens real SSH sessions and destination sinks.
pub struct SshConnector {
    private_key: PathBuf,
    passphrase: Option<String>,
    connect_timeout: Duration,
    local_staging_dir: PathBuf,
}

impl SshConnector {
    pub fn new(
        private_key: PathBuf,
        passphrase: Option<String>,
        connect_timeout: Duration,
        local_staging_dir: PathBuf,
    ) -> Self {
        Self {
            private_key,
            passphrase,
            connect_timeout,
            local_staging_dir,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect_source(
        &self,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn RemoteShell>, BackupError> {
        let session = SshSession::connect(settings).await?;
        Ok(Arc::new(session))
    }

    async fn open_sink(
        &self,
        target: &DestinationTarget,
    ) -> Result<Box<dyn DestinationSink>, BackupError> {
        match target {
            DestinationTarget::S3 {
                bucket,
                region,
                endpoint,
                access_key,
                secret_key,
            } => {
                let provider = S3Provider::new(
                    region.clone(),
                    endpoint.clone(),
                    access_key.clone(),
                    secret_key.as_ref().map(|s| s.expose().to_string()),
                )
                .await?;
                info!("Using S3 bucket {bucket}");
                Ok(Box::new(ObjectStorageSink::new(
                    Arc::new(provider),
                    bucket.clone(),
                    self.local_staging_dir.clone(),
                )))
            }
            DestinationTarget::Sftp {
                host,
                port,
                username,
                base_path,
                private_key,
                passphrase,
            } => {
                let key = private_key
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.private_key.clone());
                let mut settings = ConnectionSettings::new(host.clone(), username.clone(), key)
                    .with_port(*port)
                    .with_connect_timeout(self.connect_timeout);
                let passphrase = passphrase
                    .as_ref()
                    .map(|p| p.expose().to_string())
                    .or_else(|| self.passphrase.clone());
                if let Some(passphrase) = passphrase {
                    settings = settings.with_passphrase(passphrase);
                }

                let session = SshSession::connect(settings)
                    .await
                    .map_err(|e| BackupError::Transfer(format!("destination {host}: {e}")))?;
                info!("Connected to SFTP destination {host}:{port}");
                Ok(Box::new(SftpSink::new(Arc::new(session), base_path.clone())))
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::artifact::{ArtifactKind, Namespace};
use crate::BackupError;

pub const DEFAULT_BACKUPS_TO_KEEP: u32 = 5;

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// One configured backup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: String,
    pub label: String,
    pub server: RemoteServer,
    pub source: BackupSource,
    pub destination: DestinationTarget,
    /// Folder under the destination root the artifacts go into.
    #[serde(default)]
    pub store_path: Option<String>,
    #[serde(default = "default_backups_to_keep")]
    pub max_backups_to_keep: u32,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

fn default_backups_to_keep() -> u32 {
    DEFAULT_BACKUPS_TO_KEEP
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServer {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// MySQL and MariaDB.
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl DatabaseEngine {
    pub fn client_binary(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Postgres => "psql",
        }
    }

    pub fn dump_binary(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysqldump",
            DatabaseEngine::Postgres => "pg_dump",
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseEngine::Mysql => write!(f, "MySQL"),
            DatabaseEngine::Postgres => write!(f, "PostgreSQL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupSource {
    Files {
        path: String,
    },
    Database {
        database_name: String,
        /// Expected engine; detected on the host when absent.
        #[serde(default)]
        engine: Option<DatabaseEngine>,
        #[serde(default)]
        excluded_tables: Vec<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<Secret>,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationTarget {
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key: Option<String>,
        #[serde(default)]
        secret_key: Option<Secret>,
    },
    Sftp {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        base_path: String,
        /// Falls back to the engine's key when absent.
        #[serde(default)]
        private_key: Option<String>,
        #[serde(default)]
        passphrase: Option<Secret>,
    },
}

impl DestinationTarget {
    pub fn describe(&self) -> String {
        match self {
            DestinationTarget::S3 { bucket, .. } => format!("s3://{bucket}"),
            DestinationTarget::Sftp {
                host, base_path, ..
            } => format!("sftp://{host}{base_path}"),
        }
    }
}

fn require(value: &str, what: &str) -> Result<(), BackupError> {
    if value.trim().is_empty() {
        Err(BackupError::Configuration(format!("{what} must not be empty")))
    } else {
        Ok(())
    }
}

impl BackupTask {
    /// Checks the record invariants before anything touches the network.
    pub fn validate(&self) -> Result<(), BackupError> {
        require(&self.id, "task id")?;
        require(&self.server.host, "server host")?;
        require(&self.server.username, "server username")?;

        match &self.source {
            BackupSource::Files { path } => require(path, "source path")?,
            BackupSource::Database { database_name, .. } => {
                require(database_name, "database name")?
            }
        }

        match &self.destination {
            DestinationTarget::S3 { bucket, .. } => require(bucket, "bucket")?,
            DestinationTarget::Sftp {
                host, username, ..
            } => {
                require(host, "destination host")?;
                require(username, "destination username")?;
            }
        }

        if self.max_backups_to_keep < 1 {
            return Err(BackupError::Configuration(
                "max_backups_to_keep must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Where this task's artifacts live at its destination.
    pub fn namespace(&self) -> Namespace {
        let kind = match self.source {
            BackupSource::Files { .. } => ArtifactKind::Archive,
            BackupSource::Database { .. } => ArtifactKind::Dump,
        };
        Namespace::new(self.store_path.as_deref(), &self.label, kind)
    }
}

use ssh::SshError;
use storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Insufficient space on the remote host: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Unsupported remote tool: {0}")]
    UnsupportedRemoteTool(String),

    #[error("Remote command error: {0}")]
    RemoteCommand(String),

    #[error("Failed to zip the directory after {attempts} attempts: {output}")]
    ArchiveCreation { attempts: u32, output: String },

    #[error("Database dump failed: {output}")]
    DatabaseDump { output: String },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Rotation error: {0}")]
    Rotation(String),
}

impl From<SshError> for BackupError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::ConfigurationError(msg) => BackupError::Configuration(msg),
            other => BackupError::Connection(other.to_string()),
        }
    }
}

impl From<StorageError> for BackupError {
    fn from(err: StorageError) -> Self {
        BackupError::Transfer(err.to_string())
    }
}

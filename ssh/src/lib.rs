use thiserror::Error;

mod shell;
mod ssh;

pub use shell::{quote, CommandOutput, RemoteFileKind, RemoteReader, RemoteShell, RemoteStat, RemoteWriter};
pub use ssh::{ConnectionSettings, SshSession};

#[derive(Error, Debug)]
pub enum SshError {
    #[error("SSH configuration error: {0}")]
    ConfigurationError(String),
    #[error("SSH connection error: {0}")]
    ConnectionError(String),
    #[error("SSH authentication error: {0}")]
    AuthenticationError(String),
    #[error("SSH session is not connected")]
    NotConnected,
    #[error("SFTP error: {0}")]
    SftpError(String),
}

impl From<std::io::Error> for SshError {
    fn from(err: std::io::Error) -> Self {
        SshError::ConnectionError(err.to_string())
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ConnectionError(err.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for SshError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        SshError::SftpError(err.to_string())
    }
}

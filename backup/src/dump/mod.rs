//! Engine-native database dumps written to a file on the remote host.
//!
//! Credentials travel in a short-lived file next to the dump (a MySQL option
//! file or a `.pgpass`), created with a restrictive umask before its contents
//! are uploaded and removed once the dump command returns. The password never
//! appears on a command line.

mod mysql;
mod postgres;

pub use mysql::MysqlDumpOptions;
pub use postgres::PgDumpOptions;

use log::{debug, info, warn};
use ssh::{quote, RemoteShell};

use crate::archive::{file_name, remote_file_size};
use crate::artifact::Artifact;
use crate::task::{DatabaseEngine, Secret};
use crate::BackupError;

#[derive(Debug, Clone)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: Option<Secret>,
    pub host: String,
    pub port: u16,
}

impl DatabaseCredentials {
    /// Fills unset fields with the engine's local defaults.
    pub fn with_defaults(
        engine: DatabaseEngine,
        username: Option<String>,
        password: Option<Secret>,
        host: Option<String>,
        port: Option<u16>,
    ) -> Self {
        let (default_user, default_port) = match engine {
            DatabaseEngine::Mysql => ("root", 3306),
            DatabaseEngine::Postgres => ("postgres", 5432),
        };
        Self {
            username: username.unwrap_or_else(|| default_user.to_string()),
            password,
            host: host.unwrap_or_else(|| "localhost".to_string()),
            port: port.unwrap_or(default_port),
        }
    }
}

pub struct DatabaseDumper;

impl DatabaseDumper {
    pub async fn dump(
        shell: &dyn RemoteShell,
        engine: DatabaseEngine,
        dest_path: &str,
        credentials: &DatabaseCredentials,
        database_name: &str,
        excluded_tables: &[String],
    ) -> Result<Artifact, BackupError> {
        let (credentials_path, credentials_file, command) = match engine {
            DatabaseEngine::Mysql => {
                let cnf = format!("{dest_path}.cnf");
                let command = MysqlDumpOptions {
                    database: database_name,
                    result_file: dest_path,
                    defaults_file: &cnf,
                    exclude_tables: excluded_tables,
                }
                .command();
                (cnf.clone(), mysql::option_file(credentials), command)
            }
            DatabaseEngine::Postgres => {
                let pgpass = format!("{dest_path}.pgpass");
                let command = PgDumpOptions {
                    host: &credentials.host,
                    port: credentials.port,
                    username: &credentials.username,
                    database: database_name,
                    file: dest_path,
                    passfile: &pgpass,
                    exclude_tables: excluded_tables,
                }
                .command();
                (
                    pgpass.clone(),
                    postgres::passfile(credentials, database_name),
                    command,
                )
            }
        };

        info!(
            "Dumping {} database {} on {} to {}",
            engine,
            database_name,
            shell.host(),
            dest_path
        );

        let result =
            Self::run_with_credentials(shell, &credentials_path, &credentials_file, &command).await;

        if let Err(e) = shell.delete(&credentials_path, false).await {
            warn!("Failed to remove credentials file {credentials_path}: {e}");
        }

        let output = result?;
        let quoted = quote(dest_path);
        let check = shell
            .execute(&format!("test -s {quoted} && echo exists"))
            .await?;
        if check.stdout.trim() != "exists" {
            return Err(BackupError::DatabaseDump {
                output: output.trim().to_string(),
            });
        }

        let size = remote_file_size(shell, dest_path).await?;
        info!("Created {} ({} bytes)", dest_path, size);
        Ok(Artifact {
            remote_path: dest_path.to_string(),
            name: file_name(dest_path),
            size,
        })
    }

    async fn run_with_credentials(
        shell: &dyn RemoteShell,
        credentials_path: &str,
        credentials_file: &str,
        command: &str,
    ) -> Result<String, BackupError> {
        let created = shell
            .execute(&format!("umask 077 && : > {}", quote(credentials_path)))
            .await?;
        if !created.ok() {
            return Err(BackupError::DatabaseDump {
                output: format!(
                    "cannot create credentials file {credentials_path}: {}",
                    created.text().trim()
                ),
            });
        }
        shell
            .upload(credentials_file.as_bytes(), credentials_path)
            .await?;

        debug!("Running: {command}");
        Ok(shell.execute(command).await?.text())
    }
}

use log::{debug, info};
use ssh::{quote, RemoteFileKind, RemoteShell};

use crate::task::DatabaseEngine;
use crate::BackupError;

/// Files whose presence marks a directory as a web-application project.
const WEB_APP_MARKERS: [&str; 3] = ["artisan", "composer.json", "package.json"];
const WEB_APP_MARKER_THRESHOLD: usize = 2;

/// Client probe order when no engine is configured.
const PROBE_ORDER: [DatabaseEngine; 2] = [DatabaseEngine::Mysql, DatabaseEngine::Postgres];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseClient {
    pub engine: DatabaseEngine,
    pub version: String,
}

/// Read-only probes against a remote host.
pub struct RemoteInspector<'a> {
    shell: &'a dyn RemoteShell,
}

impl<'a> RemoteInspector<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self { shell }
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool, BackupError> {
        Ok(self.shell.stat(path).await?.is_some())
    }

    pub async fn path_kind(&self, path: &str) -> Result<Option<RemoteFileKind>, BackupError> {
        Ok(self.shell.stat(path).await?.map(|stat| stat.kind))
    }

    /// Recursive size in bytes. Needs GNU `du` for `-b`.
    pub async fn directory_size_bytes(&self, path: &str) -> Result<u64, BackupError> {
        let version = self.shell.execute("du --version").await?;
        if !version.text().contains("GNU") {
            return Err(BackupError::UnsupportedRemoteTool(
                "du (GNU coreutils is required)".to_string(),
            ));
        }

        let output = self
            .shell
            .execute(&format!("du -sb {} | cut -f1", quote(path)))
            .await?;
        let size = parse_number(&output.stdout, "du")?;
        debug!("{} on {} is {} bytes", path, self.shell.host(), size);
        Ok(size)
    }

    /// Bytes available to unprivileged users in the filesystem holding `dir`.
    pub async fn free_space_bytes(&self, dir: &str) -> Result<u64, BackupError> {
        let output = self
            .shell
            .execute(&format!("df -P {} | tail -1 | awk '{{print $4}}'", quote(dir)))
            .await?;
        let blocks = parse_number(&output.stdout, "df")?;
        Ok(blocks.saturating_mul(1024))
    }

    pub async fn is_web_app_project(&self, path: &str) -> Result<bool, BackupError> {
        let base = path.trim_end_matches('/');
        let mut found = 0;
        for marker in WEB_APP_MARKERS {
            if self.path_exists(&format!("{base}/{marker}")).await? {
                found += 1;
            }
        }
        Ok(found >= WEB_APP_MARKER_THRESHOLD)
    }

    /// First database client found on the host, MySQL before PostgreSQL.
    pub async fn database_client(&self) -> Result<Option<DatabaseClient>, BackupError> {
        for engine in PROBE_ORDER {
            if let Some(client) = self.probe_client(engine).await? {
                return Ok(Some(client));
            }
        }
        Ok(None)
    }

    pub async fn probe_client(
        &self,
        engine: DatabaseEngine,
    ) -> Result<Option<DatabaseClient>, BackupError> {
        let binary = engine.client_binary();
        let output = self
            .shell
            .execute(&format!("{binary} --version 2>&1"))
            .await?;
        let text = output.text();
        let client = parse_client_version(engine, &text);
        match &client {
            Some(client) => info!(
                "Detected {} client {} on {}",
                client.engine,
                client.version,
                self.shell.host()
            ),
            None => debug!("No {} client on {}: {}", engine, self.shell.host(), text.trim()),
        }
        Ok(client)
    }

    pub async fn require_tool(&self, name: &str) -> Result<(), BackupError> {
        let output = self
            .shell
            .execute(&format!("command -v {}", quote(name)))
            .await?;
        if output.ok() && !output.stdout.trim().is_empty() {
            Ok(())
        } else {
            Err(BackupError::UnsupportedRemoteTool(format!(
                "{name} is not installed on {}",
                self.shell.host()
            )))
        }
    }
}

/// Fails when `source_size` scaled by `safety_factor` exceeds `free`.
pub fn check_free_space(source_size: u64, free: u64, safety_factor: f64) -> Result<(), BackupError> {
    let required = (source_size as f64 * safety_factor).ceil() as u64;
    if required > free {
        Err(BackupError::InsufficientSpace {
            required,
            available: free,
        })
    } else {
        Ok(())
    }
}

fn parse_number(stdout: &str, tool: &str) -> Result<u64, BackupError> {
    let trimmed = stdout.trim();
    trimmed.parse::<u64>().map_err(|_| {
        BackupError::RemoteCommand(format!("unexpected {tool} output: {trimmed:?}"))
    })
}

fn parse_client_version(engine: DatabaseEngine, text: &str) -> Option<DatabaseClient> {
    let lower = text.to_ascii_lowercase();
    let recognised = match engine {
        DatabaseEngine::Mysql => lower.contains("mysql") && lower.contains("ver"),
        DatabaseEngine::Postgres => lower.contains("postgresql"),
    };
    if !recognised || lower.contains("not found") {
        return None;
    }

    let version = text
        .split_whitespace()
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or("unknown")
        .trim_end_matches(',')
        .to_string();

    Some(DatabaseClient { engine, version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeShell;

    #[tokio::test]
    async fn test_directory_size_requires_gnu_du() {
        let shell = FakeShell::new("web1").on("du --version", "du (BusyBox) v1.36");
        let result = RemoteInspector::new(&shell).directory_size_bytes("/var/www").await;
        assert!(matches!(result, Err(BackupError::UnsupportedRemoteTool(_))));
        assert!(!shell.ran("du -sb"));
    }

    #[tokio::test]
    async fn test_directory_size_parses_du() {
        let shell = FakeShell::new("web1")
            .on("du --version", "du (GNU coreutils) 8.32")
            .on("du -sb", "1024\n");
        let size = RemoteInspector::new(&shell)
            .directory_size_bytes("/path/to/source")
            .await
            .unwrap();
        assert_eq!(size, 1024);
        assert!(shell.ran("du -sb '/path/to/source' | cut -f1"));
    }

    #[tokio::test]
    async fn test_free_space_is_in_bytes() {
        let shell = FakeShell::new("web1").on("df -P", "5000000");
        let free = RemoteInspector::new(&shell).free_space_bytes("/tmp").await.unwrap();
        assert_eq!(free, 5_000_000 * 1024);
        assert!(shell.ran("df -P '/tmp' | tail -1 | awk '{print $4}'"));
    }

    #[tokio::test]
    async fn test_garbled_df_output_is_remote_command_error() {
        let shell = FakeShell::new("web1").on("df -P", "df: /tmp: No such file");
        let result = RemoteInspector::new(&shell).free_space_bytes("/tmp").await;
        assert!(matches!(result, Err(BackupError::RemoteCommand(_))));
    }

    #[test]
    fn test_check_free_space_applies_safety_factor() {
        assert!(check_free_space(1000, 1200, 1.2).is_ok());
        match check_free_space(1001, 1200, 1.2) {
            Err(BackupError::InsufficientSpace {
                required,
                available,
            }) => {
                assert_eq!(required, 1202);
                assert_eq!(available, 1200);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_web_app_needs_two_markers() {
        let laravel = FakeShell::new("web1")
            .with_file("/srv/app/artisan", b"")
            .with_file("/srv/app/composer.json", b"{}");
        assert!(RemoteInspector::new(&laravel).is_web_app_project("/srv/app/").await.unwrap());

        let plain = FakeShell::new("web1").with_file("/srv/app/package.json", b"{}");
        assert!(!RemoteInspector::new(&plain).is_web_app_project("/srv/app").await.unwrap());
    }

    #[tokio::test]
    async fn test_database_client_prefers_mysql() {
        let shell = FakeShell::new("db1")
            .on("mysql --version 2>&1", "mysql  Ver 8.0.26 for Linux on x86_64")
            .on("psql --version 2>&1", "psql (PostgreSQL) 14.5");
        let client = RemoteInspector::new(&shell).database_client().await.unwrap();
        assert_eq!(
            client,
            Some(DatabaseClient {
                engine: DatabaseEngine::Mysql,
                version: "8.0.26".to_string()
            })
        );
        assert!(!shell.ran("psql"));
    }

    #[tokio::test]
    async fn test_database_client_falls_back_to_postgres() {
        let shell = FakeShell::new("db1")
            .on_failure("mysql --version 2>&1", "sh: 1: mysql: not found", 127)
            .on("psql --version 2>&1", "psql (PostgreSQL) 14.5");
        let client = RemoteInspector::new(&shell).database_client().await.unwrap().unwrap();
        assert_eq!(client.engine, DatabaseEngine::Postgres);
        assert_eq!(client.version, "14.5");
    }

    #[tokio::test]
    async fn test_no_database_client() {
        let shell = FakeShell::new("db1");
        assert_eq!(RemoteInspector::new(&shell).database_client().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_require_tool() {
        let shell = FakeShell::new("web1").on("command -v 'zip'", "/usr/bin/zip");
        let inspector = RemoteInspector::new(&shell);
        assert!(inspector.require_tool("zip").await.is_ok());
        assert!(matches!(
            inspector.require_tool("mysqldump").await,
            Err(BackupError::UnsupportedRemoteTool(_))
        ));
    }
}

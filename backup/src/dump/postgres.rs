use ssh::quote;

use super::DatabaseCredentials;

/// Options for a remote pg_dump run. The password comes from `PGPASSFILE`.
pub struct PgDumpOptions<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub database: &'a str,
    pub file: &'a str,
    pub passfile: &'a str,
    pub exclude_tables: &'a [String],
}

impl PgDumpOptions<'_> {
    pub fn command(&self) -> String {
        let mut command = format!(
            "PGPASSFILE={} pg_dump --host={} --port={} --username={} --no-password --format=plain --file={}",
            quote(self.passfile),
            quote(self.host),
            self.port,
            quote(self.username),
            quote(self.file)
        );
        for table in self.exclude_tables {
            command.push_str(&format!(" --exclude-table={}", quote(table)));
        }
        command.push_str(&format!(" {} 2>&1", quote(self.database)));
        command
    }
}

/// A single `.pgpass` line matching exactly this database.
pub fn passfile(credentials: &DatabaseCredentials, database: &str) -> String {
    let password = credentials
        .password
        .as_ref()
        .map(|p| p.expose())
        .unwrap_or_default();
    format!(
        "{}:{}:{}:{}:{}\n",
        escape(&credentials.host),
        credentials.port,
        escape(database),
        escape(&credentials.username),
        escape(password)
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace(':', "\\:")
}

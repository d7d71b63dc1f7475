use ssh::quote;

use super::DatabaseCredentials;

/// Options for a remote mysqldump run.
pub struct MysqlDumpOptions<'a> {
    pub database: &'a str,
    pub result_file: &'a str,
    pub defaults_file: &'a str,
    pub exclude_tables: &'a [String],
}

impl MysqlDumpOptions<'_> {
    pub fn command(&self) -> String {
        let mut command = format!(
            "mysqldump --defaults-extra-file={} --single-transaction --routines --triggers --result-file={} {}",
            quote(self.defaults_file),
            quote(self.result_file),
            quote(self.database)
        );
        for table in self.exclude_tables {
            command.push_str(&format!(
                " --ignore-table={}",
                quote(&format!("{}.{}", self.database, table))
            ));
        }
        command.push_str(" 2>&1");
        command
    }
}

/// `[client]` option file read through `--defaults-extra-file`.
pub fn option_file(credentials: &DatabaseCredentials) -> String {
    let mut contents = String::from("[client]\n");
    contents.push_str(&format!("user=\"{}\"\n", escape(&credentials.username)));
    if let Some(password) = &credentials.password {
        contents.push_str(&format!("password=\"{}\"\n", escape(password.expose())));
    }
    contents.push_str(&format!("host=\"{}\"\n", escape(&credentials.host)));
    contents.push_str(&format!("port={}\n", credentials.port));
    contents
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

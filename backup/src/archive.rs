use log::{debug, info, warn};
use ssh::{quote, RemoteShell};
use std::time::Duration;

use crate::artifact::Artifact;
use crate::BackupError;

/// Output marker zip prints when it gives up.
const ZIP_ERROR_MARKER: &str = "zip error";

/// Paths never worth archiving in a web-application project.
pub const WEB_APP_EXCLUSIONS: [&str; 4] = ["node_modules/*", "vendor/*", "public/build/*", ".git/*"];

/// Builds `zip -x` patterns relative to `source_path`.
///
/// User entries come first, followed by the web-application defaults when
/// `web_app` is set; duplicates are dropped. Absolute paths under the source
/// lose their prefix, absolute paths elsewhere are dropped, and a bare
/// directory entry also excludes its contents.
pub fn exclusion_patterns(source_path: &str, user: &[String], web_app: bool) -> Vec<String> {
    let source = source_path.trim_end_matches('/');
    let mut patterns: Vec<String> = Vec::new();
    let mut push = |pattern: String| {
        if !pattern.is_empty() && !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    };

    for entry in user {
        let entry = entry.trim();
        let relative = if entry.starts_with('/') {
            match entry
                .strip_prefix(source)
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            {
                Some(rest) => rest.trim_start_matches('/'),
                None => {
                    warn!("Ignoring exclusion {entry}: it is not inside {source}");
                    continue;
                }
            }
        } else {
            entry
        };
        if relative.is_empty() {
            continue;
        }

        if relative.ends_with('*') {
            push(relative.to_string());
        } else {
            let dir = relative.trim_end_matches('/');
            push(dir.to_string());
            push(format!("{dir}/*"));
        }
    }

    if web_app {
        for default in WEB_APP_EXCLUSIONS {
            push(default.to_string());
        }
    }

    patterns
}

/// Zips a remote directory, retrying a bounded number of times.
pub struct ArchiveBuilder {
    max_attempts: u32,
    backoff: Duration,
}

impl ArchiveBuilder {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn command(source_path: &str, dest_path: &str, exclusions: &[String]) -> String {
        let mut command = format!(
            "cd {} && zip -rv {} .",
            quote(source_path),
            quote(dest_path)
        );
        if !exclusions.is_empty() {
            command.push_str(" -x");
            for pattern in exclusions {
                command.push(' ');
                command.push_str(&quote(pattern));
            }
        }
        command
    }

    /// Produces `dest_path` on the remote host.
    ///
    /// An attempt succeeds only when the output carries no zip error and the
    /// file exists with a non-zero size; the exit status alone is ignored.
    pub async fn build(
        &self,
        shell: &dyn RemoteShell,
        source_path: &str,
        dest_path: &str,
        exclusions: &[String],
    ) -> Result<Artifact, BackupError> {
        let command = Self::command(source_path, dest_path, exclusions);
        let mut last_output = String::new();

        for attempt in 1..=self.max_attempts {
            info!(
                "Zipping {} on {} (attempt {}/{})",
                source_path,
                shell.host(),
                attempt,
                self.max_attempts
            );
            debug!("Running: {command}");
            let output = shell.execute(&command).await?.text();

            if !output.contains(ZIP_ERROR_MARKER) {
                let size = remote_file_size(shell, dest_path).await?;
                if size > 0 {
                    info!("Created {} ({} bytes)", dest_path, size);
                    return Ok(Artifact {
                        remote_path: dest_path.to_string(),
                        name: file_name(dest_path),
                        size,
                    });
                }
                warn!("{} is missing or empty after zip", dest_path);
            } else {
                warn!("zip reported an error on attempt {attempt}");
            }
            last_output = output;

            shell.execute(&format!("rm -f {}", quote(dest_path))).await?;
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(BackupError::ArchiveCreation {
            attempts: self.max_attempts,
            output: last_output.trim().to_string(),
        })
    }
}

/// Size reported by the remote `stat`, zero when the file is absent.
pub(crate) async fn remote_file_size(
    shell: &dyn RemoteShell,
    path: &str,
) -> Result<u64, BackupError> {
    let quoted = quote(path);
    let output = shell
        .execute(&format!("test -f {quoted} && stat -c%s {quoted}"))
        .await?;
    Ok(output.stdout.trim().parse().unwrap_or(0))
}

pub(crate) fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "/etc/outrider/outrider.toml",
    "~/.config/outrider/outrider.toml",
    "outrider.toml",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub ssh: SshSection,
    pub logs: LogsSection,
    pub notifications: NotificationsSection,
    pub tasks: TasksSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    /// `production` turns on the hardened checks (SSH passphrase required).
    pub environment: String,
    /// Directory on the remote host where artifacts are produced.
    pub staging_dir: String,
    /// Local directory used while relaying artifacts to object storage.
    pub local_staging_dir: PathBuf,
    pub free_space_safety_factor: f64,
    pub archive_max_attempts: u32,
    pub archive_retry_backoff_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshSection {
    pub private_key: String,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogsSection {
    pub directory: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationsSection {
    pub webhooks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TasksSection {
    pub file: String,
}

impl EngineConfig {
    pub fn is_hardened(&self) -> bool {
        self.engine.environment.eq_ignore_ascii_case("production")
    }

    pub fn private_key_path(&self) -> PathBuf {
        expand(&self.ssh.private_key)
    }

    pub fn logs_directory(&self) -> PathBuf {
        expand(&self.logs.directory)
    }

    pub fn tasks_file(&self) -> PathBuf {
        expand(&self.tasks.file)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.connect_timeout_secs)
    }

    pub fn archive_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.engine.archive_retry_backoff_secs)
    }

    /// TOML rendering with the SSH passphrase masked.
    pub fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if shown.ssh.passphrase.is_some() {
            shown.ssh.passphrase = Some("********".to_string());
        }
        toml::to_string_pretty(&shown)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("engine.environment", "local")?
        .set_default("engine.staging_dir", "/tmp")?
        .set_default("engine.local_staging_dir", "/tmp")?
        .set_default("engine.free_space_safety_factor", 1.2)?
        .set_default("engine.archive_max_attempts", 3)?
        .set_default("engine.archive_retry_backoff_secs", 5)?
        .set_default("engine.connect_timeout_secs", 120)?
        .set_default("ssh.private_key", "~/.ssh/outrider")?
        .set_default("logs.directory", "/var/lib/outrider/logs")?
        .set_default("notifications.webhooks", Vec::<String>::new())?
        .set_default("tasks.file", "/etc/outrider/tasks.toml")
}

fn environment() -> Environment {
    Environment::with_prefix("OUTRIDER").separator("__")
}

/// Loads the configuration from the standard locations, later files
/// overriding earlier ones, then `OUTRIDER__SECTION__KEY` variables.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    let builder = CONFIG_PATHS.iter().try_fold(defaults()?, |builder, path| {
        let path = shellexpand::full(path)
            .map_err(|e| ConfigError::Message(e.to_string()))?
            .into_owned();
        if Path::new(&path).exists() {
            info!("Loading configuration from {path}");
            Ok(builder.add_source(File::with_name(&path)))
        } else {
            debug!("No configuration at {path}");
            Ok(builder)
        }
    })?;

    builder.add_source(environment()).build()?.try_deserialize()
}

/// Loads the configuration from one explicit file (plus environment overrides).
pub fn load_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    info!("Loading configuration from {}", path.display());
    defaults()?
        .add_source(File::from(path))
        .add_source(environment())
        .build()?
        .try_deserialize()
}

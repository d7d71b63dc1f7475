use common::config::EngineConfig;
use log::{error, info, warn};
use ssh::{ConnectionSettings, RemoteFileKind, RemoteShell};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{full_path, DestinationSink};

use crate::archive::{exclusion_patterns, ArchiveBuilder};
use crate::artifact::{artifact_name, Artifact, ArtifactKind, Namespace};
use crate::clock::Clock;
use crate::dump::{DatabaseCredentials, DatabaseDumper};
use crate::execution_log::{ExecutionLog, ExecutionOutcome, ExecutionState};
use crate::inspector::{check_free_space, RemoteInspector};
use crate::ports::{
    ConnectivityReporter, ConnectivityStatus, Connector, ExecutionRecorder, Notification,
    Notifier, TaskRepository, TaskStatus,
};
use crate::retention;
use crate::task::{BackupSource, BackupTask, DatabaseEngine};
use crate::BackupError;

const NOTIFICATION_EXCERPT_LINES: usize = 20;
const NAME_COLLISION_RETRIES: u32 = 3;

/// Engine-wide knobs, resolved from the configuration once.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub staging_dir: String,
    pub free_space_safety_factor: f64,
    pub archive_max_attempts: u32,
    pub archive_retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub private_key: PathBuf,
    pub passphrase: Option<String>,
    pub hardened: bool,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            staging_dir: config.engine.staging_dir.trim_end_matches('/').to_string(),
            free_space_safety_factor: config.engine.free_space_safety_factor,
            archive_max_attempts: config.engine.archive_max_attempts,
            archive_retry_backoff: config.archive_retry_backoff(),
            connect_timeout: config.connect_timeout(),
            private_key: config.private_key_path(),
            passphrase: config.ssh.passphrase.clone(),
            hardened: config.is_hardened(),
        }
    }
}

/// What one execution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionOutcome,
    pub log_text: String,
    pub artifact_name: Option<String>,
}

/// How the source is turned into an artifact, decided during inspection.
enum Plan {
    Archive {
        source_path: String,
        exclusions: Vec<String>,
    },
    Dump {
        engine: DatabaseEngine,
        database_name: String,
        excluded_tables: Vec<String>,
        credentials: DatabaseCredentials,
    },
}

impl Plan {
    fn kind(&self) -> ArtifactKind {
        match self {
            Plan::Archive { .. } => ArtifactKind::Archive,
            Plan::Dump { .. } => ArtifactKind::Dump,
        }
    }
}

/// Runs backup tasks end to end.
///
/// Each call to [`Orchestrator::execute`] walks one execution through
/// validating, connecting, inspecting, producing, transferring and rotating.
/// Any error ends the execution as failed; the remote artifact is removed
/// and the sessions are closed whatever happens once they exist.
pub struct Orchestrator {
    settings: EngineSettings,
    tasks: Arc<dyn TaskRepository>,
    connector: Arc<dyn Connector>,
    connectivity: Arc<dyn ConnectivityReporter>,
    recorder: Arc<dyn ExecutionRecorder>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        settings: EngineSettings,
        tasks: Arc<dyn TaskRepository>,
        connector: Arc<dyn Connector>,
        connectivity: Arc<dyn ConnectivityReporter>,
        recorder: Arc<dyn ExecutionRecorder>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            tasks,
            connector,
            connectivity,
            recorder,
            notifier,
            clock,
        }
    }

    pub async fn task_ids(&self) -> Result<Vec<String>, BackupError> {
        self.tasks.task_ids().await
    }

    pub async fn execute(&self, task_id: &str) -> ExecutionResult {
        let mut log = ExecutionLog::new(task_id, self.clock.now());
        info!("Starting execution {} of task {}", log.execution_id, task_id);
        self.set_status(task_id, TaskStatus::Running).await;

        let mut label = task_id.to_string();
        let outcome = self.run(&mut log, task_id, &mut label).await;

        let artifact_name = match outcome {
            Ok(name) => {
                self.enter(&mut log, ExecutionState::Completed, format!("Backup completed: {name}"))
                    .await;
                Some(name)
            }
            Err(e) => {
                error!("Task {task_id} failed: {e}");
                log.fail(self.clock.now(), e.to_string());
                None
            }
        };

        let finished = log.finish(self.clock.now());
        let log = finished.log();
        self.persist(log).await;

        let status = log.outcome();
        self.set_status(
            task_id,
            match status {
                ExecutionOutcome::Succeeded => TaskStatus::Ready,
                ExecutionOutcome::Failed => TaskStatus::Failed,
            },
        )
        .await;

        let notification = Notification {
            task_id: task_id.to_string(),
            label,
            status,
            log_reference: log.execution_id.to_string(),
            log_excerpt: log.excerpt(NOTIFICATION_EXCERPT_LINES),
            finished_at: log.finished_at.unwrap_or_else(|| self.clock.now()),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Notification for task {task_id} failed: {e}");
        }

        ExecutionResult {
            execution_id: log.execution_id.to_string(),
            status,
            log_text: log.text(),
            artifact_name,
        }
    }

    /// Connects to the task's server, reports the result and disconnects.
    pub async fn check_server(&self, task_id: &str) -> Result<(), BackupError> {
        let task = self.tasks.load(task_id).await?;
        task.validate()?;
        let settings = self.connection_settings(&task).await?;
        let shell = self.connect(&task, settings).await?;
        let result = shell.execute("echo ok").await;
        close_shell(shell.as_ref()).await;
        let output = result?;
        if output.stdout.trim() == "ok" {
            Ok(())
        } else {
            Err(BackupError::RemoteCommand(format!(
                "unexpected reply from {}: {}",
                task.server.host,
                output.text().trim()
            )))
        }
    }

    /// Opens the task's destination and probes it.
    pub async fn check_destination(&self, task_id: &str) -> Result<(), BackupError> {
        let task = self.tasks.load(task_id).await?;
        task.validate()?;
        let sink = self.connector.open_sink(&task.destination).await?;
        let result = sink.check().await;
        close_sink(sink.as_ref()).await;
        result.map_err(|e| {
            BackupError::Transfer(format!("{} unreachable: {e}", task.destination.describe()))
        })
    }

    async fn run(
        &self,
        log: &mut ExecutionLog,
        task_id: &str,
        label: &mut String,
    ) -> Result<String, BackupError> {
        self.enter(log, ExecutionState::Validating, "Validating task").await;
        let task = self.tasks.load(task_id).await?;
        *label = task.label.clone();
        task.validate()?;
        let settings = self.connection_settings(&task).await?;

        self.enter(
            log,
            ExecutionState::Connecting,
            format!(
                "Connecting to {}@{}:{}",
                task.server.username, task.server.host, task.server.port
            ),
        )
        .await;
        let shell = self.connect(&task, settings).await?;

        let sink = match self.connector.open_sink(&task.destination).await {
            Ok(sink) => sink,
            Err(e) => {
                close_shell(shell.as_ref()).await;
                return Err(e);
            }
        };

        let result = self.run_connected(log, &task, shell.as_ref(), sink.as_ref()).await;

        close_sink(sink.as_ref()).await;
        close_shell(shell.as_ref()).await;
        result
    }

    async fn run_connected(
        &self,
        log: &mut ExecutionLog,
        task: &BackupTask,
        shell: &dyn RemoteShell,
        sink: &dyn DestinationSink,
    ) -> Result<String, BackupError> {
        self.enter(log, ExecutionState::Inspecting, "Inspecting the source").await;
        let plan = self.inspect(log, task, shell).await?;

        let name = self.fresh_artifact_name(task, plan.kind(), sink).await;
        let remote_path = format!("{}/{}", self.settings.staging_dir, name);
        self.enter(
            log,
            ExecutionState::Producing,
            format!("Producing {remote_path} on {}", shell.host()),
        )
        .await;

        let result = self.produce_and_ship(log, task, shell, sink, &plan, &remote_path).await;

        if let Err(e) = shell.delete(&remote_path, true).await {
            warn!("Failed to remove {} on {}: {}", remote_path, shell.host(), e);
            self.note(log, format!("Could not remove {remote_path} from the server: {e}"))
                .await;
        }

        result.map(|()| name)
    }

    async fn produce_and_ship(
        &self,
        log: &mut ExecutionLog,
        task: &BackupTask,
        shell: &dyn RemoteShell,
        sink: &dyn DestinationSink,
        plan: &Plan,
        remote_path: &str,
    ) -> Result<(), BackupError> {
        let artifact = self.produce(shell, plan, remote_path).await?;
        self.note(log, format!("Created {} ({} bytes)", artifact.name, artifact.size))
            .await;

        self.enter(
            log,
            ExecutionState::Transferring,
            format!("Transferring {} to {}", artifact.name, task.destination.describe()),
        )
        .await;
        let stored = sink
            .store(shell, &artifact.remote_path, &artifact.name, task.store_path.as_deref())
            .await
            .map_err(|e| BackupError::Transfer(e.to_string()))?;
        self.note(log, format!("Stored {} ({} bytes)", stored.location, stored.bytes))
            .await;

        self.enter(
            log,
            ExecutionState::Rotating,
            format!("Keeping the newest {} backups", task.max_backups_to_keep),
        )
        .await;
        let namespace = Namespace::new(task.store_path.as_deref(), &task.label, plan.kind());
        match retention::rotate(sink, &namespace, task.max_backups_to_keep as usize).await {
            Ok(deleted) if deleted.is_empty() => {}
            Ok(deleted) => {
                self.note(log, format!("Removed old backups: {}", deleted.join(", ")))
                    .await
            }
            Err(e) => {
                warn!("Rotation for task {} failed: {}", task.id, e);
                self.note(log, e.to_string()).await;
            }
        }

        Ok(())
    }

    async fn inspect(
        &self,
        log: &mut ExecutionLog,
        task: &BackupTask,
        shell: &dyn RemoteShell,
    ) -> Result<Plan, BackupError> {
        let inspector = RemoteInspector::new(shell);

        match &task.source {
            BackupSource::Files { path } => {
                match inspector.path_kind(path).await? {
                    Some(RemoteFileKind::Directory) => {}
                    Some(_) => {
                        return Err(BackupError::Configuration(format!(
                            "{path} is not a directory"
                        )))
                    }
                    None => {
                        return Err(BackupError::SourceNotFound(format!(
                            "{path} does not exist on {}",
                            shell.host()
                        )))
                    }
                }

                let size = inspector.directory_size_bytes(path).await?;
                let free = inspector.free_space_bytes(&self.settings.staging_dir).await?;
                self.note(
                    log,
                    format!(
                        "Source is {size} bytes, {free} bytes free in {}",
                        self.settings.staging_dir
                    ),
                )
                .await;
                check_free_space(size, free, self.settings.free_space_safety_factor)?;
                inspector.require_tool("zip").await?;

                let web_app = inspector.is_web_app_project(path).await?;
                if web_app {
                    self.note(log, "Web application project detected, skipping dependency folders")
                        .await;
                }

                Ok(Plan::Archive {
                    source_path: path.clone(),
                    exclusions: exclusion_patterns(path, &task.excluded_paths, web_app),
                })
            }
            BackupSource::Database {
                database_name,
                engine,
                excluded_tables,
                username,
                password,
                host,
                port,
            } => {
                let client = match engine {
                    Some(engine) => inspector.probe_client(*engine).await?.ok_or_else(|| {
                        BackupError::Configuration(format!(
                            "{engine} client not found on {}",
                            shell.host()
                        ))
                    })?,
                    None => inspector.database_client().await?.ok_or_else(|| {
                        BackupError::Configuration(format!(
                            "no supported database client found on {}",
                            shell.host()
                        ))
                    })?,
                };
                self.note(log, format!("Found {} client {}", client.engine, client.version))
                    .await;
                inspector.require_tool(client.engine.dump_binary()).await?;

                match inspector.free_space_bytes(&self.settings.staging_dir).await {
                    Ok(free) => {
                        self.note(
                            log,
                            format!("{free} bytes free in {}", self.settings.staging_dir),
                        )
                        .await
                    }
                    Err(e) => warn!("Could not read free space on {}: {}", shell.host(), e),
                }

                Ok(Plan::Dump {
                    engine: client.engine,
                    database_name: database_name.clone(),
                    excluded_tables: excluded_tables.clone(),
                    credentials: DatabaseCredentials::with_defaults(
                        client.engine,
                        username.clone(),
                        password.clone(),
                        host.clone(),
                        *port,
                    ),
                })
            }
        }
    }

    async fn produce(
        &self,
        shell: &dyn RemoteShell,
        plan: &Plan,
        remote_path: &str,
    ) -> Result<Artifact, BackupError> {
        match plan {
            Plan::Archive {
                source_path,
                exclusions,
            } => {
                ArchiveBuilder::new(
                    self.settings.archive_max_attempts,
                    self.settings.archive_retry_backoff,
                )
                .build(shell, source_path, remote_path, exclusions)
                .await
            }
            Plan::Dump {
                engine,
                database_name,
                excluded_tables,
                credentials,
            } => {
                DatabaseDumper::dump(
                    shell,
                    *engine,
                    remote_path,
                    credentials,
                    database_name,
                    excluded_tables,
                )
                .await
            }
        }
    }

    /// An artifact name sorting after everything already in the task's namespace.
    async fn fresh_artifact_name(
        &self,
        task: &BackupTask,
        kind: ArtifactKind,
        sink: &dyn DestinationSink,
    ) -> String {
        let subpath = task.store_path.as_deref();
        let namespace = Namespace::new(subpath, &task.label, kind);
        let newest = match sink.list(namespace.prefix()).await {
            Ok(names) => names.into_iter().find(|name| namespace.contains(name)),
            Err(e) => {
                warn!("Could not list existing backups for {}: {}", task.id, e);
                None
            }
        };

        let mut name = artifact_name(&task.label, kind, self.clock.now());
        for _ in 0..NAME_COLLISION_RETRIES {
            match &newest {
                Some(newest) if full_path(subpath, &name) <= *newest => {
                    let now = self.clock.now();
                    let to_next_second = 1000 - u64::from(now.timestamp_subsec_millis().min(999));
                    self.clock.sleep(Duration::from_millis(to_next_second)).await;
                    name = artifact_name(&task.label, kind, self.clock.now());
                }
                _ => return name,
            }
        }
        warn!("{name} does not sort after the newest existing backup");
        name
    }

    async fn connection_settings(&self, task: &BackupTask) -> Result<ConnectionSettings, BackupError> {
        let key = &self.settings.private_key;
        tokio::fs::File::open(key).await.map_err(|e| {
            BackupError::Configuration(format!(
                "SSH private key {} is not readable: {e}",
                key.display()
            ))
        })?;
        if self.settings.hardened && self.settings.passphrase.is_none() {
            return Err(BackupError::Configuration(
                "an SSH key passphrase is required in production".to_string(),
            ));
        }

        let mut settings =
            ConnectionSettings::new(task.server.host.clone(), task.server.username.clone(), key.clone())
                .with_port(task.server.port)
                .with_connect_timeout(self.settings.connect_timeout);
        if let Some(passphrase) = &self.settings.passphrase {
            settings = settings.with_passphrase(passphrase.clone());
        }
        Ok(settings)
    }

    async fn connect(
        &self,
        task: &BackupTask,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn RemoteShell>, BackupError> {
        match self.connector.connect_source(settings).await {
            Ok(shell) => {
                self.connectivity
                    .report(&task.server.host, ConnectivityStatus::Online)
                    .await;
                Ok(shell)
            }
            Err(e) => {
                self.connectivity
                    .report(&task.server.host, ConnectivityStatus::Offline)
                    .await;
                Err(e)
            }
        }
    }

    async fn enter(&self, log: &mut ExecutionLog, state: ExecutionState, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", log.task_id, message);
        if log.advance(state, self.clock.now(), message) {
            self.persist(log).await;
        }
    }

    async fn note(&self, log: &mut ExecutionLog, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", log.task_id, message);
        log.append(self.clock.now(), message);
        self.persist(log).await;
    }

    async fn persist(&self, log: &ExecutionLog) {
        if let Err(e) = self.recorder.record_log(log).await {
            warn!("Failed to record log for execution {}: {}", log.execution_id, e);
        }
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Err(e) = self.recorder.update_status(task_id, status).await {
            warn!("Failed to update status of task {task_id}: {e}");
        }
    }
}

async fn close_shell(shell: &dyn RemoteShell) {
    if let Err(e) = shell.close().await {
        warn!("Failed to close session to {}: {}", shell.host(), e);
    }
}

async fn close_sink(sink: &dyn DestinationSink) {
    if let Err(e) = sink.close().await {
        warn!("Failed to close {} destination: {}", sink.name(), e);
    }
}

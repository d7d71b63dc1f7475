//! Collaborators the orchestrator talks to but does not own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use ssh::{ConnectionSettings, RemoteShell};
use std::fmt;
use std::sync::Arc;
use storage::DestinationSink;

#[cfg(test)]
use mockall::automock;

use crate::execution_log::{ExecutionLog, ExecutionOutcome};
use crate::task::{BackupTask, DestinationTarget};
use crate::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Ready,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Ready => f.write_str("ready"),
            TaskStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub task_id: String,
    pub label: String,
    pub status: ExecutionOutcome,
    /// Execution id the full log is stored under.
    pub log_reference: String,
    pub log_excerpt: String,
    pub finished_at: DateTime<Utc>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn load(&self, task_id: &str) -> Result<BackupTask, BackupError>;

    async fn task_ids(&self) -> Result<Vec<String>, BackupError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectivityReporter: Send + Sync {
    async fn report(&self, host: &str, status: ConnectivityStatus);
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
    async fn record_log(&self, log: &ExecutionLog) -> Result<(), BackupError>;

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), BackupError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), BackupError>;
}

/// Opens the sessions an execution needs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_source(
        &self,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn RemoteShell>, BackupError>;

    async fn open_sink(
        &self,
        target: &DestinationTarget,
    ) -> Result<Box<dyn DestinationSink>, BackupError>;
}

/// Reports connectivity changes to the log.
pub struct LogConnectivityReporter;

#[async_trait]
impl ConnectivityReporter for LogConnectivityReporter {
    async fn report(&self, host: &str, status: ConnectivityStatus) {
        match status {
            ConnectivityStatus::Online => info!("{host} is online"),
            ConnectivityStatus::Offline => warn!("{host} is offline"),
        }
    }
}

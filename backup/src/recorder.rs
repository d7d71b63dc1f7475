use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};

use crate::artifact::sanitize_label;
use crate::execution_log::ExecutionLog;
use crate::ports::{ExecutionRecorder, TaskStatus};
use crate::BackupError;

/// Keeps `<dir>/<task>/<execution>.json` and `<dir>/<task>/status` up to date.
pub struct JsonFileRecorder {
    directory: PathBuf,
}

impl JsonFileRecorder {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        self.directory.join(sanitize_label(task_id))
    }

    async fn write(path: &Path, contents: &[u8]) -> Result<(), BackupError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BackupError::Configuration(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(path, contents).await.map_err(|e| {
            BackupError::Configuration(format!("cannot write {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl ExecutionRecorder for JsonFileRecorder {
    async fn record_log(&self, log: &ExecutionLog) -> Result<(), BackupError> {
        let path = self
            .task_dir(&log.task_id)
            .join(format!("{}.json", log.execution_id));
        let json = serde_json::to_vec_pretty(log)
            .map_err(|e| BackupError::Configuration(format!("cannot serialize log: {e}")))?;
        debug!("Recording execution log to {}", path.display());
        Self::write(&path, &json).await
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), BackupError> {
        let path = self.task_dir(task_id).join("status");
        Self::write(&path, format!("{status}\n").as_bytes()).await
    }
}

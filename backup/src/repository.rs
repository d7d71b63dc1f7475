use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::ports::TaskRepository;
use crate::artifact::Namespace;
use crate::task::BackupTask;
use crate::BackupError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<BackupTask>,
}

/// Reads `[[tasks]]` tables from a TOML file. The file is re-read on every
/// call so edits are picked up without a restart.
pub struct FileTaskRepository {
    path: PathBuf,
}

impl FileTaskRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<TaskFile, BackupError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            BackupError::Configuration(format!(
                "cannot read task file {}: {e}",
                self.path.display()
            ))
        })?;
        let file: TaskFile = toml::from_str(&contents).map_err(|e| {
            BackupError::Configuration(format!(
                "invalid task file {}: {e}",
                self.path.display()
            ))
        })?;
        check_namespaces(&file.tasks)?;
        debug!("Loaded {} tasks from {}", file.tasks.len(), self.path.display());
        Ok(file)
    }
}

/// Two tasks writing the same kind of artifact under the same label and
/// store path at one destination would rotate out each other's backups.
fn check_namespaces(tasks: &[BackupTask]) -> Result<(), BackupError> {
    let mut owners: HashMap<(String, Namespace), &str> = HashMap::new();
    for task in tasks {
        let key = (task.destination.describe(), task.namespace());
        if let Some(owner) = owners.insert(key, &task.id) {
            return Err(BackupError::Configuration(format!(
                "tasks {owner} and {} store backups under the same name at {}; \
                 give one of them a different label or store_path",
                task.id,
                task.destination.describe()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl TaskRepository for FileTaskRepository {
    async fn load(&self, task_id: &str) -> Result<BackupTask, BackupError> {
        self.read()
            .await?
            .tasks
            .into_iter()
            .find(|task| task.id == task_id)
            .ok_or_else(|| BackupError::Configuration(format!("unknown task {task_id}")))
    }

    async fn task_ids(&self) -> Result<Vec<String>, BackupError> {
        Ok(self.read().await?.tasks.into_iter().map(|task| task.id).collect())
    }
}

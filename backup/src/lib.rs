//! Remote backup execution.
//!
//! An [`Orchestrator`] takes a task id, loads the task, connects to the
//! server over SSH, inspects the source, produces a zip archive or a database
//! dump on the remote host, streams it to the configured destination and
//! rotates old backups. Everything outside the engine (task storage, log
//! persistence, notifications, connectivity status) sits behind the traits in
//! [`ports`].

pub mod archive;
pub mod artifact;
pub mod clock;
pub mod connector;
pub mod dump;
mod error;
pub mod execution_log;
pub mod inspector;
pub mod notify;
pub mod orchestrator;
pub mod ports;
pub mod recorder;
pub mod repository;
pub mod retention;
pub mod task;

pub use artifact::{Artifact, ArtifactKind, Namespace};
pub use clock::{Clock, SystemClock};
pub use connector::SshConnector;
pub use error::BackupError;
pub use execution_log::{ExecutionLog, ExecutionOutcome, ExecutionState};
pub use notify::WebhookNotifier;
pub use orchestrator::{EngineSettings, ExecutionResult, Orchestrator};
pub use ports::LogConnectivityReporter;
pub use recorder::JsonFileRecorder;
pub use repository::FileTaskRepository;
pub use task::{BackupSource, BackupTask, DatabaseEngine, DestinationTarget};

#[cfg(test)]
mod testing;

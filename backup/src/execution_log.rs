use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Validating,
    Connecting,
    Inspecting,
    Producing,
    Transferring,
    Rotating,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }

    fn successor(&self) -> Option<ExecutionState> {
        use ExecutionState::*;
        match self {
            Pending => Some(Validating),
            Validating => Some(Connecting),
            Connecting => Some(Inspecting),
            Inspecting => Some(Producing),
            Producing => Some(Transferring),
            Transferring => Some(Rotating),
            Rotating => Some(Completed),
            Completed | Failed => None,
        }
    }

    /// Forward one step, or to `Failed` from any non-terminal state.
    pub fn can_advance_to(&self, next: ExecutionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == ExecutionState::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Validating => "validating",
            ExecutionState::Connecting => "connecting",
            ExecutionState::Inspecting => "inspecting",
            ExecutionState::Producing => "producing",
            ExecutionState::Transferring => "transferring",
            ExecutionState::Rotating => "rotating",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub state: ExecutionState,
    pub message: String,
}

/// Running record of one execution. Every entry is pushed to the recorder as
/// it is appended; [`ExecutionLog::finish`] seals it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub execution_id: Uuid,
    pub task_id: String,
    pub state: ExecutionState,
    pub entries: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub successful_at: Option<DateTime<Utc>>,
}

impl ExecutionLog {
    pub fn new(task_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            task_id: task_id.into(),
            state: ExecutionState::Pending,
            entries: Vec::new(),
            started_at,
            finished_at: None,
            successful_at: None,
        }
    }

    pub fn append(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.entries.push(LogEntry {
            at,
            state: self.state,
            message: message.into(),
        });
    }

    /// Moves to `next` and records why. Returns false, leaving the log
    /// untouched, when the transition is not allowed.
    pub fn advance(
        &mut self,
        next: ExecutionState,
        at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(
                "Ignoring transition {} -> {} for execution {}",
                self.state, next, self.execution_id
            );
            return false;
        }
        self.state = next;
        self.append(at, message);
        true
    }

    pub fn fail(&mut self, at: DateTime<Utc>, message: impl Into<String>) -> bool {
        self.advance(ExecutionState::Failed, at, message)
    }

    pub fn outcome(&self) -> ExecutionOutcome {
        if self.state == ExecutionState::Completed {
            ExecutionOutcome::Succeeded
        } else {
            ExecutionOutcome::Failed
        }
    }

    /// Seals the log. A log that never reached a terminal state is marked failed.
    pub fn finish(mut self, at: DateTime<Utc>) -> FinishedLog {
        if !self.state.is_terminal() {
            let state = self.state;
            self.fail(at, format!("Execution stopped while {state}"));
        }
        self.finished_at = Some(at);
        if self.state == ExecutionState::Completed {
            self.successful_at = Some(at);
        }
        FinishedLog(self)
    }

    pub fn text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("[{}] {}", entry.at.format("%Y-%m-%d %H:%M:%S"), entry.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The last `lines` entries, for notifications.
    pub fn excerpt(&self, lines: usize) -> String {
        let text = self.text();
        let all: Vec<&str> = text.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// An execution log that can no longer change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedLog(ExecutionLog);

impl FinishedLog {
    pub fn log(&self) -> &ExecutionLog {
        &self.0
    }
}

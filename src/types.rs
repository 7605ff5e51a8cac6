//! Core types for the task queue.

use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task identifier (SQLite row id, assigned on insert).
pub type TaskId = i64;

/// Upper bound for `timeout_seconds`.
pub const MAX_TIMEOUT_SECONDS: i64 = 1800;

/// Default timeout applied by the submission API.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 30;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    New,
    WaitingParent,
    Processing,
    Completed,
    Failed,
    Timeout,
    Deleted,
    Aborted,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::New,
        TaskStatus::WaitingParent,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Timeout,
        TaskStatus::Deleted,
        TaskStatus::Aborted,
    ];

    /// Statuses the dispatcher claims from.
    pub const CLAIMABLE: [TaskStatus; 2] = [TaskStatus::New, TaskStatus::WaitingParent];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::WaitingParent => "waiting_parent",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Deleted => "deleted",
            TaskStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Timeout
                | TaskStatus::Aborted
                | TaskStatus::Deleted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// Execution strategy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Detached; the spawned process reports its own completion.
    Background,
    /// Built-in in-process handler.
    Internal,
    /// Subprocess, waited on synchronously.
    #[default]
    Normal,
    /// Embedder-registered in-process handler.
    Function,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::Background,
        Method::Internal,
        Method::Normal,
        Method::Function,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Background => "background",
            Method::Internal => "internal",
            Method::Normal => "normal",
            Method::Function => "function",
        }
    }

    pub fn is_synchronous(&self) -> bool {
        !matches!(self, Method::Background)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown method '{}'", s))
    }
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub command: String,
    pub method: Method,
    pub timeout_seconds: i64,
    pub verbose: bool,
    pub parent_id: Option<TaskId>,
    pub parallel: bool,
    pub not_before: Option<i64>,
    pub data: Payload,
    pub results: Payload,
    pub pid: Option<i64>,
    pub executed_at: Option<i64>,
    pub time_spent_ms: Option<i64>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Token identifying the current claim, if the task is processing.
    pub fn completion_token(&self) -> Option<CompletionToken> {
        match (self.status, self.executed_at) {
            (TaskStatus::Processing, Some(claimed_at)) => Some(CompletionToken {
                task_id: self.id,
                claimed_at,
            }),
            _ => None,
        }
    }
}

/// Unvalidated task fields, as handed to the validator.
///
/// `status` of `None` means "new".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub status: Option<TaskStatus>,
    pub command: String,
    pub method: Method,
    pub timeout_seconds: i64,
    #[serde(default)]
    pub verbose: bool,
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub parallel: bool,
    pub not_before: Option<NotBefore>,
    #[serde(default)]
    pub data: Payload,
    #[serde(default)]
    pub results: Payload,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        Self {
            status: Some(task.status),
            command: task.command.clone(),
            method: task.method,
            timeout_seconds: task.timeout_seconds,
            verbose: task.verbose,
            parent_id: task.parent_id,
            parallel: task.parallel,
            not_before: task.not_before.map(NotBefore::EpochMs),
            data: task.data.clone(),
            results: task.results.clone(),
            description: task.description.clone(),
            created_by: task.created_by.clone(),
        }
    }
}

/// A `not_before` value in one of the accepted input representations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotBefore {
    EpochMs(i64),
    Rfc3339(String),
}

/// Fields after validation, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTask {
    pub status: TaskStatus,
    pub command: String,
    pub method: Method,
    pub timeout_seconds: i64,
    pub verbose: bool,
    pub parent_id: Option<TaskId>,
    pub parallel: bool,
    pub not_before: Option<i64>,
    pub data_json: String,
    pub results_json: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// Proof of a specific claim on a task.
///
/// Result writes carrying a stale token are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionToken {
    pub task_id: TaskId,
    pub claimed_at: i64,
}

/// Outcome written when a claim finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub results: Payload,
    pub time_spent_ms: i64,
}

/// Result of a `finish` write.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishResult {
    /// Written; carries the updated task and the number of children moved
    /// out of `waiting_parent`.
    Applied { task: Task, unblocked: usize },
    /// The token no longer matched a processing claim.
    Discarded,
}

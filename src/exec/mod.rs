//! Process execution service.
//!
//! The dispatcher hands each claimed task to an `Executor`. Synchronous
//! methods go through `execute` and block until an exit status is known or
//! the timeout elapses; `background` tasks go through `spawn_detached`, which
//! returns as soon as the process is running and passes it the claim token
//! it needs to report its own result.

pub mod handlers;
pub mod process;
pub mod spawn;

pub use handlers::{HandlerRegistry, TaskHandler};
pub use process::CommandExecutor;
pub use spawn::{NoopSpawner, ProcessSpawner, WorkerSpawner};

use crate::payload::Payload;
use crate::types::{CompletionToken, Method, Task, TaskId};
use async_trait::async_trait;
use std::path::PathBuf;

/// Environment variable carrying the task id to a detached process.
pub const ENV_TASK_ID: &str = "TASKQ_TASK_ID";
/// Environment variable carrying the claim token to a detached process.
pub const ENV_CLAIM_TOKEN: &str = "TASKQ_CLAIM_TOKEN";
/// Environment variable carrying the database path to a detached process.
pub const ENV_DB_PATH: &str = "TASKQ_DB_PATH";

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub task_id: TaskId,
    pub command: String,
    pub method: Method,
    pub payload: Payload,
    /// 0 means unbounded.
    pub timeout_seconds: i64,
    pub verbose: bool,
}

impl From<&Task> for ExecRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            command: task.command.clone(),
            method: task.method,
            payload: task.data.clone(),
            timeout_seconds: task.timeout_seconds,
            verbose: task.verbose,
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Timeout,
}

/// Output of a synchronous execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub output: Payload,
    pub exit_status: ExitStatus,
    pub process_id: Option<i64>,
    /// Captured standard error, when the runner has one.
    pub stderr: Option<String>,
}

impl ExecOutput {
    pub fn new(output: Payload, exit_status: ExitStatus) -> Self {
        Self {
            output,
            exit_status,
            process_id: None,
            stderr: None,
        }
    }
}

/// Everything a detached process needs to write its own result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
    pub token: CompletionToken,
    /// `None` when the store is not file-backed; the process then cannot
    /// report and the claim is left for reaping.
    pub db_path: Option<PathBuf>,
}

/// Failure to run a task at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command not found: {0}")]
    NotFound(String),

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running task: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs task commands.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a task to completion, bounded by its timeout.
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError>;

    /// Start a task without waiting for it. Returns the process id.
    async fn spawn_detached(
        &self,
        request: &ExecRequest,
        report: &ReportContext,
    ) -> Result<i64, ExecError>;
}

//! Report subcommand for taskq CLI
//!
//! A background task is started with its claim in the environment
//! (`TASKQ_TASK_ID`, `TASKQ_CLAIM_TOKEN`, `TASKQ_DB_PATH`), so a script can
//! finish with `taskq report --results '{...}'` and nothing else.

use crate::db::now_ms;
use crate::exec::{ENV_CLAIM_TOKEN, ENV_TASK_ID};
use crate::payload::Payload;
use crate::types::{CompletionToken, TaskId, TaskOutcome, TaskStatus};
use anyhow::{Context, Result, bail};
use clap::Args;

/// Arguments for the report subcommand
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Task being reported on
    #[arg(long, env = ENV_TASK_ID, value_name = "ID")]
    pub task_id: TaskId,

    /// Claim token handed to the task when it was started
    #[arg(long, env = ENV_CLAIM_TOKEN, value_name = "TOKEN")]
    pub token: i64,

    /// Final status: completed, failed or timeout
    #[arg(short, long, default_value = "completed", value_name = "STATUS")]
    pub status: TaskStatus,

    /// Results as JSON
    #[arg(short, long, value_name = "JSON")]
    pub results: Option<String>,

    /// Time spent in milliseconds (default: since the claim)
    #[arg(long, value_name = "MS")]
    pub time_spent_ms: Option<i64>,
}

impl ReportArgs {
    pub fn token(&self) -> CompletionToken {
        CompletionToken {
            task_id: self.task_id,
            claimed_at: self.token,
        }
    }

    pub fn outcome(&self) -> Result<TaskOutcome> {
        if !matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        ) {
            bail!(
                "a task can only report completed, failed or timeout, not '{}'",
                self.status
            );
        }
        let results = match self.results {
            Some(ref json) => {
                Payload::from_json_str(json).context("--results is not valid JSON")?
            }
            None => Payload::Null,
        };
        let time_spent_ms = self
            .time_spent_ms
            .unwrap_or_else(|| (now_ms() - self.token).max(0));

        Ok(TaskOutcome {
            status: self.status,
            results,
            time_spent_ms,
        })
    }
}

//! CLI command definitions for taskq
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod report;
pub mod submit;

use crate::format::OutputFormat;
use crate::types::{TaskId, TaskStatus};
use clap::{Args, Parser, Subcommand};
use report::ReportArgs;
use submit::SubmitArgs;

/// Persistent hierarchical task queue
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format: markdown (default) or json
    #[arg(short, long, default_value = "markdown", global = true, value_name = "FORMAT")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a new task
    Submit(SubmitArgs),

    /// Run a dispatcher worker
    Work(WorkArgs),

    /// Show a task
    Status(TaskArg),

    /// List tasks by status
    List(ListArgs),

    /// List the direct children of a task
    Children(TaskArg),

    /// Put a task and its descendants back to `new`, clearing results
    Reset(TaskArg),

    /// Mark a task and its descendants aborted
    Abort(TaskArg),

    /// Mark a task and its descendants failed
    Fail(TaskArg),

    /// Soft-delete a task and its descendants
    Delete(TaskArg),

    /// Record the result of a detached background task
    Report(ReportArgs),

    /// Time out claims that outlived their bound
    Reap,

    /// Show task counts per status
    Stats,
}

/// A single task id.
#[derive(Args, Debug)]
pub struct TaskArg {
    #[arg(value_name = "ID")]
    pub id: TaskId,
}

/// Arguments for the work subcommand
#[derive(Args, Debug)]
pub struct WorkArgs {
    /// Exit once nothing is claimable instead of polling
    #[arg(long)]
    pub drain: bool,

    /// Only claim tasks with at least this id
    #[arg(long, value_name = "ID")]
    pub min_id: Option<TaskId>,
}

/// Arguments for the list subcommand
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Statuses to include (comma-separated); all when omitted
    #[arg(short, long, value_name = "LIST", value_delimiter = ',')]
    pub status: Vec<TaskStatus>,
}

//! Submit subcommand for taskq CLI

use crate::payload::Payload;
use crate::queue::SubmitRequest;
use crate::types::{Method, NotBefore, TaskId};
use anyhow::{Context, Result};
use clap::Args;

/// Arguments for the submit subcommand
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Command to run, resolved in the commands directory
    #[arg(value_name = "COMMAND")]
    pub command: String,

    /// Execution method: normal, internal, function or background
    #[arg(short, long, value_name = "METHOD")]
    pub method: Option<Method>,

    /// Timeout in seconds (0 = unbounded, max 1800)
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<i64>,

    /// Parent task id
    #[arg(short, long, value_name = "ID")]
    pub parent: Option<TaskId>,

    /// Run alongside a running background parent instead of after it
    #[arg(long)]
    pub parallel: bool,

    /// Earliest start: epoch milliseconds or RFC 3339
    #[arg(long, value_name = "WHEN")]
    pub not_before: Option<String>,

    /// Task data as JSON
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,

    /// Human-readable description
    #[arg(long)]
    pub description: Option<String>,

    /// Log the task's output and keep its stderr in results
    #[arg(long)]
    pub verbose_task: bool,

    /// Who submitted the task
    #[arg(long, value_name = "NAME")]
    pub created_by: Option<String>,

    /// Do not start a worker after submitting
    #[arg(long)]
    pub no_dispatch: bool,
}

/// Interpret a `--not-before` value.
pub fn parse_not_before(value: &str) -> NotBefore {
    match value.parse::<i64>() {
        Ok(ms) => NotBefore::EpochMs(ms),
        Err(_) => NotBefore::Rfc3339(value.to_string()),
    }
}

impl SubmitArgs {
    /// Build the submission request. Field validation happens on submit.
    pub fn to_request(&self) -> Result<SubmitRequest> {
        let data = match self.data {
            Some(ref json) => Payload::from_json_str(json).context("--data is not valid JSON")?,
            None => Payload::Null,
        };

        Ok(SubmitRequest {
            command: self.command.clone(),
            method: self.method,
            timeout_seconds: self.timeout,
            parent_id: self.parent,
            parallel: self.parallel,
            not_before: self.not_before.as_deref().map(parse_not_before),
            data,
            description: self.description.clone(),
            verbose: self.verbose_task,
            created_by: self.created_by.clone(),
            auto_dispatch: self.no_dispatch.then_some(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn parse(args: &[&str]) -> SubmitArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        args
    }

    #[test]
    fn builds_request_from_flags() {
        let args = parse(&[
            "taskq",
            "submit",
            "resize",
            "--method",
            "background",
            "--timeout",
            "120",
            "--data",
            r#"{"width": 640}"#,
            "--not-before",
            "2030-01-01T00:00:00Z",
            "--no-dispatch",
        ]);
        let request = args.to_request().unwrap();

        assert_eq!(request.command, "resize");
        assert_eq!(request.method, Some(Method::Background));
        assert_eq!(request.timeout_seconds, Some(120));
        assert_eq!(request.data.get("width"), Some(&Payload::Int(640)));
        assert_eq!(
            request.not_before,
            Some(NotBefore::Rfc3339("2030-01-01T00:00:00Z".to_string()))
        );
        assert_eq!(request.auto_dispatch, Some(false));
    }

    #[test]
    fn defaults_are_left_to_the_queue() {
        let request = parse(&["taskq", "submit", "noop"]).to_request().unwrap();
        assert_eq!(request.method, None);
        assert_eq!(request.timeout_seconds, None);
        assert_eq!(request.auto_dispatch, None);
        assert!(request.data.is_null());
    }

    #[test]
    fn bad_data_is_rejected() {
        let args = parse(&["taskq", "submit", "noop", "--data", "{nope"]);
        assert!(args.to_request().is_err());
    }

    #[test]
    fn not_before_accepts_epoch_ms() {
        assert_eq!(parse_not_before("1700000000000"), NotBefore::EpochMs(1_700_000_000_000));
    }
}

//! Subprocess-backed executor.

use super::{
    ENV_CLAIM_TOKEN, ENV_DB_PATH, ENV_TASK_ID, ExecError, ExecOutput, ExecRequest, Executor,
    ExitStatus, HandlerRegistry, ReportContext,
};
use crate::payload::Payload;
use crate::types::Method;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

/// Runs commands found under a commands directory, and in-process handlers
/// for `internal`/`function` tasks whose command is registered.
///
/// The task payload is written to the process's stdin as JSON. Standard
/// output is parsed as JSON when possible and kept as text otherwise. Exit
/// code 0 is success.
#[derive(Clone)]
pub struct CommandExecutor {
    commands_dir: PathBuf,
    handlers: HandlerRegistry,
}

impl CommandExecutor {
    pub fn new(commands_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands_dir: commands_dir.into(),
            handlers: HandlerRegistry::with_builtins(),
        }
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn commands_dir(&self) -> &Path {
        &self.commands_dir
    }

    fn resolve(&self, command: &str) -> Result<PathBuf, ExecError> {
        let path = self.commands_dir.join(command);
        if !path.is_file() {
            return Err(ExecError::NotFound(path.display().to_string()));
        }
        // Absolute, since the child runs with the commands dir as its cwd
        path.canonicalize()
            .map_err(|_| ExecError::NotFound(path.display().to_string()))
    }

    fn spawn(
        &self,
        request: &ExecRequest,
        configure: impl FnOnce(&mut Command),
    ) -> Result<Child, ExecError> {
        let path = self.resolve(&request.command)?;
        let mut cmd = Command::new(&path);
        cmd.current_dir(&self.commands_dir)
            .env(ENV_TASK_ID, request.task_id.to_string())
            .stdin(Stdio::piped());
        configure(&mut cmd);
        cmd.spawn().map_err(|source| ExecError::Spawn {
            command: request.command.clone(),
            source,
        })
    }

    /// Feed the payload to stdin without blocking on a child that never reads it.
    fn feed_stdin(child: &mut Child, payload: &Payload) -> Result<(), ExecError> {
        let bytes = payload
            .to_json_string()
            .map_err(|e| ExecError::Io(std::io::Error::other(e)))?
            .into_bytes();
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(&bytes).await;
            });
        }
        Ok(())
    }

    async fn run_handler(&self, request: &ExecRequest) -> Option<ExecOutput> {
        let handler = self.handlers.get(&request.command)?;
        let run = handler.run(&request.payload);
        let result = match timeout_for(request.timeout_seconds) {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => return Some(ExecOutput::new(Payload::Null, ExitStatus::Timeout)),
            },
            None => run.await,
        };
        Some(match result {
            Ok(output) => ExecOutput::new(output, ExitStatus::Success),
            Err(message) => ExecOutput::new(
                Payload::map([("error", Payload::from(message))]),
                ExitStatus::Failure,
            ),
        })
    }

    async fn run_process(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        let mut child = self.spawn(request, |cmd| {
            cmd.stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
        })?;
        let process_id = child.id().map(i64::from);
        Self::feed_stdin(&mut child, &request.payload)?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match timeout_for(request.timeout_seconds) {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited?,
                Err(_) => {
                    return Ok(ExecOutput {
                        output: Payload::Null,
                        exit_status: ExitStatus::Timeout,
                        process_id,
                        stderr: None,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let exit_status = if waited.status.success() {
            ExitStatus::Success
        } else {
            ExitStatus::Failure
        };
        let stderr = String::from_utf8_lossy(&waited.stderr).trim().to_string();
        debug!(
            task_id = request.task_id,
            code = ?waited.status.code(),
            "process exited"
        );

        Ok(ExecOutput {
            output: parse_output(&waited.stdout),
            exit_status,
            process_id,
            stderr: (!stderr.is_empty()).then_some(stderr),
        })
    }
}

fn timeout_for(timeout_seconds: i64) -> Option<Duration> {
    u64::try_from(timeout_seconds)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

/// Interpret captured stdout as a payload.
pub fn parse_output(stdout: &[u8]) -> Payload {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Payload::Null;
    }
    Payload::from_json_str(trimmed).unwrap_or_else(|_| Payload::Text(trimmed.to_string()))
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        if matches!(request.method, Method::Internal | Method::Function)
            && let Some(output) = self.run_handler(request).await
        {
            return Ok(output);
        }
        self.run_process(request).await
    }

    async fn spawn_detached(
        &self,
        request: &ExecRequest,
        report: &ReportContext,
    ) -> Result<i64, ExecError> {
        let mut child = self.spawn(request, |cmd| {
            cmd.stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(false)
                .env(ENV_CLAIM_TOKEN, report.token.claimed_at.to_string());
            if let Some(ref db_path) = report.db_path {
                cmd.env(ENV_DB_PATH, db_path);
            }
        })?;
        let pid = child.id().map(i64::from).unwrap_or_default();
        Self::feed_stdin(&mut child, &request.payload)?;
        // The runtime reaps the dropped child once it exits.
        drop(child);
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, method: Method) -> ExecRequest {
        ExecRequest {
            task_id: 1,
            command: command.to_string(),
            method,
            payload: Payload::map([("ms", Payload::Int(50))]),
            timeout_seconds: 5,
            verbose: false,
        }
    }

    #[test]
    fn stdout_parsing() {
        assert_eq!(parse_output(b""), Payload::Null);
        assert_eq!(parse_output(b"  {\"a\": 1}\n"), Payload::map([("a", Payload::Int(1))]));
        assert_eq!(parse_output(b"done\n"), Payload::from("done"));
    }

    #[test]
    fn zero_timeout_is_unbounded() {
        assert_eq!(timeout_for(0), None);
        assert_eq!(timeout_for(3), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn internal_method_uses_registered_handler() {
        let executor = CommandExecutor::new("/nonexistent");
        let out = executor.execute(&request("echo", Method::Internal)).await.unwrap();
        assert_eq!(out.exit_status, ExitStatus::Success);
        assert_eq!(out.output.get("ms"), Some(&Payload::Int(50)));
    }

    #[tokio::test]
    async fn handler_timeout_is_reported() {
        let mut executor = CommandExecutor::new("/nonexistent");
        executor.handlers_mut().register_fn("hang", |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Payload::Null)
        });
        let mut req = request("hang", Method::Function);
        req.timeout_seconds = 1;
        let out = executor.execute(&req).await.unwrap();
        assert_eq!(out.exit_status, ExitStatus::Timeout);
    }

    #[tokio::test]
    async fn missing_command_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new(dir.path());
        let err = executor
            .execute(&request("missing", Method::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_script_with_payload_on_stdin() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cat-json");
        std::fs::write(&script, "#!/bin/sh\ncat\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let failing = dir.path().join("fail");
        std::fs::write(&failing, "#!/bin/sh\necho oops >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&failing, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = CommandExecutor::new(dir.path());
        let out = executor.execute(&request("cat-json", Method::Normal)).await.unwrap();
        assert_eq!(out.exit_status, ExitStatus::Success);
        assert_eq!(out.output, Payload::map([("ms", Payload::Int(50))]));
        assert!(out.process_id.is_some());

        let out = executor.execute(&request("fail", Method::Normal)).await.unwrap();
        assert_eq!(out.exit_status, ExitStatus::Failure);
        assert_eq!(out.stderr.as_deref(), Some("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_script_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = CommandExecutor::new(dir.path());
        let mut req = request("slow", Method::Normal);
        req.timeout_seconds = 1;
        let out = executor.execute(&req).await.unwrap();
        assert_eq!(out.exit_status, ExitStatus::Timeout);
    }
}

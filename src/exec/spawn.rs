//! Starting detached dispatcher workers.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Starts a dispatcher worker in the background.
///
/// Calling it while a worker is already running must be harmless: claims are
/// atomic, so a duplicate worker only finds nothing to do and exits.
pub trait WorkerSpawner: Send + Sync {
    fn spawn_worker(&self) -> Result<()>;
}

/// Does nothing. Used when auto-dispatch is handled elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpawner;

impl WorkerSpawner for NoopSpawner {
    fn spawn_worker(&self) -> Result<()> {
        Ok(())
    }
}

/// Launches `<program> <args...>` with all stdio detached.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Spawner re-running the current executable as a draining worker
    /// against the given database.
    pub fn current_exe(db_path: impl Into<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("cannot locate the running executable")?;
        let db_path: PathBuf = db_path.into();
        Ok(Self::new(
            program,
            vec![
                "--log".to_string(),
                "off".to_string(),
                "--database".to_string(),
                db_path.to_string_lossy().into_owned(),
                "work".to_string(),
                "--drain".to_string(),
            ],
        ))
    }

    /// Hand an explicit config file to spawned workers.
    pub fn with_config(mut self, config: impl Into<PathBuf>) -> Self {
        let config: PathBuf = config.into();
        self.args.splice(
            0..0,
            ["--config".to_string(), config.to_string_lossy().into_owned()],
        );
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Start the worker and wait for it on a background thread, so a
    /// long-lived caller does not accumulate exited children.
    pub fn spawn_reaped(&self) -> Result<JoinHandle<Option<ExitStatus>>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn worker {}", self.program.display()))?;
        let pid = child.id();
        debug!(pid, "worker spawned");

        std::thread::Builder::new()
            .name(format!("taskq-worker-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => {
                    debug!(pid, %status, "worker exited");
                    Some(status)
                }
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for worker");
                    None
                }
            })
            .context("failed to start worker wait thread")
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn_worker(&self) -> Result<()> {
        self.spawn_reaped().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_exe_worker_drains_given_database() {
        let spawner = ProcessSpawner::current_exe("/tmp/q.db").unwrap();
        let args = spawner.args();
        assert_eq!(args[args.len() - 2..], ["work".to_string(), "--drain".to_string()]);
        assert!(args.contains(&"/tmp/q.db".to_string()));
    }

    #[test]
    fn config_is_passed_before_the_subcommand() {
        let spawner = ProcessSpawner::current_exe("/tmp/q.db")
            .unwrap()
            .with_config("/etc/taskq.yaml");
        assert_eq!(spawner.args()[..2], ["--config".to_string(), "/etc/taskq.yaml".to_string()]);
        assert_eq!(spawner.args().last().map(String::as_str), Some("--drain"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let spawner = ProcessSpawner::new("/definitely/not/here", vec![]);
        assert!(spawner.spawn_worker().is_err());
        assert!(NoopSpawner.spawn_worker().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn spawned_worker_is_waited_for() {
        let spawner = ProcessSpawner::new("/bin/sh", vec!["-c".into(), "exit 3".into()]);
        let status = spawner.spawn_reaped().unwrap().join().unwrap().unwrap();
        assert_eq!(status.code(), Some(3));
    }
}

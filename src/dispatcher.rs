//! The dispatcher loop.
//!
//! Each pass reaps expired claims, claims the oldest eligible task and hands
//! it to the executor. Synchronous methods are awaited and their outcome is
//! written under the claim token; `background` tasks are started detached
//! and left to report their own result.
//!
//! Execution problems never propagate out of a pass: they are recorded on
//! the task as `failed` or `timeout` with a diagnostic in `results`.

use crate::config::DispatcherConfig;
use crate::db::{Database, now_ms};
use crate::error::QueueError;
use crate::events::{EventSink, QueueEvent, TracingSink};
use crate::exec::{ExecOutput, ExecRequest, Executor, ExitStatus, ReportContext};
use crate::payload::Payload;
use crate::types::{CompletionToken, FinishResult, Method, Task, TaskId, TaskOutcome, TaskStatus};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// When the loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stop as soon as nothing is claimable.
    Drain,
    /// Sleep for the poll interval and try again until shut down.
    Daemon,
}

/// What a single pass did with the task it claimed.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// A terminal status was written.
    Finished { task_id: TaskId, status: TaskStatus },
    /// A background process is running and will report on its own.
    Detached { task_id: TaskId, pid: i64 },
    /// The claim was released while the task ran; its outcome was dropped.
    Discarded { task_id: TaskId },
}

/// Write a claim's outcome and emit the matching events.
pub(crate) fn record_outcome(
    db: &Database,
    events: &dyn EventSink,
    token: CompletionToken,
    outcome: &TaskOutcome,
) -> Result<FinishResult> {
    let result = db.finish_task(token, outcome)?;
    match &result {
        FinishResult::Applied { task, unblocked } => {
            events.emit(&QueueEvent::Finished {
                task_id: task.id,
                status: task.status,
                time_spent_ms: outcome.time_spent_ms,
            });
            if *unblocked > 0 {
                events.emit(&QueueEvent::ChildrenUnblocked {
                    parent_id: task.id,
                    count: *unblocked,
                });
            }
        }
        FinishResult::Discarded => events.emit(&QueueEvent::ResultDiscarded {
            task_id: token.task_id,
            status: outcome.status,
        }),
    }
    Ok(result)
}

fn error_payload(err: QueueError) -> Payload {
    Payload::map([("error", Payload::Text(err.message))])
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Build the outcome for a synchronous run.
fn outcome_from_output(task: &Task, output: ExecOutput, time_spent_ms: i64) -> TaskOutcome {
    let status = match output.exit_status {
        ExitStatus::Success => TaskStatus::Completed,
        ExitStatus::Failure => TaskStatus::Failed,
        ExitStatus::Timeout => TaskStatus::Timeout,
    };

    let mut results = match (status, output.output) {
        (TaskStatus::Timeout, Payload::Null) => error_payload(QueueError::timeout(task.timeout_seconds)),
        (_, output) => output,
    };

    if task.verbose {
        if let Ok(rendered) = results.to_json_string() {
            info!(task_id = task.id, output = %rendered, "task output");
        }
        if let Some(stderr) = output.stderr.filter(|s| !s.is_empty()) {
            results = Payload::map([("output", results), ("stderr", Payload::Text(stderr))]);
        }
    }

    // Whatever a handler hands back must still be storable.
    if let Some(problem) = results.find_unsupported() {
        return TaskOutcome {
            status: TaskStatus::Failed,
            results: Payload::map([
                ("error", Payload::from("result has an unsupported data type")),
                ("details", Payload::Text(problem)),
            ]),
            time_spent_ms,
        };
    }

    TaskOutcome {
        status,
        results,
        time_spent_ms,
    }
}

/// Claims and runs tasks from one store.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    executor: Arc<dyn Executor>,
    events: Arc<dyn EventSink>,
    config: DispatcherConfig,
    worker_pid: i64,
    min_id: Option<TaskId>,
}

impl Dispatcher {
    pub fn new(db: Database, executor: Arc<dyn Executor>, config: DispatcherConfig) -> Self {
        Self {
            db,
            executor,
            events: Arc::new(TracingSink),
            config,
            worker_pid: i64::from(std::process::id()),
            min_id: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Only claim tasks with an id of at least `min_id`.
    pub fn with_min_id(mut self, min_id: Option<TaskId>) -> Self {
        self.min_id = min_id;
        self
    }

    /// Time out claims that outlived their bound plus the grace period.
    pub fn reap(&self) -> Result<Vec<TaskId>> {
        let reaped = self
            .db
            .reap_expired(now_ms(), self.config.reap_grace_seconds)?;
        if !reaped.is_empty() {
            self.events.emit(&QueueEvent::Reaped {
                task_ids: reaped.clone(),
            });
        }
        Ok(reaped)
    }

    /// Claim and run at most one task. `None` when nothing was claimable.
    pub async fn run_once(&self) -> Result<Option<Dispatched>> {
        self.reap()?;

        let Some(task) = self.db.claim_next(
            &TaskStatus::CLAIMABLE,
            TaskStatus::Processing,
            self.worker_pid,
            self.min_id,
        )?
        else {
            return Ok(None);
        };
        let token = task
            .completion_token()
            .ok_or_else(|| anyhow!("claimed task {} has no claim token", task.id))?;

        self.events.emit(&QueueEvent::Claimed {
            task_id: task.id,
            command: task.command.clone(),
            method: task.method,
            pid: self.worker_pid,
        });
        if task.timeout_seconds == 0 && task.method.is_synchronous() {
            self.events.emit(&QueueEvent::UnboundedTimeout {
                task_id: task.id,
                command: task.command.clone(),
            });
        }

        let request = ExecRequest::from(&task);
        let dispatched = if task.method == Method::Background {
            self.start_detached(&task, token, &request).await?
        } else {
            self.run_synchronous(&task, token, &request).await?
        };
        Ok(Some(dispatched))
    }

    async fn run_synchronous(
        &self,
        task: &Task,
        token: CompletionToken,
        request: &ExecRequest,
    ) -> Result<Dispatched> {
        let started = Instant::now();
        let outcome = match self.executor.execute(request).await {
            Ok(output) => outcome_from_output(task, output, elapsed_ms(started)),
            Err(e) => TaskOutcome {
                status: TaskStatus::Failed,
                results: error_payload(QueueError::execution(e)),
                time_spent_ms: elapsed_ms(started),
            },
        };
        self.finish(token, &outcome)
    }

    async fn start_detached(
        &self,
        task: &Task,
        token: CompletionToken,
        request: &ExecRequest,
    ) -> Result<Dispatched> {
        let report = ReportContext {
            token,
            db_path: self.db.path().map(|p| p.to_path_buf()),
        };
        if report.db_path.is_none() {
            warn!(
                task_id = task.id,
                "store is not file-backed; background task cannot report and will be reaped"
            );
        }

        let started = Instant::now();
        match self.executor.spawn_detached(request, &report).await {
            Ok(pid) => {
                if self.db.set_pid(token, pid)? {
                    self.events.emit(&QueueEvent::Detached {
                        task_id: task.id,
                        pid,
                    });
                } else {
                    debug!(task_id = task.id, pid, "claim released before pid was recorded");
                }
                Ok(Dispatched::Detached {
                    task_id: task.id,
                    pid,
                })
            }
            Err(e) => {
                let outcome = TaskOutcome {
                    status: TaskStatus::Failed,
                    results: error_payload(QueueError::execution(e)),
                    time_spent_ms: elapsed_ms(started),
                };
                self.finish(token, &outcome)
            }
        }
    }

    fn finish(&self, token: CompletionToken, outcome: &TaskOutcome) -> Result<Dispatched> {
        match record_outcome(&self.db, self.events.as_ref(), token, outcome)? {
            FinishResult::Applied { task, .. } => Ok(Dispatched::Finished {
                task_id: task.id,
                status: task.status,
            }),
            FinishResult::Discarded => Ok(Dispatched::Discarded {
                task_id: token.task_id,
            }),
        }
    }

    /// Run passes until the mode says stop or `shutdown` turns true.
    /// Returns the number of tasks claimed.
    ///
    /// In daemon mode a failing pass is logged and retried after the poll
    /// interval; in drain mode it ends the run.
    pub async fn run(&self, mode: RunMode, mut shutdown: watch::Receiver<bool>) -> Result<usize> {
        let mut claimed = 0usize;
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => {
                    claimed += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) if mode == RunMode::Daemon => {
                    warn!(error = %format!("{:#}", e), "dispatch pass failed");
                }
                Err(e) => return Err(e),
            }

            if mode == RunMode::Drain {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(claimed, ?mode, "dispatcher stopped");
        Ok(claimed)
    }
}

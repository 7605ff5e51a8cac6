//! Submission and administration surface.
//!
//! `TaskQueue` is the entry point callers use: it applies submission
//! defaults, decides the initial status from the parent's state, inserts
//! through the store, and optionally kicks a worker. Administrative
//! operations are cascades over the task's subtree.

use crate::config::SubmitConfig;
use crate::db::Database;
use crate::db::stats::QueueStats;
use crate::dispatcher::record_outcome;
use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, QueueEvent, TracingSink};
use crate::exec::{NoopSpawner, WorkerSpawner};
use crate::payload::Payload;
use crate::types::{
    CompletionToken, FinishResult, Method, NotBefore, Task, TaskDraft, TaskId, TaskOutcome,
    TaskStatus,
};
use std::sync::Arc;

/// Fields accepted by `submit`. Unset options take the queue's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitRequest {
    pub command: String,
    pub method: Option<Method>,
    pub timeout_seconds: Option<i64>,
    pub parent_id: Option<TaskId>,
    pub parallel: bool,
    pub not_before: Option<NotBefore>,
    pub data: Payload,
    pub description: Option<String>,
    pub verbose: bool,
    pub created_by: Option<String>,
    pub auto_dispatch: Option<bool>,
}

impl SubmitRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn timeout_seconds(mut self, seconds: i64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn not_before(mut self, not_before: NotBefore) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    pub fn auto_dispatch(mut self, auto_dispatch: bool) -> Self {
        self.auto_dispatch = Some(auto_dispatch);
        self
    }
}

/// Handle for submitting and administering tasks.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    defaults: SubmitConfig,
    spawner: Arc<dyn WorkerSpawner>,
    events: Arc<dyn EventSink>,
    reap_grace_seconds: i64,
}

impl TaskQueue {
    pub fn new(db: Database, defaults: SubmitConfig) -> Self {
        Self {
            db,
            defaults,
            spawner: Arc::new(NoopSpawner),
            events: Arc::new(TracingSink),
            reap_grace_seconds: 60,
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_reap_grace(mut self, seconds: i64) -> Self {
        self.reap_grace_seconds = seconds;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Validate and insert a task.
    ///
    /// A non-parallel child whose parent has not completed starts in
    /// `waiting_parent`. Nothing is written when validation fails.
    pub fn submit(&self, request: SubmitRequest) -> QueueResult<Task> {
        let mut status = TaskStatus::New;
        if let Some(parent_id) = request.parent_id
            && !request.parallel
            && let Some(parent) = self.db.get_task(parent_id)?
            && parent.status != TaskStatus::Completed
        {
            status = TaskStatus::WaitingParent;
        }

        let auto_dispatch = request.auto_dispatch.unwrap_or(self.defaults.auto_dispatch);
        let draft = TaskDraft {
            status: Some(status),
            command: request.command,
            method: request.method.unwrap_or(self.defaults.method),
            timeout_seconds: request
                .timeout_seconds
                .unwrap_or(self.defaults.timeout_seconds),
            verbose: request.verbose,
            parent_id: request.parent_id,
            parallel: request.parallel,
            not_before: request.not_before,
            data: request.data,
            results: Payload::Null,
            description: request.description,
            created_by: request.created_by,
        };

        let task = self.db.insert_task(&draft)?;

        self.events.emit(&QueueEvent::Submitted {
            task_id: task.id,
            command: task.command.clone(),
            status: task.status,
        });
        if task.timeout_seconds == 0 && task.method.is_synchronous() {
            self.events.emit(&QueueEvent::UnboundedTimeout {
                task_id: task.id,
                command: task.command.clone(),
            });
        }

        // The task is already stored; a failed spawn leaves it for the next worker.
        if auto_dispatch && let Err(e) = self.spawner.spawn_worker() {
            self.events.emit(&QueueEvent::WorkerSpawnFailed {
                reason: format!("{:#}", e),
            });
        }

        Ok(task)
    }

    /// Cascade a status over a task's subtree, returning the number of tasks
    /// written.
    pub fn set_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        reset_results: bool,
    ) -> QueueResult<usize> {
        let affected = self
            .db
            .set_status_cascade(task_id, status, reset_results)?;
        self.events.emit(&QueueEvent::Cascaded {
            task_id,
            status,
            affected,
        });
        Ok(affected)
    }

    /// Put a subtree back to `new` with results cleared.
    pub fn reset(&self, task_id: TaskId) -> QueueResult<usize> {
        self.set_status(task_id, TaskStatus::New, true)
    }

    pub fn abort(&self, task_id: TaskId) -> QueueResult<usize> {
        self.set_status(task_id, TaskStatus::Aborted, false)
    }

    pub fn fail(&self, task_id: TaskId) -> QueueResult<usize> {
        self.set_status(task_id, TaskStatus::Failed, false)
    }

    /// Soft delete: the rows stay, marked `deleted`.
    pub fn delete(&self, task_id: TaskId) -> QueueResult<usize> {
        self.set_status(task_id, TaskStatus::Deleted, false)
    }

    pub fn get_task(&self, task_id: TaskId) -> QueueResult<Task> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| QueueError::task_not_found(task_id))
    }

    pub fn get_status(&self, task_id: TaskId) -> QueueResult<TaskStatus> {
        Ok(self.get_task(task_id)?.status)
    }

    pub fn list_by_status(&self, statuses: &[TaskStatus]) -> QueueResult<Vec<Task>> {
        Ok(self.db.list_by_status(statuses)?)
    }

    pub fn list_children(&self, task_id: TaskId) -> QueueResult<Vec<Task>> {
        self.get_task(task_id)?;
        Ok(self.db.list_children(task_id)?)
    }

    /// Record the result a detached task reports about itself.
    pub fn report(&self, token: CompletionToken, outcome: &TaskOutcome) -> QueueResult<FinishResult> {
        self.get_task(token.task_id)?;
        Ok(record_outcome(&self.db, self.events.as_ref(), token, outcome)?)
    }

    /// Time out claims that outlived their bound plus the grace period.
    pub fn reap(&self, now: i64) -> QueueResult<Vec<TaskId>> {
        let reaped = self.db.reap_expired(now, self.reap_grace_seconds)?;
        if !reaped.is_empty() {
            self.events.emit(&QueueEvent::Reaped {
                task_ids: reaped.clone(),
            });
        }
        Ok(reaped)
    }

    pub fn stats(&self) -> QueueResult<QueueStats> {
        Ok(self.db.get_stats()?)
    }
}

//! Structured scheduler events.
//!
//! Components report what happened as `QueueEvent` values through an
//! injected `EventSink`. Rendering (log lines, notifications) is the sink's
//! business.

use crate::types::{Method, TaskId, TaskStatus};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Something the scheduler did to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Submitted {
        task_id: TaskId,
        command: String,
        status: TaskStatus,
    },
    Claimed {
        task_id: TaskId,
        command: String,
        method: Method,
        pid: i64,
    },
    /// A background task was started and left to report on its own.
    Detached { task_id: TaskId, pid: i64 },
    Finished {
        task_id: TaskId,
        status: TaskStatus,
        time_spent_ms: i64,
    },
    /// A result arrived for a claim that no longer exists.
    ResultDiscarded { task_id: TaskId, status: TaskStatus },
    ChildrenUnblocked { parent_id: TaskId, count: usize },
    Cascaded {
        task_id: TaskId,
        status: TaskStatus,
        affected: usize,
    },
    Reaped { task_ids: Vec<TaskId> },
    /// A synchronous task with `timeout_seconds == 0` can hold a worker
    /// indefinitely.
    UnboundedTimeout { task_id: TaskId, command: String },
    WorkerSpawnFailed { reason: String },
}

/// Receiver for scheduler events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &QueueEvent);
}

/// Emits events as structured tracing records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &QueueEvent) {
        match event {
            QueueEvent::Submitted {
                task_id,
                command,
                status,
            } => tracing::info!(task_id, %command, %status, "task submitted"),
            QueueEvent::Claimed {
                task_id,
                command,
                method,
                pid,
            } => tracing::info!(task_id, %command, %method, pid, "task claimed"),
            QueueEvent::Detached { task_id, pid } => {
                tracing::info!(task_id, pid, "background task detached")
            }
            QueueEvent::Finished {
                task_id,
                status,
                time_spent_ms,
            } => match status {
                TaskStatus::Completed => {
                    tracing::info!(task_id, %status, time_spent_ms, "task finished")
                }
                _ => tracing::warn!(task_id, %status, time_spent_ms, "task finished"),
            },
            QueueEvent::ResultDiscarded { task_id, status } => {
                tracing::warn!(task_id, %status, "discarding result for a released claim")
            }
            QueueEvent::ChildrenUnblocked { parent_id, count } => {
                tracing::debug!(parent_id, count, "waiting children unblocked")
            }
            QueueEvent::Cascaded {
                task_id,
                status,
                affected,
            } => tracing::info!(task_id, %status, affected, "status cascaded"),
            QueueEvent::Reaped { task_ids } => {
                tracing::warn!(count = task_ids.len(), ?task_ids, "expired claims reaped")
            }
            QueueEvent::UnboundedTimeout { task_id, command } => tracing::warn!(
                task_id,
                %command,
                "task has timeout_seconds = 0 and may occupy a worker indefinitely"
            ),
            QueueEvent::WorkerSpawnFailed { reason } => {
                tracing::error!(%reason, "failed to spawn worker")
            }
        }
    }
}

/// Keeps events in memory, for tests and embedders that poll.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<QueueEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &QueueEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(QueueEvent::Cascaded {
            task_id: 4,
            status: TaskStatus::Aborted,
            affected: 3,
        })
        .unwrap();
        assert_eq!(json["event"], "cascaded");
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["affected"], 3);
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(&QueueEvent::Reaped { task_ids: vec![1] });
        sink.emit(&QueueEvent::ChildrenUnblocked {
            parent_id: 1,
            count: 2,
        });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], QueueEvent::ChildrenUnblocked { count: 2, .. }));
        sink.clear();
        assert!(sink.events().is_empty());
    }
}

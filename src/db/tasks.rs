//! Task CRUD, atomic claiming and result writes.

use super::{Database, now_ms};
use crate::error::QueueError;
use crate::payload::Payload;
use crate::types::{
    CompletionToken, FinishResult, Task, TaskDraft, TaskId, TaskOutcome, TaskStatus,
};
use crate::validate::{encode_payload, validate};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::collections::HashSet;
use std::str::FromStr;

/// Render statuses as a SQL `IN` list body. Only enum literals are emitted.
pub(crate) fn status_list_sql(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversion_error(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, err.into())
}

fn get_enum<T: FromStr<Err = String>>(row: &Row, col: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    raw.parse().map_err(conversion_error)
}

fn get_payload(row: &Row, col: &str) -> rusqlite::Result<Payload> {
    let raw: Option<String> = row.get(col)?;
    match raw {
        None => Ok(Payload::Null),
        Some(text) => Payload::from_json_str(&text).map_err(conversion_error),
    }
}

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        status: get_enum(row, "status")?,
        command: row.get("command")?,
        method: get_enum(row, "method")?,
        timeout_seconds: row.get("timeout_seconds")?,
        verbose: row.get("verbose")?,
        parent_id: row.get("parent_id")?,
        parallel: row.get("parallel")?,
        not_before: row.get("not_before")?,
        data: get_payload(row, "data")?,
        results: get_payload(row, "results")?,
        pid: row.get("pid")?,
        executed_at: row.get("executed_at")?,
        time_spent_ms: row.get("time_spent_ms")?,
        description: row.get("description")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: TaskId) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    let task = stmt.query_row(params![task_id], parse_task_row).optional()?;
    Ok(task)
}

fn require_task(conn: &Connection, task_id: TaskId) -> Result<Task> {
    get_task_internal(conn, task_id)?.ok_or_else(|| QueueError::task_not_found(task_id).into())
}

/// Reject a parent assignment whose ancestor chain reaches the task itself.
fn check_parent_chain(conn: &Connection, task_id: TaskId, parent_id: TaskId) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(current) = cursor {
        if current == task_id || !seen.insert(current) {
            return Err(QueueError::parent_cycle(task_id, parent_id).into());
        }
        cursor = conn
            .query_row(
                "SELECT parent_id FROM tasks WHERE id = ?1",
                params![current],
                |row| row.get::<_, Option<TaskId>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(())
}

impl Database {
    /// Validate and insert a new task, returning the stored record.
    pub fn insert_task(&self, draft: &TaskDraft) -> Result<Task> {
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let task = validate(draft, |parent_id| {
                get_task_internal(&tx, parent_id).map_err(QueueError::from)
            })?;

            tx.execute(
                "INSERT INTO tasks (
                    status, command, method, timeout_seconds, verbose, parent_id, parallel,
                    not_before, data, results, description, created_by, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    task.status.as_str(),
                    task.command,
                    task.method.as_str(),
                    task.timeout_seconds,
                    task.verbose,
                    task.parent_id,
                    task.parallel,
                    task.not_before,
                    task.data_json,
                    task.results_json,
                    task.description,
                    task.created_by,
                    now,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            let stored = require_task(&tx, id)?;

            tx.commit()?;
            Ok(stored)
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Replace every mutable field of an existing task.
    ///
    /// `id` and `created_at` are never rewritten; `pid` is cleared unless the
    /// task is `processing`.
    pub fn update_task(&self, task: &Task) -> Result<Task> {
        let now = now_ms();
        let draft = TaskDraft::from(task);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            require_task(&tx, task.id)?;

            let valid = validate(&draft, |parent_id| {
                get_task_internal(&tx, parent_id).map_err(QueueError::from)
            })?;
            if let Some(parent_id) = valid.parent_id {
                check_parent_chain(&tx, task.id, parent_id)?;
            }

            let pid = if valid.status == TaskStatus::Processing {
                task.pid
            } else {
                None
            };

            tx.execute(
                "UPDATE tasks SET
                    status = ?1, command = ?2, method = ?3, timeout_seconds = ?4, verbose = ?5,
                    parent_id = ?6, parallel = ?7, not_before = ?8, data = ?9, results = ?10,
                    pid = ?11, executed_at = ?12, time_spent_ms = ?13, description = ?14,
                    created_by = ?15, updated_at = ?16
                 WHERE id = ?17",
                params![
                    valid.status.as_str(),
                    valid.command,
                    valid.method.as_str(),
                    valid.timeout_seconds,
                    valid.verbose,
                    valid.parent_id,
                    valid.parallel,
                    valid.not_before,
                    valid.data_json,
                    valid.results_json,
                    pid,
                    task.executed_at,
                    task.time_spent_ms,
                    valid.description,
                    valid.created_by,
                    now,
                    task.id,
                ],
            )?;
            let stored = require_task(&tx, task.id)?;

            tx.commit()?;
            Ok(stored)
        })
    }

    /// Direct children of a task, oldest first.
    pub fn list_children(&self, parent_id: TaskId) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE parent_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let tasks = stmt
                .query_map(params![parent_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Tasks in any of the given statuses, oldest first. An empty slice
    /// lists every task.
    pub fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let sql = if statuses.is_empty() {
            "SELECT * FROM tasks ORDER BY created_at ASC, id ASC".to_string()
        } else {
            format!(
                "SELECT * FROM tasks WHERE status IN ({}) ORDER BY created_at ASC, id ASC",
                status_list_sql(statuses)
            )
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map([], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Atomically claim the oldest eligible task.
    ///
    /// A task is eligible when its status is in `eligible`, its `not_before`
    /// is unset or has passed, its id is at least `min_id`, and, for
    /// `waiting_parent` tasks, its parent has completed. The claimed task
    /// moves to `claim_as` with `pid` and a fresh `executed_at` stamp.
    ///
    /// The read and the transition run under one IMMEDIATE transaction, so
    /// the write lock is held from selection to update.
    pub fn claim_next(
        &self,
        eligible: &[TaskStatus],
        claim_as: TaskStatus,
        pid: i64,
        min_id: Option<TaskId>,
    ) -> Result<Option<Task>> {
        if eligible.is_empty() {
            return Ok(None);
        }
        let now = now_ms();
        let select_sql = format!(
            "SELECT t.id FROM tasks t
             LEFT JOIN tasks p ON p.id = t.parent_id
             WHERE t.status IN ({})
               AND (t.not_before IS NULL OR t.not_before <= ?1)
               AND t.id >= ?2
               AND (t.status <> 'waiting_parent' OR p.status = 'completed')
             ORDER BY t.created_at ASC, t.id ASC
             LIMIT 1",
            status_list_sql(eligible)
        );

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let candidate: Option<TaskId> = tx
                .query_row(&select_sql, params![now, min_id.unwrap_or(0)], |row| {
                    row.get(0)
                })
                .optional()?;

            let Some(task_id) = candidate else {
                return Ok(None);
            };

            // executed_at doubles as the claim token, so it must move forward
            // even when a task is re-claimed within the same millisecond.
            tx.execute(
                "UPDATE tasks SET
                    status = ?1, pid = ?2,
                    executed_at = MAX(?3, COALESCE(executed_at + 1, ?3)),
                    time_spent_ms = NULL, updated_at = ?3
                 WHERE id = ?4",
                params![claim_as.as_str(), pid, now, task_id],
            )?;
            let task = require_task(&tx, task_id)?;

            tx.commit()?;
            Ok(Some(task))
        })
    }

    /// Record the process id of a running claim. Returns false when the
    /// token is stale.
    pub fn set_pid(&self, token: CompletionToken, pid: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET pid = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'processing' AND executed_at = ?4",
                params![pid, now_ms(), token.task_id, token.claimed_at],
            )?;
            Ok(changed > 0)
        })
    }

    /// Write the outcome of a claim.
    ///
    /// Applies only while the task is still `processing` under the same
    /// claim; otherwise the outcome is discarded. On `completed`, direct
    /// children in `waiting_parent` move to `new`.
    pub fn finish_task(&self, token: CompletionToken, outcome: &TaskOutcome) -> Result<FinishResult> {
        if !matches!(
            outcome.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        ) {
            return Err(QueueError::invalid_state(format!(
                "a claim can only finish as completed, failed or timeout, not '{}'",
                outcome.status
            ))
            .into());
        }
        let results_json = encode_payload("results", &outcome.results)?;
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let changed = tx.execute(
                "UPDATE tasks SET
                    status = ?1, results = ?2, time_spent_ms = ?3, pid = NULL, updated_at = ?4
                 WHERE id = ?5 AND status = 'processing' AND executed_at = ?6",
                params![
                    outcome.status.as_str(),
                    results_json,
                    outcome.time_spent_ms,
                    now,
                    token.task_id,
                    token.claimed_at,
                ],
            )?;
            if changed == 0 {
                return Ok(FinishResult::Discarded);
            }

            let unblocked = if outcome.status == TaskStatus::Completed {
                tx.execute(
                    "UPDATE tasks SET status = 'new', updated_at = ?1
                     WHERE parent_id = ?2 AND status = 'waiting_parent'",
                    params![now, token.task_id],
                )?
            } else {
                0
            };
            let task = require_task(&tx, token.task_id)?;

            tx.commit()?;
            Ok(FinishResult::Applied { task, unblocked })
        })
    }

    /// Move claims that outlived their timeout plus `grace_seconds` to
    /// `timeout`. Tasks with `timeout_seconds == 0` are never reaped.
    /// Returns the ids that were reaped.
    pub fn reap_expired(&self, now: i64, grace_seconds: i64) -> Result<Vec<TaskId>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let ids: Vec<TaskId> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM tasks
                     WHERE status = 'processing' AND timeout_seconds > 0
                       AND executed_at IS NOT NULL
                       AND executed_at + (timeout_seconds + ?2) * 1000 < ?1
                     ORDER BY id",
                )?;
                stmt.query_map(params![now, grace_seconds], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            let results_json = encode_payload(
                "results",
                &Payload::map([("error", Payload::from("claim expired without a result"))]),
            )?;
            for id in &ids {
                tx.execute(
                    "UPDATE tasks SET
                        status = 'timeout', pid = NULL, results = ?1,
                        time_spent_ms = ?2 - executed_at, updated_at = ?2
                     WHERE id = ?3",
                    params![results_json, now, id],
                )?;
            }

            tx.commit()?;
            Ok(ids)
        })
    }
}

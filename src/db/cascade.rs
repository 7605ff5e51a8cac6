//! Status cascades over task subtrees.
//!
//! A cascade writes a status to a task and every descendant. The walk is
//! iterative over an explicit queue, so tree depth is bounded by memory
//! rather than the call stack, and a visited set stops it on any cycle a
//! manual edit might have introduced.

use super::tasks::get_task_internal;
use super::{Database, now_ms};
use crate::error::QueueError;
use crate::types::{TaskId, TaskStatus};
use anyhow::Result;
use rusqlite::{TransactionBehavior, params};
use std::collections::{HashSet, VecDeque};

impl Database {
    /// Set `status` on a task and all of its descendants.
    ///
    /// With `reset_results`, `results` and `time_spent_ms` are cleared too.
    /// `pid` is always cleared. Returns the number of tasks written.
    ///
    /// Cascading `new` holds back every non-parallel task whose parent has
    /// not completed: it is written as `waiting_parent` instead. Parents are
    /// written before their children, so a reset subtree waits on its root.
    ///
    /// `processing` cannot be cascaded; only a claim enters that state.
    pub fn set_status_cascade(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        reset_results: bool,
    ) -> Result<usize> {
        if status == TaskStatus::Processing {
            return Err(QueueError::invalid_state(
                "processing is entered only by claiming a task",
            )
            .into());
        }
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if get_task_internal(&tx, task_id)?.is_none() {
                return Err(QueueError::task_not_found(task_id).into());
            }

            let mut affected = 0usize;
            let mut pending = VecDeque::from([task_id]);
            let mut visited = HashSet::from([task_id]);

            {
                let mut write = tx.prepare(
                    "UPDATE tasks SET
                        status = ?1, pid = NULL,
                        results = CASE WHEN ?2 THEN 'null' ELSE results END,
                        time_spent_ms = CASE WHEN ?2 THEN NULL ELSE time_spent_ms END,
                        updated_at = ?3
                     WHERE id = ?4",
                )?;
                let mut children = tx.prepare("SELECT id FROM tasks WHERE parent_id = ?1")?;
                let mut gate = tx.prepare(
                    "SELECT t.parallel, p.status FROM tasks t
                     LEFT JOIN tasks p ON p.id = t.parent_id
                     WHERE t.id = ?1",
                )?;

                while let Some(current) = pending.pop_front() {
                    let target = if status == TaskStatus::New {
                        let (parallel, parent_status): (bool, Option<String>) = gate
                            .query_row(params![current], |row| Ok((row.get(0)?, row.get(1)?)))?;
                        match parent_status {
                            Some(parent) if !parallel && parent != TaskStatus::Completed.as_str() => {
                                TaskStatus::WaitingParent
                            }
                            _ => TaskStatus::New,
                        }
                    } else {
                        status
                    };
                    affected += write.execute(params![target.as_str(), reset_results, now, current])?;

                    let child_ids = children
                        .query_map(params![current], |row| row.get::<_, TaskId>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    for child in child_ids {
                        if visited.insert(child) {
                            pending.push_back(child);
                        }
                    }
                }
            }

            tx.commit()?;
            Ok(affected)
        })
    }
}

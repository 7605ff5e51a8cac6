//! Aggregation queries for statistics.

use super::Database;
use crate::types::TaskStatus;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// Queue-wide counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total: i64,
    /// Count per status name; every status is present, zero when empty.
    pub by_status: BTreeMap<String, i64>,
    /// Creation time of the oldest task still in `new`.
    pub oldest_new_created_at: Option<i64>,
}

impl QueueStats {
    pub fn count(&self, status: TaskStatus) -> i64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

impl Database {
    /// Get aggregate statistics by status.
    pub fn get_stats(&self) -> Result<QueueStats> {
        self.with_conn(|conn| {
            let mut by_status: BTreeMap<String, i64> = TaskStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect();

            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            let mut total = 0;
            for row in rows {
                let (status, count) = row?;
                total += count;
                by_status.insert(status, count);
            }

            let oldest_new_created_at: Option<i64> = conn.query_row(
                "SELECT MIN(created_at) FROM tasks WHERE status = 'new'",
                [],
                |row| row.get(0),
            )?;

            Ok(QueueStats {
                total,
                by_status,
                oldest_new_created_at,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskDraft;

    #[test]
    fn counts_every_status() {
        let db = Database::open_in_memory().unwrap();
        let empty = db.get_stats().unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.by_status.len(), TaskStatus::ALL.len());
        assert!(empty.oldest_new_created_at.is_none());

        for command in ["aa", "bb", "cc"] {
            db.insert_task(&TaskDraft {
                command: command.into(),
                timeout_seconds: 30,
                ..Default::default()
            })
            .unwrap();
        }
        db.set_status_cascade(1, TaskStatus::Failed, false).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(TaskStatus::New), 2);
        assert_eq!(stats.count(TaskStatus::Failed), 1);
        assert_eq!(stats.count(TaskStatus::Completed), 0);
        assert!(stats.oldest_new_created_at.is_some());
    }
}

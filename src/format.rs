//! Output formatting utilities for markdown and JSON.

use crate::db::stats::QueueStats;
use crate::payload::Payload;
use crate::types::{Task, TaskStatus};
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use std::collections::BTreeMap;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!(
                "Invalid format '{}'. Valid options: markdown, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render epoch milliseconds as RFC 3339, or the raw number if out of range.
pub fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

fn format_payload(payload: &Payload) -> String {
    payload
        .to_json_string()
        .unwrap_or_else(|_| "<unrepresentable>".to_string())
}

/// Format a single task as markdown.
pub fn format_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task {}: {}\n", task.id, task.command));
    md.push_str(&format!("- **status**: {}\n", task.status));
    md.push_str(&format!("- **method**: {}\n", task.method));
    if task.timeout_seconds == 0 {
        md.push_str("- **timeout**: unbounded\n");
    } else {
        md.push_str(&format!("- **timeout**: {}s\n", task.timeout_seconds));
    }

    if let Some(parent_id) = task.parent_id {
        let parallel = if task.parallel { " (parallel)" } else { "" };
        md.push_str(&format!("- **parent_id**: {}{}\n", parent_id, parallel));
    }

    if let Some(not_before) = task.not_before {
        md.push_str(&format!("- **not_before**: {}\n", format_timestamp(not_before)));
    }

    if let Some(pid) = task.pid {
        md.push_str(&format!("- **pid**: {}\n", pid));
    }

    if let Some(executed_at) = task.executed_at {
        md.push_str(&format!("- **executed_at**: {}\n", format_timestamp(executed_at)));
    }

    if let Some(spent) = task.time_spent_ms {
        md.push_str(&format!("- **time_spent**: {}ms\n", spent));
    }

    if let Some(ref actor) = task.created_by {
        md.push_str(&format!("- **created_by**: {}\n", actor));
    }
    md.push_str(&format!("- **created_at**: {}\n", format_timestamp(task.created_at)));

    if let Some(ref desc) = task.description {
        md.push_str("\n### Description\n");
        md.push_str(desc);
        md.push('\n');
    }

    if !task.data.is_null() {
        md.push_str("\n### Data\n");
        md.push_str(&format!("`{}`\n", format_payload(&task.data)));
    }

    if !task.results.is_null() {
        md.push_str("\n### Results\n");
        md.push_str(&format!("`{}`\n", format_payload(&task.results)));
    }

    md
}

/// Format a list of tasks as markdown, grouped by status.
pub fn format_tasks_markdown(tasks: &[Task]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Tasks ({})\n\n", tasks.len()));

    let mut by_status: BTreeMap<usize, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        let rank = TaskStatus::ALL
            .iter()
            .position(|s| *s == task.status)
            .unwrap_or(TaskStatus::ALL.len());
        by_status.entry(rank).or_default().push(task);
    }

    for group in by_status.values() {
        md.push_str(&format!("## {}\n\n", format_state_name(group[0].status.as_str())));
        for task in group {
            md.push_str(&format_task_short(task));
        }
        md.push('\n');
    }

    md
}

/// Format a state name for display (capitalize, replace underscores with spaces).
fn format_state_name(state: &str) -> String {
    state
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a task in short form for lists.
fn format_task_short(task: &Task) -> String {
    let parent = task
        .parent_id
        .map(|p| format!(" ^{}", p))
        .unwrap_or_default();

    let description = task
        .description
        .as_ref()
        .map(|d| format!(" - _{}_", d))
        .unwrap_or_default();

    format!(
        "- `{}` {} [{}]{}{}\n",
        task.id, task.command, task.method, parent, description,
    )
}

/// Format queue statistics as markdown.
pub fn format_stats_markdown(stats: &QueueStats) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Queue ({} tasks)\n\n", stats.total));
    for status in TaskStatus::ALL {
        md.push_str(&format!(
            "- **{}**: {}\n",
            status.as_str(),
            stats.count(status)
        ));
    }
    if let Some(oldest) = stats.oldest_new_created_at {
        md.push_str(&format!("\nOldest waiting task created {}\n", format_timestamp(oldest)));
    }

    md
}

/// Render a value as pretty JSON.
pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

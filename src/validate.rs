//! Task validation.
//!
//! `validate` checks a draft against the field rules and the cross-field
//! parent rules, and produces the normalized form the store persists. It
//! performs no writes; parent lookups go through the supplied closure.

use crate::error::{QueueError, QueueResult};
use crate::payload::Payload;
use crate::types::{
    MAX_TIMEOUT_SECONDS, Method, NotBefore, Task, TaskDraft, TaskId, TaskStatus, ValidatedTask,
};
use regex_lite::Regex;
use std::sync::OnceLock;

pub const COMMAND_MIN_LEN: usize = 2;
pub const COMMAND_MAX_LEN: usize = 32;
pub const DESCRIPTION_MIN_LEN: usize = 8;
pub const DESCRIPTION_MAX_LEN: usize = 2047;

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Letters, digits, underscore, dash and '/' separators; no leading
        // separator so commands always resolve inside the commands dir.
        Regex::new(r"^[A-Za-z0-9_\-][A-Za-z0-9_/\-]*$").expect("static regex")
    })
}

/// Validate a command identifier.
pub fn validate_command(command: &str) -> QueueResult<()> {
    if command.is_empty() {
        return Err(QueueError::missing_field("command"));
    }
    let len = command.chars().count();
    if !(COMMAND_MIN_LEN..=COMMAND_MAX_LEN).contains(&len) {
        return Err(QueueError::invalid_value(
            "command",
            format!(
                "command must be {}-{} characters, got {}",
                COMMAND_MIN_LEN, COMMAND_MAX_LEN, len
            ),
        ));
    }
    if !command_pattern().is_match(command) {
        return Err(QueueError::invalid_value(
            "command",
            "command may only contain letters, digits, '_', '-' and '/' separators",
        ));
    }
    Ok(())
}

pub fn validate_timeout(timeout_seconds: i64) -> QueueResult<()> {
    if !(0..=MAX_TIMEOUT_SECONDS).contains(&timeout_seconds) {
        return Err(QueueError::invalid_value(
            "timeout_seconds",
            format!(
                "timeout_seconds must be between 0 and {}, got {}",
                MAX_TIMEOUT_SECONDS, timeout_seconds
            ),
        ));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> QueueResult<()> {
    if let Some(desc) = description {
        let len = desc.chars().count();
        if !(DESCRIPTION_MIN_LEN..=DESCRIPTION_MAX_LEN).contains(&len) {
            return Err(QueueError::invalid_value(
                "description",
                format!(
                    "description must be {}-{} characters, got {}",
                    DESCRIPTION_MIN_LEN, DESCRIPTION_MAX_LEN, len
                ),
            ));
        }
    }
    Ok(())
}

/// Serialize a payload to the storage format, rejecting unsupported values.
pub fn encode_payload(field: &str, payload: &Payload) -> QueueResult<String> {
    if let Some(found) = payload.find_unsupported() {
        return Err(QueueError::unsupported_data(field, found));
    }
    payload
        .to_json_string()
        .map_err(|e| QueueError::unsupported_data(field, e.to_string()))
}

/// Normalize a `not_before` input to epoch milliseconds.
pub fn normalize_not_before(not_before: &NotBefore) -> QueueResult<i64> {
    match not_before {
        NotBefore::EpochMs(ms) if *ms >= 0 => Ok(*ms),
        NotBefore::EpochMs(ms) => Err(QueueError::invalid_value(
            "not_before",
            format!("not_before must not be negative, got {}", ms),
        )),
        NotBefore::Rfc3339(text) => chrono::DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| {
                QueueError::invalid_value("not_before", format!("invalid timestamp '{}'", text))
                    .with_details(e.to_string())
            }),
    }
}

/// Validate a draft and normalize it for storage.
///
/// `find_task` resolves the parent when `parent_id` is set.
pub fn validate<F>(draft: &TaskDraft, find_task: F) -> QueueResult<ValidatedTask>
where
    F: FnOnce(TaskId) -> QueueResult<Option<Task>>,
{
    validate_command(&draft.command)?;
    validate_timeout(draft.timeout_seconds)?;
    validate_description(draft.description.as_deref())?;

    if draft.parallel && draft.parent_id.is_none() {
        return Err(QueueError::invalid_value(
            "parallel",
            "parallel requires parent_id to be set",
        ));
    }

    if let Some(parent_id) = draft.parent_id {
        let parent = find_task(parent_id)?.ok_or_else(|| QueueError::parent_not_found(parent_id))?;
        if draft.parallel && parent.method != Method::Background {
            return Err(QueueError::invalid_value(
                "parallel",
                format!(
                    "parallel requires the parent to use method 'background', parent {} uses '{}'",
                    parent.id, parent.method
                ),
            ));
        }
    }

    let data_json = encode_payload("data", &draft.data)?;
    let results_json = encode_payload("results", &draft.results)?;
    let not_before = draft
        .not_before
        .as_ref()
        .map(normalize_not_before)
        .transpose()?;

    Ok(ValidatedTask {
        status: draft.status.unwrap_or(TaskStatus::New),
        command: draft.command.clone(),
        method: draft.method,
        timeout_seconds: draft.timeout_seconds,
        verbose: draft.verbose,
        parent_id: draft.parent_id,
        parallel: draft.parallel,
        not_before,
        data_json,
        results_json,
        description: draft.description.clone(),
        created_by: draft.created_by.clone(),
    })
}

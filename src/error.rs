//! Structured error types for queue operations.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,
    UnsupportedDataType,
    InvalidState,
    ParentCycle,

    // Not found errors
    TaskNotFound,
    ParentNotFound,

    // Execution errors
    ExecutionFailed,
    ExecutionTimeout,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// The four error families callers branch on, plus internal faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Execution,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFieldValue
            | ErrorCode::UnsupportedDataType
            | ErrorCode::InvalidState
            | ErrorCode::ParentCycle => ErrorKind::Validation,
            ErrorCode::TaskNotFound | ErrorCode::ParentNotFound => ErrorKind::NotFound,
            ErrorCode::ExecutionFailed => ErrorKind::Execution,
            ErrorCode::ExecutionTimeout => ErrorKind::Timeout,
            ErrorCode::DatabaseError | ErrorCode::InternalError => ErrorKind::Internal,
        }
    }
}

/// Structured error returned by the queue API.
#[derive(Debug, Serialize, thiserror::Error)]
pub struct QueueError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl QueueError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn unsupported_data(field: &str, details: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedDataType, "unsupported data type")
            .with_field(field)
            .with_details(details)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn parent_cycle(task_id: i64, parent_id: i64) -> Self {
        Self::new(
            ErrorCode::ParentCycle,
            format!(
                "Setting parent of task {} to {} would create a cycle",
                task_id, parent_id
            ),
        )
        .with_field("parent_id")
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn parent_not_found(parent_id: i64) -> Self {
        Self::new(ErrorCode::ParentNotFound, "parent task does not exist")
            .with_field("parent_id")
            .with_details(format!("parent_id = {}", parent_id))
    }

    pub fn execution(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ExecutionFailed, err.to_string())
    }

    pub fn timeout(seconds: i64) -> Self {
        Self::new(
            ErrorCode::ExecutionTimeout,
            format!("timed out after {} seconds", seconds),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<QueueError>() {
            Ok(queue_err) => queue_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(db_err) => QueueError::database(db_err),
                Err(err) => QueueError::internal(err),
            },
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::database(err)
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_kinds() {
        assert_eq!(QueueError::missing_field("command").kind(), ErrorKind::Validation);
        assert_eq!(QueueError::unsupported_data("data", "x").kind(), ErrorKind::Validation);
        assert_eq!(QueueError::task_not_found(7).kind(), ErrorKind::NotFound);
        assert_eq!(QueueError::parent_not_found(7).kind(), ErrorKind::NotFound);
        assert_eq!(QueueError::execution("boom").kind(), ErrorKind::Execution);
        assert_eq!(QueueError::timeout(5).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn anyhow_roundtrip_preserves_code() {
        let err: anyhow::Error = QueueError::task_not_found(42).into();
        let back = QueueError::from(err);
        assert_eq!(back.code, ErrorCode::TaskNotFound);
        assert_eq!(back.message, "Task not found: 42");
    }

    #[test]
    fn foreign_anyhow_error_is_internal() {
        let back = QueueError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(back.kind(), ErrorKind::Internal);
    }

    #[test]
    fn serializes_without_empty_fields() {
        let json = serde_json::to_value(QueueError::task_not_found(1)).unwrap();
        assert_eq!(json["code"], "TASK_NOT_FOUND");
        assert!(json.get("field").is_none());
    }
}

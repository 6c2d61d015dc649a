//! Error types for kiosk control.
//!
//! Every failure a control operation can surface is a variant of
//! [`ControlError`]. Callers can match on the variant, on its coarse
//! [`ErrorKind`], or forward the stable [`ControlError::code`] string.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Command not allowed: {command}")]
    CommandNotAllowed { command: String },

    #[error("Command arguments not allowed for {command}: {args:?}")]
    CommandArgsNotAllowed { command: String, args: Vec<String> },

    #[error("Command timed out after {timeout_ms}ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },

    /// The process ran but did not exit cleanly. `code` is `None` when it
    /// was terminated by a signal.
    #[error("Command {command} failed with code {}: {stderr}", display_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command execution error for {command}: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Invalid system state transition: cannot start {requested} while {current}")]
    InvalidStateTransition { requested: String, current: String },

    #[error("Failed to parse {what}: {detail}")]
    ParseError { what: String, detail: String },

    #[error("No suspend command available")]
    SuspendUnavailable,

    #[error("Root privileges required (effective uid {uid})")]
    RootRequired { uid: u32 },

    /// The task running an operation ended without reporting a result
    #[error("Operation {operation} interrupted: {reason}")]
    OperationInterrupted { operation: String, reason: String },

    #[error("Max retries reached after {attempts} attempts: {last}")]
    MaxRetriesReached {
        attempts: u32,
        last: Box<ControlError>,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

/// Coarse classification of a [`ControlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CommandNotAllowed,
    CommandArgsNotAllowed,
    CommandTimeout,
    CommandFailed,
    InvalidStateTransition,
    ParseError,
    SuspendUnavailable,
    RootRequired,
    OperationInterrupted,
    MaxRetriesReached,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::CommandNotAllowed { .. } => ErrorKind::CommandNotAllowed,
            ControlError::CommandArgsNotAllowed { .. } => ErrorKind::CommandArgsNotAllowed,
            ControlError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            ControlError::CommandFailed { .. } | ControlError::SpawnFailed { .. } => {
                ErrorKind::CommandFailed
            }
            ControlError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            ControlError::ParseError { .. } => ErrorKind::ParseError,
            ControlError::SuspendUnavailable => ErrorKind::SuspendUnavailable,
            ControlError::RootRequired { .. } => ErrorKind::RootRequired,
            ControlError::OperationInterrupted { .. } => ErrorKind::OperationInterrupted,
            ControlError::MaxRetriesReached { .. } => ErrorKind::MaxRetriesReached,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::CommandNotAllowed { .. } => "SYSTEM_COMMAND_NOT_ALLOWED",
            ControlError::CommandArgsNotAllowed { .. } => "SYSTEM_COMMAND_ARGS_NOT_ALLOWED",
            ControlError::CommandTimeout { .. } => "SYSTEM_COMMAND_TIMEOUT",
            ControlError::CommandFailed { .. } | ControlError::SpawnFailed { .. } => {
                "SYSTEM_COMMAND_FAILED"
            }
            ControlError::InvalidStateTransition { .. } => "SYSTEM_STATE_TRANSITION_INVALID",
            ControlError::ParseError { .. } => "SYSTEM_PARSE_ERROR",
            ControlError::SuspendUnavailable => "SYSTEM_SUSPEND_UNAVAILABLE",
            ControlError::RootRequired { .. } => "SYSTEM_ROOT_REQUIRED",
            ControlError::OperationInterrupted { .. } => "SYSTEM_OPERATION_INTERRUPTED",
            ControlError::MaxRetriesReached { .. } => "SYSTEM_MAX_RETRIES_REACHED",
        }
    }

    /// Whether a caller-side retry can ever succeed.
    ///
    /// Policy rejections and state errors are deterministic, so retrying
    /// them is never correct.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::CommandTimeout { .. }
                | ControlError::CommandFailed { .. }
                | ControlError::SpawnFailed { .. }
        )
    }
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_exit_failures_share_kind() {
        let spawn = ControlError::SpawnFailed {
            command: "df".to_string(),
            reason: "No such file or directory".to_string(),
        };
        let exit = ControlError::CommandFailed {
            command: "df".to_string(),
            code: Some(1),
            stderr: "boom".to_string(),
        };
        assert_eq!(spawn.kind(), ErrorKind::CommandFailed);
        assert_eq!(exit.kind(), ErrorKind::CommandFailed);
        assert_eq!(spawn.code(), exit.code());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ControlError::CommandTimeout {
            command: "top".to_string(),
            timeout_ms: 5000
        }
        .is_retryable());
        assert!(!ControlError::CommandNotAllowed {
            command: "rm".to_string()
        }
        .is_retryable());
        assert!(!ControlError::SuspendUnavailable.is_retryable());
        assert!(!ControlError::InvalidStateTransition {
            requested: "restart".to_string(),
            current: "shutting_down".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_signal_exit_display() {
        let err = ControlError::CommandFailed {
            command: "top".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_codes() {
        assert_eq!(ControlError::SuspendUnavailable.code(), "SYSTEM_SUSPEND_UNAVAILABLE");
        assert_eq!(
            ControlError::RootRequired { uid: 1000 }.code(),
            "SYSTEM_ROOT_REQUIRED"
        );
        let interrupted = ControlError::OperationInterrupted {
            operation: "sleep".to_string(),
            reason: "task panicked".to_string(),
        };
        assert_eq!(interrupted.code(), "SYSTEM_OPERATION_INTERRUPTED");
        assert!(!interrupted.is_retryable());
    }
}

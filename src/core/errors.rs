/*!
 * Error Types
 * Caller-contract violations surfaced by the locking engine, with
 * thiserror and miette support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to callers of the monitor subsystem.
///
/// Only caller contract violations reach this type. Transient races (CAS
/// failures, inflation in progress, deflation in progress) are retried
/// internally and never escape.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Thread does not hold the monitor: {0}")]
    #[diagnostic(
        code(objsync::illegal_monitor_state),
        help("wait/notify require the calling thread to own the object's lock.")
    )]
    IllegalMonitorState(String),

    #[error("Invalid wait timeout: {0} ms")]
    #[diagnostic(
        code(objsync::invalid_timeout),
        help("Timeout must be >= 0. Zero waits indefinitely.")
    )]
    InvalidTimeout(i64),

    #[error("Thread {0} is not attached to the runtime")]
    #[diagnostic(
        code(objsync::thread_not_attached),
        help("Attach the thread before performing monitor operations.")
    )]
    ThreadNotAttached(u32),

    #[error("Synchronization on a value-based object: {0}")]
    #[diagnostic(
        code(objsync::value_based),
        help("The object's class is identity-sensitive; locking it is a program bug.")
    )]
    ValueBasedLock(String),
}

/// Outcome of a wait operation once the lock has been re-acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    /// Woken by notify/notify_all
    Notified,
    /// Timed wait elapsed without notification
    TimedOut,
    /// The thread's interrupt flag was set while waiting
    Interrupted,
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = SyncError::InvalidTimeout(-5);
        let json = serde_json::to_string(&error).unwrap();
        let deserialized: SyncError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, deserialized);
    }

    #[test]
    fn test_error_display() {
        let error = SyncError::InvalidTimeout(-1);
        assert_eq!(error.to_string(), "Invalid wait timeout: -1 ms");
    }

    #[test]
    fn test_illegal_state_display() {
        let error = SyncError::IllegalMonitorState("notify without lock".into());
        assert!(error.to_string().contains("notify without lock"));
    }
}

//! Error types for the orchestrator core.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Resources | [`Error::ResourceExhausted`] |
//! | State machine | [`Error::StateViolation`], [`Error::NotFound`] |
//! | Engine | [`Error::EngineUnavailable`], [`Error::NavigationTimeout`], [`Error::Timeout`] |
//! | Downloads | [`Error::DownloadTransient`], [`Error::DownloadPermanent`] |
//! | External | [`Error::Io`], [`Error::ChannelClosed`] |
//!
//! Transient download errors are retried by the dispatcher up to the
//! configured attempt ceiling; permanent ones terminate the job immediately.
//! Use [`Error::is_transient`] to tell the two apart.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::{JobId, TaskId};
use crate::tabs::TabState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. Errors returned by
/// task commands never corrupt other tasks' state; they are reported to the
/// issuing caller and the task reverts to its pre-operation state.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A configured cap (contexts, pages, download queue) has been reached.
    #[error("Resource exhausted: {resource} (limit {limit})")]
    ResourceExhausted {
        /// Which resource hit its cap.
        resource: &'static str,
        /// The configured limit.
        limit: usize,
    },

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// An illegal state transition was attempted.
    ///
    /// The task's state is left unmutated.
    #[error("State violation: cannot {operation} in state {state} (task {task_id})")]
    StateViolation {
        /// Task the command targeted.
        task_id: TaskId,
        /// The attempted operation.
        operation: &'static str,
        /// The state the task was in.
        state: TabState,
    },

    /// Task does not exist (or has already been closed).
    #[error("Task not found: {task_id}")]
    NotFound {
        /// The missing task ID.
        task_id: TaskId,
    },

    /// Download job does not exist.
    #[error("Job not found: {job_id}")]
    JobNotFound {
        /// The missing job ID.
        job_id: JobId,
    },

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// The browser engine is not running or crashed mid-operation.
    ///
    /// An engine crash invalidates all live contexts and pages pool-wide;
    /// recovery requires an explicit restart command.
    #[error("Engine unavailable: {message}")]
    EngineUnavailable {
        /// Description of why the engine is unavailable.
        message: String,
    },

    /// Navigation did not complete within the configured timeout.
    #[error("Navigation timeout after {timeout_ms}ms: {url} (task {task_id})")]
    NavigationTimeout {
        /// Task that issued the navigation.
        task_id: TaskId,
        /// Target URL.
        url: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A non-navigation engine-facing operation timed out.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: &'static str,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Download Errors
    // ========================================================================
    /// Retryable download failure (connection timeout, 5xx, transient DNS).
    #[error("Transient download error: {message}")]
    DownloadTransient {
        /// Description of the failure.
        message: String,
    },

    /// Terminal download failure (404, malformed manifest, disk write).
    ///
    /// Terminal for that job only; unrelated jobs are unaffected.
    #[error("Permanent download error: {message}")]
    DownloadPermanent {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a resource exhausted error.
    #[inline]
    pub fn resource_exhausted(resource: &'static str, limit: usize) -> Self {
        Self::ResourceExhausted { resource, limit }
    }

    /// Creates a state violation error.
    #[inline]
    pub fn state_violation(task_id: TaskId, operation: &'static str, state: TabState) -> Self {
        Self::StateViolation {
            task_id,
            operation,
            state,
        }
    }

    /// Creates a task not found error.
    #[inline]
    pub fn not_found(task_id: TaskId) -> Self {
        Self::NotFound { task_id }
    }

    /// Creates a job not found error.
    #[inline]
    pub fn job_not_found(job_id: JobId) -> Self {
        Self::JobNotFound { job_id }
    }

    /// Creates an engine unavailable error.
    #[inline]
    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            message: message.into(),
        }
    }

    /// Creates a navigation timeout error.
    #[inline]
    pub fn navigation_timeout(task_id: TaskId, url: impl Into<String>, timeout_ms: u64) -> Self {
        Self::NavigationTimeout {
            task_id,
            url: url.into(),
            timeout_ms,
        }
    }

    /// Creates an operation timeout error.
    #[inline]
    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            timeout_ms,
        }
    }

    /// Creates a transient download error.
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::DownloadTransient {
            message: message.into(),
        }
    }

    /// Creates a permanent download error.
    #[inline]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::DownloadPermanent {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this download error may succeed on retry.
    ///
    /// IO errors are not retryable: a failed disk write will fail again.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DownloadTransient { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NavigationTimeout { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if this is a state machine error.
    #[inline]
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::StateViolation { .. } | Self::NotFound { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::resource_exhausted("contexts", 10);
        assert_eq!(err.to_string(), "Resource exhausted: contexts (limit 10)");
    }

    #[test]
    fn test_state_violation_display() {
        let id = TaskId::next();
        let err = Error::state_violation(id, "navigate", TabState::Closed);
        let msg = err.to_string();
        assert!(msg.contains("navigate"));
        assert!(msg.contains("closed"));
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::transient("503").is_transient());
        assert!(Error::timeout("download attempt", 50).is_transient());
        assert!(!Error::permanent("404").is_transient());
        assert!(!Error::not_found(TaskId::next()).is_transient());
    }

    #[test]
    fn test_is_timeout() {
        let err = Error::navigation_timeout(TaskId::next(), "https://example.com", 30_000);
        assert!(err.is_timeout());
        assert!(!Error::transient("x").is_timeout());
    }

    #[test]
    fn test_is_state_error() {
        assert!(Error::not_found(TaskId::next()).is_state_error());
        assert!(!Error::engine_unavailable("down").is_state_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        // Disk failures terminate the job; they are never retried.
        assert!(!err.is_transient());
    }
}

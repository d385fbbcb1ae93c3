//! Typed command/event channel between the core and the GUI collaborator.
//!
//! The GUI (or any controller frontend) sends [`Command`]s and receives
//! [`Event`]s. Neither side knows anything about the other's rendering or
//! transport; events are plain serializable values, so the frontend can be
//! swapped without touching the core.
//!
//! # Ordering
//!
//! [`EventBus`] is a thin wrapper over a tokio broadcast channel: events from
//! a single emitter are observed by every subscriber in emission order.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::identifiers::{JobId, TaskId};
use crate::intercept::MediaRecord;
use crate::tabs::TabState;

// ============================================================================
// Constants
// ============================================================================

/// Default broadcast channel capacity.
///
/// Slow subscribers past this many buffered events will observe `Lagged`.
const DEFAULT_EVENT_CAPACITY: usize = 256;

// ============================================================================
// Event
// ============================================================================

/// Notification pushed from the core to the GUI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was created.
    TaskCreated {
        /// The new task.
        task_id: TaskId,
        /// Its target URL.
        url: String,
    },

    /// A task's dominant displayed state changed.
    TaskUpdated {
        /// The task.
        task_id: TaskId,
        /// Its new state.
        state: TabState,
    },

    /// Free-form log line for the GUI console.
    Log {
        /// Message text.
        message: String,
    },

    /// A new media resource was discovered.
    MediaDetected {
        /// The deduplicated record.
        record: MediaRecord,
    },

    /// A download job reported progress.
    DownloadProgress {
        /// The job.
        job_id: JobId,
        /// The owning task.
        task_id: TaskId,
        /// Fraction in `[0, 1]`, monotonically non-decreasing.
        progress: f64,
    },

    /// A download job completed.
    DownloadComplete {
        /// The job.
        job_id: JobId,
        /// The owning task.
        task_id: TaskId,
        /// Written destination path.
        destination: PathBuf,
        /// Bytes written.
        bytes: u64,
    },

    /// A download job failed permanently (emitted exactly once per job).
    DownloadFailed {
        /// The job.
        job_id: JobId,
        /// The owning task.
        task_id: TaskId,
        /// Failure description.
        error: String,
    },
}

// ============================================================================
// Command
// ============================================================================

/// Command issued by the GUI collaborator.
///
/// Commands are idempotent or explicit no-ops on invalid state; they never
/// surface uncaught faults to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create a new task for a URL.
    CreateTask {
        /// Target URL.
        url: String,
    },

    /// Close a task, releasing its page and context.
    CloseTask {
        /// The task to close.
        task_id: TaskId,
    },

    /// Attach or detach the task's browsing page.
    ToggleBrowse {
        /// The task.
        task_id: TaskId,
    },

    /// Navigate a task to a URL.
    Navigate {
        /// The task.
        task_id: TaskId,
        /// Target URL.
        url: String,
    },

    /// Start downloading a discovered (or raw) media URL.
    StartDownload {
        /// Owning task (records are scoped per task).
        task_id: TaskId,
        /// The media URL.
        url: String,
    },
}

// ============================================================================
// EventBus
// ============================================================================

/// Ordered pub/sub channel carrying [`Event`]s to subscribers.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a bus with a custom buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an event to all subscribers.
    ///
    /// Events published with no live subscribers are dropped silently;
    /// the core never blocks on a missing GUI.
    pub fn emit(&self, event: Event) {
        trace!(?event, "event emitted");
        let _ = self.sender.send(event);
    }

    /// Publishes a log line.
    pub fn log(&self, message: impl Into<String>) {
        self.emit(Event::Log {
            message: message.into(),
        });
    }

    /// Returns the number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! The task record: one logical job/session unit.
//!
//! A task owns exactly one context for its whole life and at most one page
//! at a time. The page, when present, carries an attached interceptor pump;
//! both are torn down together.

// ============================================================================
// Imports
// ============================================================================

use std::time::Instant;

use crate::engine::{ContextHandle, PageHandle};
use crate::identifiers::{PageId, TaskId};
use crate::intercept::InterceptorHandle;

use super::state::{TabFlags, TabState};

// ============================================================================
// AttachedPage
// ============================================================================

/// A live page together with its interceptor pump.
#[derive(Debug)]
pub(crate) struct AttachedPage {
    /// The leased page.
    pub(crate) page: PageHandle,

    /// Response pump feeding media detection.
    pub(crate) interceptor: InterceptorHandle,
}

// ============================================================================
// Task
// ============================================================================

/// One tab: a context-owning session with optional page and flags.
///
/// Mutated only through [`TabManager`](super::TabManager) commands, which
/// serialize per task ID.
#[derive(Debug)]
pub(crate) struct Task {
    /// Task identity.
    pub(crate) id: TaskId,

    /// Current target URL.
    pub(crate) url: String,

    /// The owned cookie/storage scope.
    pub(crate) context: ContextHandle,

    /// The page plus interceptor, while one is attached.
    pub(crate) page: Option<AttachedPage>,

    /// State machine flags.
    pub(crate) flags: TabFlags,

    /// Creation timestamp.
    pub(crate) created_at: Instant,

    /// Last command timestamp.
    pub(crate) last_active: Instant,
}

impl Task {
    /// Creates a fresh idle task owning a context.
    pub(crate) fn new(id: TaskId, url: String, context: ContextHandle) -> Self {
        let now = Instant::now();
        Self {
            id,
            url,
            context,
            page: None,
            flags: TabFlags::default(),
            created_at: now,
            last_active: now,
        }
    }

    /// Returns the dominant displayed state.
    #[inline]
    pub(crate) fn state(&self) -> TabState {
        self.flags.dominant()
    }

    /// Marks the task as just used.
    #[inline]
    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Builds an immutable snapshot for callers.
    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            url: self.url.clone(),
            state: self.state(),
            page: self.page.as_ref().map(|attached| attached.page.id()),
            created_at: self.created_at,
            last_active: self.last_active,
        }
    }
}

// ============================================================================
// TaskSnapshot
// ============================================================================

/// Point-in-time view of a task, detached from its locks.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    /// Task identity.
    pub id: TaskId,

    /// Current target URL.
    pub url: String,

    /// Dominant displayed state at snapshot time.
    pub state: TabState,

    /// Attached page, if any.
    pub page: Option<PageId>,

    /// Creation timestamp.
    pub created_at: Instant,

    /// Last command timestamp.
    pub last_active: Instant,
}

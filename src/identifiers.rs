//! Type-safe identifiers for orchestrator entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time:
//! a [`ContextId`] can never be passed where a [`PageId`] is expected.
//!
//! Two families exist:
//!
//! - **Engine-leased IDs** ([`ContextId`], [`PageId`]): monotonically
//!   increasing counters, allocated once per lease, never reused.
//! - **Entity IDs** ([`TaskId`], [`JobId`]): random UUIDs, safe to hand to
//!   external collaborators (GUI, logs) without leaking allocation order.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// TaskId
// ============================================================================

/// Unique identifier for a task (a "tab").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random task ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, enough to tell tasks apart in logs.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

// ============================================================================
// JobId
// ============================================================================

/// Unique identifier for a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random job ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

// ============================================================================
// ContextId
// ============================================================================

/// Identifier for an isolated cookie/storage scope leased from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Allocates the next context ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a context ID from a raw value.
    #[inline]
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

// ============================================================================
// PageId
// ============================================================================

/// Identifier for an ephemeral renderable page leased from a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(u64);

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

impl PageId {
    /// Allocates the next page ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a page ID from a raw value.
    #[inline]
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_context_ids_monotonic() {
        let a = ContextId::next();
        let b = ContextId::next();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_page_id_display() {
        let id = PageId::from_u64(42);
        assert_eq!(id.to_string(), "page-42");
    }

    #[test]
    fn test_task_id_display_short() {
        let id = TaskId::next();
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = ContextId::from_u64(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: ContextId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

//! Per-task state machine.
//!
//! A task's browsing surface and its downloads are independent facts: a task
//! can hold background jobs while its page is attached, and downloads never
//! require a page at all. State is therefore tracked as independent flags
//! ([`TabFlags`]) and [`TabState`] is the *dominant displayed state* computed
//! from them, with a fixed priority:
//!
//! `Closed` > `Browsing` > `Downloading` > `Active` > `Idle`

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// TabState
// ============================================================================

/// Dominant displayed state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabState {
    /// Context held, no page, no active work.
    Idle,

    /// Background work or navigation has engaged the task; no visible page.
    Active,

    /// Page attached and surfaced; user/automation may interact.
    Browsing,

    /// One or more download jobs in flight for this task.
    Downloading,

    /// Terminal. The context has been released.
    Closed,
}

impl fmt::Display for TabState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Browsing => "browsing",
            Self::Downloading => "downloading",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// TabFlags
// ============================================================================

/// Independent facts the displayed state is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabFlags {
    /// The task's page is attached and surfaced to the user.
    pub visible: bool,

    /// Background work (navigation) has engaged the task since creation.
    pub engaged: bool,

    /// Number of download jobs currently in flight for this task.
    pub active_jobs: usize,
}

impl TabFlags {
    /// Computes the dominant displayed state.
    #[must_use]
    pub fn dominant(&self) -> TabState {
        if self.visible {
            TabState::Browsing
        } else if self.active_jobs > 0 {
            TabState::Downloading
        } else if self.engaged {
            TabState::Active
        } else {
            TabState::Idle
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_task_is_idle() {
        assert_eq!(TabFlags::default().dominant(), TabState::Idle);
    }

    #[test]
    fn test_navigation_engages() {
        let flags = TabFlags {
            engaged: true,
            ..Default::default()
        };
        assert_eq!(flags.dominant(), TabState::Active);
    }

    #[test]
    fn test_browsing_dominates_downloads() {
        let flags = TabFlags {
            visible: true,
            engaged: true,
            active_jobs: 2,
        };
        assert_eq!(flags.dominant(), TabState::Browsing);
    }

    #[test]
    fn test_downloads_dominate_active() {
        let flags = TabFlags {
            visible: false,
            engaged: true,
            active_jobs: 1,
        };
        assert_eq!(flags.dominant(), TabState::Downloading);
    }

    #[test]
    fn test_last_job_returns_to_pre_download_state() {
        let mut flags = TabFlags {
            engaged: true,
            active_jobs: 1,
            ..Default::default()
        };
        assert_eq!(flags.dominant(), TabState::Downloading);
        flags.active_jobs = 0;
        assert_eq!(flags.dominant(), TabState::Active);
    }

    #[test]
    fn test_detach_returns_to_prior_state() {
        // Scenario: Active task toggles browse on, then off.
        let mut flags = TabFlags {
            engaged: true,
            ..Default::default()
        };
        assert_eq!(flags.dominant(), TabState::Active);
        flags.visible = true;
        assert_eq!(flags.dominant(), TabState::Browsing);
        flags.visible = false;
        assert_eq!(flags.dominant(), TabState::Active);
    }

    #[test]
    fn test_display_lowercase() {
        assert_eq!(TabState::Browsing.to_string(), "browsing");
        assert_eq!(TabState::Closed.to_string(), "closed");
    }
}

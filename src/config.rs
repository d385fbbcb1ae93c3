//! Orchestrator configuration.
//!
//! Provides a type-safe builder for caps, timeouts, and download policy.
//!
//! # Example
//!
//! ```ignore
//! use rawser_core::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::new()
//!     .with_max_contexts(16)
//!     .with_max_concurrent_downloads(4)
//!     .with_download_dir("/tmp/media");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default cap on live contexts (and therefore open tasks).
pub const DEFAULT_MAX_CONTEXTS: usize = 10;

/// Default timeout for page navigation.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for page acquisition from the engine.
pub const DEFAULT_PAGE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on queued + running download jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default cap on concurrently running download jobs.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Default retry ceiling for transient download failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential retry backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Default overall timeout for a single fetch attempt.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3600);

// ============================================================================
// OrchestratorConfig
// ============================================================================

/// Top-level configuration for the orchestrator core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum live contexts (one per open task).
    pub max_contexts: usize,

    /// Timeout applied to `navigate` calls.
    pub navigation_timeout: Duration,

    /// Timeout applied to page acquisition.
    pub page_acquire_timeout: Duration,

    /// Download pipeline settings.
    pub download: DownloadConfig,
}

/// Settings for the download dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Bound on queued + running jobs; enqueue past this fails.
    pub queue_capacity: usize,

    /// Cap on concurrently running jobs.
    pub max_concurrent: usize,

    /// Retry ceiling for transient failures (total attempts, not retries).
    pub max_attempts: u32,

    /// Base delay for exponential backoff; doubles each retry.
    pub backoff_base: Duration,

    /// Overall timeout for a single fetch attempt.
    pub fetch_timeout: Duration,

    /// Directory destination files are written to.
    pub download_dir: PathBuf,
}

// ============================================================================
// Constructors
// ============================================================================

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_contexts: DEFAULT_MAX_CONTEXTS,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            page_acquire_timeout: DEFAULT_PAGE_ACQUIRE_TIMEOUT,
            download: DownloadConfig::new(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadConfig {
    /// Creates download settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            download_dir: PathBuf::from("./downloads"),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl OrchestratorConfig {
    /// Sets the live context cap.
    #[inline]
    #[must_use]
    pub fn with_max_contexts(mut self, max: usize) -> Self {
        self.max_contexts = max;
        self
    }

    /// Sets the navigation timeout.
    #[inline]
    #[must_use]
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Sets the page acquisition timeout.
    #[inline]
    #[must_use]
    pub fn with_page_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.page_acquire_timeout = timeout;
        self
    }

    /// Sets the download queue capacity.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.download.queue_capacity = capacity;
        self
    }

    /// Sets the concurrent download cap.
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.download.max_concurrent = max;
        self
    }

    /// Sets the retry attempt ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.download.max_attempts = attempts;
        self
    }

    /// Sets the backoff base delay.
    #[inline]
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.download.backoff_base = base;
        self
    }

    /// Sets the destination directory for downloads.
    #[inline]
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download.download_dir = dir.into();
        self
    }
}

impl DownloadConfig {
    /// Sets the queue capacity.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the concurrent job cap.
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the retry attempt ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff base delay.
    #[inline]
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Sets the per-attempt fetch timeout.
    #[inline]
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the destination directory.
    #[inline]
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

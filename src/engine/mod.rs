//! Browser engine collaborator boundary.
//!
//! The engine (a Chromium-driving automation protocol, a WebEngine embed, or
//! a test stub) is treated as a black box behind the [`Engine`] trait: the
//! core only starts/stops it, leases contexts and pages, navigates, and
//! subscribes to per-page response streams.
//!
//! [`EngineHandle`] wraps the single process-wide engine instance with an
//! explicit init/shutdown contract. Startup is guarded by a one-time barrier
//! so concurrent first-use from multiple tasks cannot race-start the engine
//! twice, and a crashed engine stays down until an explicit restart.

// ============================================================================
// Modules
// ============================================================================

pub mod pool;

#[cfg(test)]
pub(crate) mod stub;

pub use pool::{ContextHandle, PageHandle, ResourcePool};

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, PageId};

// ============================================================================
// EngineResponse
// ============================================================================

/// One network response observed by the engine on a page.
///
/// This is the raw material the interceptor classifies into media records.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    /// Response URL.
    pub url: String,

    /// HTTP status code.
    pub status: u16,

    /// `Content-Type` header, if present.
    pub content_type: Option<String>,

    /// Request headers as sent by the page (for authenticated replay).
    pub request_headers: HashMap<String, String>,

    /// URL of the page that initiated the request.
    pub referrer: Option<String>,
}

// ============================================================================
// Engine Trait
// ============================================================================

/// Black-box browser engine interface.
///
/// Implementations own page rendering, JS execution, the DOM, and cookie jar
/// internals; this core never inspects anything beyond these calls.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Starts the engine process.
    async fn start(&self) -> Result<()>;

    /// Stops the engine process.
    async fn stop(&self) -> Result<()>;

    /// Creates an isolated cookie/storage scope.
    async fn create_context(&self) -> Result<ContextId>;

    /// Destroys a context and its storage.
    async fn destroy_context(&self, context: ContextId) -> Result<()>;

    /// Creates a renderable page inside a context.
    ///
    /// This is the only lease operation that may take noticeable time.
    async fn create_page(&self, context: ContextId) -> Result<PageId>;

    /// Closes a page.
    async fn close_page(&self, page: PageId) -> Result<()>;

    /// Navigates a page to a URL, resolving when the load settles.
    async fn navigate(&self, page: PageId, url: &str) -> Result<()>;

    /// Subscribes to the response stream of a page.
    ///
    /// The sender side is dropped when the page closes, ending the stream.
    fn subscribe_responses(&self, page: PageId) -> mpsc::UnboundedReceiver<EngineResponse>;
}

// ============================================================================
// EngineHandle
// ============================================================================

/// Lifecycle state of the shared engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// Not started yet (or cleanly stopped).
    Stopped,
    /// Started and serving leases.
    Running,
    /// Crashed mid-operation; stays down until explicit restart.
    Crashed,
}

/// The single shared engine instance with an explicit init/shutdown contract.
///
/// Injected as a dependency into [`ResourcePool`] rather than referenced
/// ambiently. All lease calls are guarded: once the engine is marked crashed,
/// every call fails with [`Error::EngineUnavailable`] until [`restart`]
/// is invoked.
///
/// [`restart`]: EngineHandle::restart
pub struct EngineHandle {
    /// The engine implementation.
    engine: Arc<dyn Engine>,

    /// Startup barrier and lifecycle state.
    state: Mutex<EngineState>,
}

impl EngineHandle {
    /// Wraps an engine implementation.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            state: Mutex::new(EngineState::Stopped),
        }
    }

    /// Starts the engine if it is not already running.
    ///
    /// Concurrent callers serialize on the internal barrier; exactly one of
    /// them performs the actual start.
    ///
    /// # Errors
    ///
    /// - [`Error::EngineUnavailable`] if the engine previously crashed
    /// - any error the engine start itself returns
    pub async fn ensure_started(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            EngineState::Running => Ok(()),
            EngineState::Crashed => Err(Error::engine_unavailable(
                "engine crashed; explicit restart required",
            )),
            EngineState::Stopped => {
                info!("starting browser engine");
                self.engine.start().await?;
                *state = EngineState::Running;
                Ok(())
            }
        }
    }

    /// Returns whether the engine is currently running.
    pub async fn is_running(&self) -> bool {
        *self.state.lock().await == EngineState::Running
    }

    /// Marks the engine as crashed.
    ///
    /// Subsequent calls fail with [`Error::EngineUnavailable`]; no silent
    /// auto-restart that could duplicate engine instances.
    pub async fn mark_crashed(&self) {
        warn!("engine marked as crashed");
        *self.state.lock().await = EngineState::Crashed;
    }

    /// Stops the engine cleanly.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == EngineState::Running {
            info!("stopping browser engine");
            self.engine.stop().await?;
        }
        *state = EngineState::Stopped;
        Ok(())
    }

    /// Restarts a crashed or stopped engine.
    pub async fn restart(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == EngineState::Running {
            self.engine.stop().await?;
        }
        info!("restarting browser engine");
        self.engine.start().await?;
        *state = EngineState::Running;
        Ok(())
    }
}

// ============================================================================
// EngineHandle - Guarded Pass-Throughs
// ============================================================================

impl EngineHandle {
    /// Fails with [`Error::EngineUnavailable`] unless the engine is running.
    async fn guard(&self) -> Result<()> {
        match *self.state.lock().await {
            EngineState::Running => Ok(()),
            EngineState::Stopped => Err(Error::engine_unavailable("engine not started")),
            EngineState::Crashed => Err(Error::engine_unavailable(
                "engine crashed; explicit restart required",
            )),
        }
    }

    /// Creates a context on the running engine.
    pub async fn create_context(&self) -> Result<ContextId> {
        self.guard().await?;
        self.engine.create_context().await
    }

    /// Destroys a context on the running engine.
    pub async fn destroy_context(&self, context: ContextId) -> Result<()> {
        self.guard().await?;
        self.engine.destroy_context(context).await
    }

    /// Creates a page on the running engine.
    pub async fn create_page(&self, context: ContextId) -> Result<PageId> {
        self.guard().await?;
        self.engine.create_page(context).await
    }

    /// Closes a page on the running engine.
    pub async fn close_page(&self, page: PageId) -> Result<()> {
        self.guard().await?;
        self.engine.close_page(page).await
    }

    /// Navigates a page on the running engine.
    pub async fn navigate(&self, page: PageId, url: &str) -> Result<()> {
        self.guard().await?;
        self.engine.navigate(page, url).await
    }

    /// Subscribes to a page's response stream.
    pub fn subscribe_responses(&self, page: PageId) -> mpsc::UnboundedReceiver<EngineResponse> {
        self.engine.subscribe_responses(page)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::stub::StubEngine;
    use super::*;

    #[tokio::test]
    async fn test_lazy_start_once() {
        let engine = Arc::new(StubEngine::new());
        let handle = Arc::new(EngineHandle::new(Arc::clone(&engine) as Arc<dyn Engine>));

        // Concurrent first-use must start the engine exactly once.
        let mut joins = Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&handle);
            joins.push(tokio::spawn(async move { h.ensure_started().await }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        assert_eq!(engine.start_count(), 1);
        assert!(handle.is_running().await);
    }

    #[tokio::test]
    async fn test_calls_fail_before_start() {
        let engine = Arc::new(StubEngine::new());
        let handle = EngineHandle::new(engine as Arc<dyn Engine>);

        let err = handle.create_context().await.unwrap_err();
        assert!(matches!(err, Error::EngineUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_crash_requires_explicit_restart() {
        let engine = Arc::new(StubEngine::new());
        let handle = EngineHandle::new(Arc::clone(&engine) as Arc<dyn Engine>);

        handle.ensure_started().await.unwrap();
        handle.mark_crashed().await;

        let err = handle.create_context().await.unwrap_err();
        assert!(matches!(err, Error::EngineUnavailable { .. }));
        let err = handle.ensure_started().await.unwrap_err();
        assert!(matches!(err, Error::EngineUnavailable { .. }));

        handle.restart().await.unwrap();
        assert!(handle.create_context().await.is_ok());
        assert_eq!(engine.start_count(), 2);
    }
}

//! Context/page leasing over the shared engine.
//!
//! The pool is the only component that talks to the engine about resource
//! lifetimes. It hands out [`ContextHandle`]s (isolated cookie/storage
//! scopes, one per task) and [`PageHandle`]s (ephemeral renderable surfaces,
//! at most one per task), and accounts for every live lease.
//!
//! # Cap enforcement
//!
//! Slot reservation happens under one lock *before* the engine call, so the
//! live context count can never exceed the configured cap, even transiently,
//! under concurrent bursts. A failed engine call releases the reservation.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ContextId, PageId};

use super::{Engine, EngineHandle};

// ============================================================================
// Handles
// ============================================================================

/// Exclusive lease on an isolated cookie/storage scope.
///
/// Owned by exactly one task for its lifetime; returned to the pool via
/// [`ResourcePool::release_context`]. Deliberately neither `Clone` nor
/// `Copy`: the lease moves with the task that holds it.
#[derive(Debug)]
pub struct ContextHandle {
    id: ContextId,
}

impl ContextHandle {
    /// Returns the leased context ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }
}

/// Lease on a live renderable page inside a context.
///
/// Exists only while its task is in a browsing-capable state; strictly
/// shorter-lived than the owning [`ContextHandle`].
#[derive(Debug)]
pub struct PageHandle {
    id: PageId,
    context: ContextId,
}

impl PageHandle {
    /// Returns the leased page ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Returns the context this page belongs to.
    #[inline]
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }
}

// ============================================================================
// Accounting
// ============================================================================

/// Live lease bookkeeping, mutated only under the pool lock.
#[derive(Default)]
struct Accounting {
    /// Live context leases.
    contexts: FxHashSet<ContextId>,

    /// Live page leases and their owning contexts.
    pages: FxHashMap<PageId, ContextId>,

    /// Context slots reserved but not yet confirmed by the engine.
    ///
    /// Counted against the cap so concurrent acquires cannot overshoot.
    reserved: usize,
}

// ============================================================================
// ResourcePool
// ============================================================================

/// Allocates and releases contexts and pages from the shared engine.
///
/// Engine startup is lazy: the first `acquire_context` triggers it behind
/// the [`EngineHandle`] one-time barrier. Shutdown drains every live lease
/// before tearing the engine down; in-flight acquires observe the poisoned
/// pool and fail with [`Error::EngineUnavailable`].
pub struct ResourcePool {
    /// The single shared engine.
    engine: EngineHandle,

    /// Cap on live contexts.
    max_contexts: usize,

    /// Timeout for page acquisition (the only lease call that may suspend).
    page_acquire_timeout: Duration,

    /// Live lease bookkeeping.
    accounting: Mutex<Accounting>,

    /// Set on shutdown or engine crash; all lease calls fail once set.
    invalidated: AtomicBool,
}

// ============================================================================
// ResourcePool - Constructor
// ============================================================================

impl ResourcePool {
    /// Creates a pool over an injected engine.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, config: &OrchestratorConfig) -> Self {
        Self {
            engine: EngineHandle::new(engine),
            max_contexts: config.max_contexts,
            page_acquire_timeout: config.page_acquire_timeout,
            accounting: Mutex::new(Accounting::default()),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Returns the shared engine handle.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

// ============================================================================
// ResourcePool - Accounting
// ============================================================================

impl ResourcePool {
    /// Number of live context leases.
    #[inline]
    #[must_use]
    pub fn live_contexts(&self) -> usize {
        self.accounting.lock().contexts.len()
    }

    /// Number of live page leases.
    #[inline]
    #[must_use]
    pub fn live_pages(&self) -> usize {
        self.accounting.lock().pages.len()
    }

    /// Configured context cap.
    #[inline]
    #[must_use]
    pub fn max_contexts(&self) -> usize {
        self.max_contexts
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(Error::engine_unavailable("resource pool invalidated"));
        }
        Ok(())
    }
}

// ============================================================================
// ResourcePool - Context Leasing
// ============================================================================

impl ResourcePool {
    /// Acquires an isolated context.
    ///
    /// Lazily starts the engine on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the context cap is reached
    /// - [`Error::EngineUnavailable`] if the pool is invalidated or the
    ///   engine cannot start
    pub async fn acquire_context(&self) -> Result<ContextHandle> {
        self.ensure_valid()?;

        // Reserve a slot before touching the engine so the cap holds even
        // while the engine call is in flight.
        {
            let mut accounting = self.accounting.lock();
            if accounting.contexts.len() + accounting.reserved >= self.max_contexts {
                return Err(Error::resource_exhausted("contexts", self.max_contexts));
            }
            accounting.reserved += 1;
        }

        let result = async {
            self.engine.ensure_started().await?;
            self.engine.create_context().await
        }
        .await;

        let id = {
            let mut accounting = self.accounting.lock();
            accounting.reserved -= 1;

            match result {
                Ok(id) if !self.invalidated.load(Ordering::SeqCst) => {
                    accounting.contexts.insert(id);
                    debug!(context = %id, live = accounting.contexts.len(), "context acquired");
                    return Ok(ContextHandle { id });
                }
                Ok(id) => Some(id),
                Err(e) => return Err(e),
            }
        };

        // Pool was torn down while the engine call was in flight; give the
        // orphaned context back before failing.
        if let Some(id) = id {
            let _ = self.engine.destroy_context(id).await;
        }
        Err(Error::engine_unavailable("resource pool invalidated"))
    }

    /// Releases a context lease back to the pool.
    ///
    /// Engine-side destruction failures are logged, not surfaced; the lease
    /// accounting is corrected either way.
    pub async fn release_context(&self, handle: ContextHandle) {
        let id = handle.id;
        let removed = self.accounting.lock().contexts.remove(&id);
        if !removed {
            warn!(context = %id, "released context was not accounted");
        }

        if !self.invalidated.load(Ordering::SeqCst) {
            if let Err(e) = self.engine.destroy_context(id).await {
                warn!(context = %id, error = %e, "context destruction failed");
            }
        }
        debug!(context = %id, "context released");
    }
}

// ============================================================================
// ResourcePool - Page Leasing
// ============================================================================

impl ResourcePool {
    /// Acquires a page inside a context.
    ///
    /// The only lease operation that may suspend waiting on the engine;
    /// bounded by the configured page acquisition timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the engine does not produce a page in time
    /// - [`Error::EngineUnavailable`] if the pool is invalidated
    pub async fn acquire_page(&self, context: &ContextHandle) -> Result<PageHandle> {
        self.ensure_valid()?;

        let id = match timeout(self.page_acquire_timeout, self.engine.create_page(context.id)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::timeout(
                    "acquire_page",
                    self.page_acquire_timeout.as_millis() as u64,
                ));
            }
        };

        if self.invalidated.load(Ordering::SeqCst) {
            let _ = self.engine.close_page(id).await;
            return Err(Error::engine_unavailable("resource pool invalidated"));
        }

        self.accounting.lock().pages.insert(id, context.id);
        debug!(page = %id, context = %context.id, "page acquired");
        Ok(PageHandle {
            id,
            context: context.id,
        })
    }

    /// Releases a page lease back to the pool.
    pub async fn release_page(&self, handle: PageHandle) {
        let id = handle.id;
        self.accounting.lock().pages.remove(&id);

        if !self.invalidated.load(Ordering::SeqCst) {
            if let Err(e) = self.engine.close_page(id).await {
                warn!(page = %id, error = %e, "page close failed");
            }
        }
        debug!(page = %id, "page released");
    }
}

// ============================================================================
// ResourcePool - Lifecycle
// ============================================================================

impl ResourcePool {
    /// Drains all live leases and stops the engine.
    ///
    /// In-flight acquires fail with [`Error::EngineUnavailable`].
    pub async fn shutdown(&self) {
        info!("resource pool shutting down");
        self.invalidated.store(true, Ordering::SeqCst);

        let (pages, contexts) = {
            let mut accounting = self.accounting.lock();
            (
                accounting.pages.drain().collect::<Vec<_>>(),
                accounting.contexts.drain().collect::<Vec<_>>(),
            )
        };

        for (page, _) in pages {
            if let Err(e) = self.engine.close_page(page).await {
                debug!(page = %page, error = %e, "page close during shutdown failed");
            }
        }
        for context in contexts {
            if let Err(e) = self.engine.destroy_context(context).await {
                debug!(context = %context, error = %e, "context destroy during shutdown failed");
            }
        }

        if let Err(e) = self.engine.stop().await {
            warn!(error = %e, "engine stop failed");
        }
        info!("resource pool shutdown complete");
    }

    /// Invalidates every live lease after an engine crash.
    ///
    /// All subsequent calls fail with [`Error::EngineUnavailable`] until
    /// [`restart`](ResourcePool::restart).
    pub async fn invalidate(&self) {
        warn!("resource pool invalidated (engine crash)");
        self.invalidated.store(true, Ordering::SeqCst);
        self.engine.mark_crashed().await;

        let mut accounting = self.accounting.lock();
        accounting.pages.clear();
        accounting.contexts.clear();
    }

    /// Restarts the engine after a crash or shutdown.
    pub async fn restart(&self) -> Result<()> {
        self.engine.restart().await?;
        {
            let mut accounting = self.accounting.lock();
            accounting.pages.clear();
            accounting.contexts.clear();
            accounting.reserved = 0;
        }
        self.invalidated.store(false, Ordering::SeqCst);
        info!("resource pool restarted");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

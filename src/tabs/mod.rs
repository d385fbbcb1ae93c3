//! Task registry and command surface.
//!
//! [`TabManager`] composes the resource pool and the per-task state machine.
//! Every mutating command on a task serializes on that task's own async
//! lock, so interleavings like concurrent `close` + `navigate` cannot
//! corrupt pool accounting; commands on distinct tasks run fully in
//! parallel, bounded only by the pool caps.
//!
//! Closed tasks leave a tombstone in the registry: lookups return
//! [`Error::NotFound`] while further commands fail with
//! [`Error::StateViolation`] instead of silently recreating state.

// ============================================================================
// Modules
// ============================================================================

pub mod state;
mod task;

pub use state::{TabFlags, TabState};
pub use task::TaskSnapshot;

pub(crate) use task::{AttachedPage, Task};

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::download::JobObserver;
use crate::engine::ResourcePool;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::identifiers::TaskId;
use crate::intercept::{Interceptor, MediaStore};

// ============================================================================
// TaskSlot
// ============================================================================

/// Registry entry serializing all commands for one task.
///
/// `None` marks a closed task (tombstone).
struct TaskSlot {
    task: Mutex<Option<Task>>,
}

// ============================================================================
// TabManager
// ============================================================================

/// Registry of tasks and the public command surface of the core.
pub struct TabManager {
    /// Context/page leasing.
    pool: Arc<ResourcePool>,

    /// Discovered media registry, fed by interceptors.
    store: Arc<MediaStore>,

    /// Event channel to the GUI collaborator.
    bus: EventBus,

    /// Timeouts.
    config: OrchestratorConfig,

    /// Task registry. Entries persist as tombstones after close.
    tasks: RwLock<FxHashMap<TaskId, Arc<TaskSlot>>>,
}

// ============================================================================
// TabManager - Constructor
// ============================================================================

impl TabManager {
    /// Creates a manager over a pool, media store, and event bus.
    #[must_use]
    pub fn new(
        pool: Arc<ResourcePool>,
        store: Arc<MediaStore>,
        bus: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            store,
            bus,
            config,
            tasks: RwLock::new(FxHashMap::default()),
        }
    }

    /// Returns the media store shared with interceptors.
    #[inline]
    #[must_use]
    pub fn media_store(&self) -> Arc<MediaStore> {
        Arc::clone(&self.store)
    }

    fn slot(&self, id: TaskId) -> Result<Arc<TaskSlot>> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }
}

// ============================================================================
// TabManager - Create / Close
// ============================================================================

impl TabManager {
    /// Creates a task for a URL, leasing its context.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the live-context cap is reached
    /// - [`Error::EngineUnavailable`] if the engine cannot serve the lease
    pub async fn create(&self, url: impl Into<String>) -> Result<TaskId> {
        let url = url.into();
        let context = self.pool.acquire_context().await?;

        let id = TaskId::next();
        let task = Task::new(id, url.clone(), context);
        let state = task.state();

        self.tasks.write().insert(
            id,
            Arc::new(TaskSlot {
                task: Mutex::new(Some(task)),
            }),
        );

        info!(task = %id, url = %url, "task created");
        self.bus.emit(Event::TaskCreated { task_id: id, url });
        self.bus.emit(Event::TaskUpdated { task_id: id, state });
        Ok(id)
    }

    /// Closes a task: page first, then context, then tombstone.
    ///
    /// Idempotent in effect; closing an already-closed or unknown id
    /// returns [`Error::NotFound`] without touching pool accounting.
    pub async fn close(&self, id: TaskId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut guard = slot.task.lock().await;
        let Some(task) = guard.take() else {
            return Err(Error::not_found(id));
        };

        if let Some(attached) = task.page {
            attached.interceptor.detach();
            self.pool.release_page(attached.page).await;
        }
        self.pool.release_context(task.context).await;
        self.store.remove_task(id);

        info!(task = %id, "task closed");
        self.bus.emit(Event::TaskUpdated {
            task_id: id,
            state: TabState::Closed,
        });
        Ok(())
    }

    /// Closes every open task.
    pub async fn close_all(&self) {
        let ids: Vec<TaskId> = self.tasks.read().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.close(id).await {
                debug!(task = %id, error = %e, "close during close_all skipped");
            }
        }
    }
}

// ============================================================================
// TabManager - Queries
// ============================================================================

impl TabManager {
    /// Returns a snapshot of a task.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown or closed tasks.
    pub async fn get(&self, id: TaskId) -> Result<TaskSnapshot> {
        let slot = self.slot(id)?;
        let guard = slot.task.lock().await;
        guard
            .as_ref()
            .map(Task::snapshot)
            .ok_or_else(|| Error::not_found(id))
    }

    /// Returns snapshots of all open tasks. No mutation.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let slots: Vec<Arc<TaskSlot>> = self.tasks.read().values().cloned().collect();
        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(task) = slot.task.lock().await.as_ref() {
                snapshots.push(task.snapshot());
            }
        }
        snapshots
    }

    /// Verifies that a task exists and is open.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for unknown ids
    /// - [`Error::StateViolation`] for closed tasks
    pub async fn ensure_open(&self, id: TaskId, operation: &'static str) -> Result<()> {
        let slot = self.slot(id)?;
        let guard = slot.task.lock().await;
        if guard.is_none() {
            return Err(Error::state_violation(id, operation, TabState::Closed));
        }
        Ok(())
    }
}

// ============================================================================
// TabManager - Navigation
// ============================================================================

impl TabManager {
    /// Navigates a task, acquiring a working page when none is attached.
    ///
    /// The navigation carries the configured timeout; on timeout or engine
    /// failure, partially acquired resources are released and the task
    /// reverts to its pre-operation state.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] / [`Error::StateViolation`] per registry state
    /// - [`Error::NavigationTimeout`] if the load does not settle in time
    pub async fn navigate(&self, id: TaskId, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        let slot = self.slot(id)?;
        let mut guard = slot.task.lock().await;
        let Some(task) = guard.as_mut() else {
            return Err(Error::state_violation(id, "navigate", TabState::Closed));
        };

        let newly_attached = if task.page.is_none() {
            let page = self.pool.acquire_page(&task.context).await?;
            let responses = self.pool.engine().subscribe_responses(page.id());
            let interceptor =
                Interceptor::attach(id, responses, Arc::clone(&self.store), self.bus.clone());
            task.page = Some(AttachedPage { page, interceptor });
            true
        } else {
            false
        };

        let Some(attached) = task.page.as_ref() else {
            return Err(Error::engine_unavailable("page lost during navigate"));
        };
        let page_id = attached.page.id();
        let previous_flags = task.flags;
        task.flags.engaged = true;

        let nav_timeout = self.config.navigation_timeout;
        let outcome = timeout(nav_timeout, self.pool.engine().navigate(page_id, &url)).await;

        match outcome {
            Ok(Ok(())) => {
                task.url = url;
                task.touch();
                let state = task.state();
                debug!(task = %id, state = %state, "navigation complete");
                self.bus.emit(Event::TaskUpdated { task_id: id, state });
                Ok(())
            }
            Ok(Err(e)) => {
                self.revert_navigation(task, previous_flags, newly_attached)
                    .await;
                Err(e)
            }
            Err(_) => {
                warn!(task = %id, url = %url, "navigation timed out");
                self.revert_navigation(task, previous_flags, newly_attached)
                    .await;
                Err(Error::navigation_timeout(
                    id,
                    url,
                    nav_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Restores a task's pre-navigation state after a failure.
    async fn revert_navigation(
        &self,
        task: &mut Task,
        previous_flags: TabFlags,
        release_page: bool,
    ) {
        task.flags = previous_flags;
        if release_page {
            if let Some(attached) = task.page.take() {
                attached.interceptor.detach();
                self.pool.release_page(attached.page).await;
            }
        }
    }
}

// ============================================================================
// TabManager - Browse Toggle
// ============================================================================

impl TabManager {
    /// Attaches or detaches the task's browsing surface.
    ///
    /// Attaching reuses a page left behind by background navigation or
    /// acquires a fresh one; detaching destroys the page while the context
    /// (cookies, storage) survives untouched. Returns the new dominant
    /// state.
    pub async fn toggle_browse(&self, id: TaskId) -> Result<TabState> {
        let slot = self.slot(id)?;
        let mut guard = slot.task.lock().await;
        let Some(task) = guard.as_mut() else {
            return Err(Error::state_violation(id, "toggle_browse", TabState::Closed));
        };

        if task.flags.visible {
            // Detach: destroy the page, return to the prior dominant state.
            if let Some(attached) = task.page.take() {
                attached.interceptor.detach();
                self.pool.release_page(attached.page).await;
            }
            task.flags.visible = false;
        } else {
            if task.page.is_none() {
                let page = self.pool.acquire_page(&task.context).await?;
                let responses = self.pool.engine().subscribe_responses(page.id());
                let interceptor =
                    Interceptor::attach(id, responses, Arc::clone(&self.store), self.bus.clone());
                task.page = Some(AttachedPage { page, interceptor });
            }
            task.flags.visible = true;
        }

        task.touch();
        let state = task.state();
        debug!(task = %id, state = %state, "browse toggled");
        self.bus.emit(Event::TaskUpdated { task_id: id, state });
        Ok(state)
    }
}

// ============================================================================
// TabManager - Job Accounting
// ============================================================================

#[async_trait]
impl JobObserver for TabManager {
    /// Counts a job against the task; tolerant of closed/unknown tasks.
    async fn job_started(&self, id: TaskId) {
        let Ok(slot) = self.slot(id) else { return };
        let mut guard = slot.task.lock().await;
        if let Some(task) = guard.as_mut() {
            task.flags.active_jobs += 1;
            let state = task.state();
            self.bus.emit(Event::TaskUpdated { task_id: id, state });
        }
    }

    /// Releases a job from the task; the last one restores the
    /// pre-download state.
    async fn job_finished(&self, id: TaskId) {
        let Ok(slot) = self.slot(id) else { return };
        let mut guard = slot.task.lock().await;
        if let Some(task) = guard.as_mut() {
            task.flags.active_jobs = task.flags.active_jobs.saturating_sub(1);
            let state = task.state();
            self.bus.emit(Event::TaskUpdated { task_id: id, state });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

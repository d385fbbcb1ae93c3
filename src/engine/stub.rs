//! In-process stub engine for tests.
//!
//! Leases are plain counters, navigation is instant (or artificially slow
//! when configured), and tests inject network responses directly with
//! [`StubEngine::push_response`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, PageId};

use super::{Engine, EngineResponse};

// ============================================================================
// StubEngine
// ============================================================================

/// Scriptable engine stub.
#[derive(Default)]
pub(crate) struct StubEngine {
    started: AtomicBool,
    start_count: AtomicUsize,
    fail_start: AtomicBool,
    navigate_delay: Mutex<Option<Duration>>,
    contexts: Mutex<FxHashSet<ContextId>>,
    pages: Mutex<FxHashMap<PageId, ContextId>>,
    response_senders: Mutex<FxHashMap<PageId, mpsc::UnboundedSender<EngineResponse>>>,
}

impl StubEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the next `start` call fail.
    pub(crate) fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Delays `navigate` calls, for timeout tests.
    pub(crate) fn set_navigate_delay(&self, delay: Duration) {
        *self.navigate_delay.lock() = Some(delay);
    }

    pub(crate) fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    pub(crate) fn live_contexts(&self) -> usize {
        self.contexts.lock().len()
    }

    pub(crate) fn live_pages(&self) -> usize {
        self.pages.lock().len()
    }

    /// Injects a response into a page's stream.
    ///
    /// Returns `false` if no subscriber is attached to the page.
    pub(crate) fn push_response(&self, page: PageId, response: EngineResponse) -> bool {
        let senders = self.response_senders.lock();
        match senders.get(&page) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Builds a minimal response for a URL.
    pub(crate) fn response(url: &str, content_type: Option<&str>) -> EngineResponse {
        EngineResponse {
            url: url.to_string(),
            status: 200,
            content_type: content_type.map(str::to_string),
            request_headers: HashMap::from([(
                "User-Agent".to_string(),
                "stub/1.0".to_string(),
            )]),
            referrer: Some("https://site.example/".to_string()),
        }
    }
}

// ============================================================================
// Engine Implementation
// ============================================================================

#[async_trait]
impl Engine for StubEngine {
    async fn start(&self) -> Result<()> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(Error::engine_unavailable("stub start failure"));
        }
        self.started.store(true, Ordering::SeqCst);
        self.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.contexts.lock().clear();
        self.pages.lock().clear();
        self.response_senders.lock().clear();
        Ok(())
    }

    async fn create_context(&self) -> Result<ContextId> {
        let id = ContextId::next();
        self.contexts.lock().insert(id);
        Ok(id)
    }

    async fn destroy_context(&self, context: ContextId) -> Result<()> {
        self.contexts.lock().remove(&context);
        Ok(())
    }

    async fn create_page(&self, context: ContextId) -> Result<PageId> {
        if !self.contexts.lock().contains(&context) {
            return Err(Error::engine_unavailable(format!(
                "unknown context {context}"
            )));
        }
        let id = PageId::next();
        self.pages.lock().insert(id, context);
        Ok(id)
    }

    async fn close_page(&self, page: PageId) -> Result<()> {
        self.pages.lock().remove(&page);
        // Dropping the sender ends the response stream.
        self.response_senders.lock().remove(&page);
        Ok(())
    }

    async fn navigate(&self, _page: PageId, _url: &str) -> Result<()> {
        let delay = *self.navigate_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn subscribe_responses(&self, page: PageId) -> mpsc::UnboundedReceiver<EngineResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.response_senders.lock().insert(page, tx);
        rx
    }
}

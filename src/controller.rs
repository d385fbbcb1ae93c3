//! Command-loop frontend glue.
//!
//! The [`Controller`] is the single entry point a GUI (or any frontend)
//! drives: it receives [`Command`]s, routes them to the tab manager and the
//! download dispatcher, and reports failures as [`Event::Log`] lines instead
//! of surfacing them to the sender. A misbehaving frontend can therefore
//! never crash the core, and the core never blocks on a missing frontend.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::download::DownloadDispatcher;
use crate::error::Result;
use crate::events::{Command, EventBus};
use crate::intercept::{MediaRecord, MediaStore, MediaType, classify};
use crate::tabs::TabManager;

// ============================================================================
// Controller
// ============================================================================

/// Routes frontend commands into the core.
pub struct Controller {
    manager: Arc<TabManager>,
    dispatcher: Arc<DownloadDispatcher>,
    store: Arc<MediaStore>,
    bus: EventBus,
}

impl Controller {
    /// Wires the manager and dispatcher together.
    ///
    /// The manager is registered as the dispatcher's job observer, so
    /// download activity is reflected in task states.
    #[must_use]
    pub fn new(
        manager: Arc<TabManager>,
        dispatcher: Arc<DownloadDispatcher>,
        bus: EventBus,
    ) -> Self {
        dispatcher.set_observer(manager.clone());
        let store = manager.media_store();
        Self {
            manager,
            dispatcher,
            store,
            bus,
        }
    }

    /// Returns the tab manager.
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &Arc<TabManager> {
        &self.manager
    }

    /// Returns the download dispatcher.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<DownloadDispatcher> {
        &self.dispatcher
    }
}

// ============================================================================
// Command Handling
// ============================================================================

impl Controller {
    /// Executes one command.
    ///
    /// Failures are reported on the event bus as log lines; this method
    /// never propagates them to the caller.
    pub async fn handle(&self, command: Command) {
        debug!(?command, "command received");
        if let Err(e) = self.dispatch(command).await {
            self.bus.log(format!("command failed: {e}"));
        }
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        match command {
            Command::CreateTask { url } => {
                self.manager.create(url).await?;
            }
            Command::CloseTask { task_id } => {
                // Cancel the task's downloads before tearing down the tab so
                // their queue slots free up immediately.
                self.dispatcher.cancel_task(task_id);
                self.manager.close(task_id).await?;
            }
            Command::ToggleBrowse { task_id } => {
                self.manager.toggle_browse(task_id).await?;
            }
            Command::Navigate { task_id, url } => {
                self.manager.navigate(task_id, url).await?;
            }
            Command::StartDownload { task_id, url } => {
                self.manager.ensure_open(task_id, "start_download").await?;
                // Prefer the intercepted record (it carries replay headers
                // and the referrer); fall back to a bare record for raw URLs
                // pasted by the user.
                let record = self.store.get(task_id, &url).unwrap_or_else(|| {
                    let media_type = classify(&url, None).unwrap_or(MediaType::Mp4);
                    MediaRecord::new(task_id, url, media_type)
                });
                self.dispatcher.enqueue(record).await?;
            }
        }
        Ok(())
    }

    /// Drains a command channel until every sender is dropped, then closes
    /// all tasks.
    pub async fn run(&self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        info!("command channel closed, shutting down tasks");
        self.manager.close_all().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::path::Path;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use crate::config::OrchestratorConfig;
    use crate::download::{Fetcher, JobStatus, ProgressFn, Transcoder};
    use crate::engine::stub::StubEngine;
    use crate::engine::{Engine, ResourcePool};
    use crate::error::Error;
    use crate::events::Event;
    use crate::identifiers::TaskId;
    use crate::tabs::TabState;

    struct InstantFetcher;

    #[async_trait]
    impl Fetcher for InstantFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
            _destination: &Path,
            progress: ProgressFn,
        ) -> crate::error::Result<u64> {
            progress(1.0);
            Ok(2048)
        }
    }

    #[async_trait]
    impl Transcoder for InstantFetcher {
        async fn transcode(
            &self,
            _manifest_url: &str,
            _headers: &HashMap<String, String>,
            _destination: &Path,
            progress: ProgressFn,
        ) -> crate::error::Result<u64> {
            progress(1.0);
            Ok(2048)
        }
    }

    /// Never finishes within a test's lifetime; jobs stay in flight.
    struct SlowFetcher;

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
            _destination: &Path,
            _progress: ProgressFn,
        ) -> crate::error::Result<u64> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0)
        }
    }

    fn init_tracing() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }

    fn fixture_with(fetcher: Arc<dyn Fetcher>) -> (Arc<StubEngine>, Controller, EventBus) {
        init_tracing();
        let config = OrchestratorConfig::new();
        let engine = Arc::new(StubEngine::new());
        let pool = Arc::new(ResourcePool::new(
            Arc::clone(&engine) as Arc<dyn Engine>,
            &config,
        ));
        let bus = EventBus::new();
        let manager = Arc::new(TabManager::new(
            pool,
            Arc::new(MediaStore::new()),
            bus.clone(),
            config.clone(),
        ));
        let download_dir = tempfile::tempdir().expect("tempdir").keep();
        let dispatcher = DownloadDispatcher::new(
            config.download.with_download_dir(download_dir),
            bus.clone(),
            fetcher,
            Arc::new(InstantFetcher),
        );
        let controller = Controller::new(manager, dispatcher, bus.clone());
        (engine, controller, bus)
    }

    fn fixture() -> (Arc<StubEngine>, Controller, EventBus) {
        fixture_with(Arc::new(InstantFetcher))
    }

    async fn wait_for_status(
        controller: &Controller,
        task_id: TaskId,
        url: &str,
        wanted: JobStatus,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let done = controller
                .dispatcher()
                .jobs()
                .into_iter()
                .any(|job| {
                    job.record.task_id == task_id
                        && job.record.url == url
                        && job.status == wanted
                });
            if done {
                return;
            }
            assert!(Instant::now() < deadline, "job never reached {wanted}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_full_session_create_detect_download_close() {
        let (engine, controller, bus) = fixture();
        let mut events = bus.subscribe();

        // Create and navigate in the background.
        controller
            .handle(Command::CreateTask {
                url: "https://site.example/watch".into(),
            })
            .await;
        let task_id = controller.manager().list().await[0].id;
        controller
            .handle(Command::Navigate {
                task_id,
                url: "https://site.example/watch".into(),
            })
            .await;
        let snapshot = controller.manager().get(task_id).await.unwrap();
        assert_eq!(snapshot.state, TabState::Active);

        // The page observes an MP4 response; the interceptor records it.
        let page = snapshot.page.unwrap();
        let response = StubEngine::response("https://cdn.example.com/ep1.mp4", None);
        assert!(engine.push_response(page, response));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline.into(), events.recv()).await {
                Ok(Ok(Event::MediaDetected { record })) => {
                    assert_eq!(record.task_id, task_id);
                    break;
                }
                Ok(Ok(_)) => {}
                other => panic!("media never detected: {other:?}"),
            }
        }

        // Download the detected record to completion.
        controller
            .handle(Command::StartDownload {
                task_id,
                url: "https://cdn.example.com/ep1.mp4".into(),
            })
            .await;
        wait_for_status(
            &controller,
            task_id,
            "https://cdn.example.com/ep1.mp4",
            JobStatus::Completed,
        )
        .await;

        // Close releases everything; the task is gone.
        controller.handle(Command::CloseTask { task_id }).await;
        assert!(matches!(
            controller.manager().get(task_id).await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(engine.live_pages(), 0);
        assert_eq!(engine.live_contexts(), 0);
    }

    #[tokio::test]
    async fn test_raw_url_download_synthesizes_record() {
        let (_engine, controller, _bus) = fixture();

        controller
            .handle(Command::CreateTask {
                url: "https://site.example".into(),
            })
            .await;
        let task_id = controller.manager().list().await[0].id;

        // No interception happened; the controller builds a bare record.
        controller
            .handle(Command::StartDownload {
                task_id,
                url: "https://cdn.example.com/direct.mp4".into(),
            })
            .await;
        wait_for_status(
            &controller,
            task_id,
            "https://cdn.example.com/direct.mp4",
            JobStatus::Completed,
        )
        .await;
    }

    #[tokio::test]
    async fn test_failed_command_logs_instead_of_panicking() {
        let (_engine, controller, bus) = fixture();
        let mut events = bus.subscribe();

        controller
            .handle(Command::Navigate {
                task_id: TaskId::next(),
                url: "https://nowhere.example".into(),
            })
            .await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, Event::Log { .. }));
    }

    #[tokio::test]
    async fn test_download_activity_reflected_in_task_state() {
        let (_engine, controller, _bus) = fixture_with(Arc::new(SlowFetcher));

        controller
            .handle(Command::CreateTask {
                url: "https://site.example".into(),
            })
            .await;
        let task_id = controller.manager().list().await[0].id;

        // The manager observes the job entering flight before enqueue returns.
        controller
            .handle(Command::StartDownload {
                task_id,
                url: "https://cdn.example.com/slow.mp4".into(),
            })
            .await;
        let snapshot = controller.manager().get(task_id).await.unwrap();
        assert_eq!(snapshot.state, TabState::Downloading);

        controller.handle(Command::CloseTask { task_id }).await;
    }

    #[tokio::test]
    async fn test_close_cancels_task_downloads() {
        let (_engine, controller, _bus) = fixture();

        controller
            .handle(Command::CreateTask {
                url: "https://site.example".into(),
            })
            .await;
        let task_id = controller.manager().list().await[0].id;

        controller
            .handle(Command::StartDownload {
                task_id,
                url: "https://cdn.example.com/long.mp4".into(),
            })
            .await;
        controller.handle(Command::CloseTask { task_id }).await;

        // Every job for the task settled; no slots remain occupied.
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.dispatcher().active_count() > 0 {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_run_drains_channel_and_closes_tasks() {
        let (engine, controller, _bus) = fixture();
        let (tx, rx) = mpsc::channel(8);

        tx.send(Command::CreateTask {
            url: "https://site.example/a".into(),
        })
        .await
        .unwrap();
        tx.send(Command::CreateTask {
            url: "https://site.example/b".into(),
        })
        .await
        .unwrap();
        drop(tx);

        controller.run(rx).await;
        assert_eq!(engine.live_contexts(), 0);
        assert!(controller.manager().list().await.is_empty());
    }
}

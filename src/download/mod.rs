//! Bounded, retryable download pipeline.
//!
//! The [`DownloadDispatcher`] turns media records into [`DownloadJob`]s and
//! runs them as independent concurrent units:
//!
//! - **Dedup**: a request for a URL already queued or running coalesces into
//!   the existing job instead of duplicating it.
//! - **Backpressure**: queued + running jobs are bounded by the configured
//!   queue capacity; running jobs by a global semaphore.
//! - **Routing**: MP4 and other direct resources go through the [`Fetcher`];
//!   HLS/DASH manifests through the [`Transcoder`].
//! - **Failure isolation**: transient errors retry with exponential backoff
//!   up to the attempt ceiling; permanent errors fail that job only, with
//!   exactly one `DownloadFailed` event.
//!
//! Downloads never require a page. Cancelling a task cancels its own jobs
//! and releases their queue slots immediately, leaving other tasks' jobs
//! untouched.

// ============================================================================
// Modules
// ============================================================================

pub mod fetch;

pub use fetch::{
    Fetcher, FfmpegTranscoder, HttpFetcher, ProgressFn, Transcoder, build_request_headers,
    noop_progress,
};

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::identifiers::{JobId, TaskId};
use crate::intercept::{MediaRecord, MediaType};

// ============================================================================
// Constants
// ============================================================================

/// Longest filename (stem + extension) derived from a URL.
const MAX_FILENAME_LEN: usize = 200;

/// Characters never allowed in a derived filename.
const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

// ============================================================================
// JobStatus
// ============================================================================

/// Lifecycle status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot (or in a retry backoff).
    Queued,

    /// Transfer in progress.
    Running,

    /// Held back by the user; resumes to Queued.
    Paused,

    /// Finished successfully.
    Completed,

    /// Failed permanently (or exhausted the retry ceiling).
    Failed,

    /// Cancelled by its owning task's close.
    Cancelled,
}

impl JobStatus {
    /// Returns `true` for states a job can never leave.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` while the job occupies a queue slot.
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Paused)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ============================================================================
// DownloadJob
// ============================================================================

/// One download: a media record bound to a destination and a status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Job identity.
    pub id: JobId,

    /// The media being downloaded.
    pub record: MediaRecord,

    /// Current status.
    pub status: JobStatus,

    /// Progress fraction in `[0, 1]`, monotonically non-decreasing.
    pub progress: f64,

    /// Destination file path.
    pub destination: PathBuf,

    /// Attempts made so far (first try included).
    pub attempts: u32,
}

// ============================================================================
// JobObserver
// ============================================================================

/// Callback seam notified when jobs enter and leave flight.
///
/// Implemented by the tab manager to flip tasks in and out of the
/// downloading state. Must tolerate unknown or closed tasks.
#[async_trait::async_trait]
pub trait JobObserver: Send + Sync + 'static {
    /// A job for this task entered the queue.
    async fn job_started(&self, task_id: TaskId);

    /// A job for this task reached a terminal state.
    async fn job_finished(&self, task_id: TaskId);
}

// ============================================================================
// Internal State
// ============================================================================

/// Registry entry for one job.
struct JobEntry {
    job: DownloadJob,

    /// Cancel signal; flipped once, observed at every await point.
    cancel: watch::Sender<bool>,

    /// Wakes a paused worker on resume.
    gate: Arc<Notify>,
}

#[derive(Default)]
struct DispatchState {
    /// All jobs ever accepted, including terminal ones.
    jobs: FxHashMap<JobId, JobEntry>,

    /// URL -> job for jobs currently occupying a queue slot.
    active_by_url: FxHashMap<String, JobId>,
}

// ============================================================================
// DownloadDispatcher
// ============================================================================

/// Queue of download jobs with dedup, caps, and retry policy.
pub struct DownloadDispatcher {
    config: DownloadConfig,
    bus: EventBus,
    fetcher: Arc<dyn Fetcher>,
    transcoder: Arc<dyn Transcoder>,
    observer: RwLock<Option<Arc<dyn JobObserver>>>,
    running: Arc<Semaphore>,
    state: Mutex<DispatchState>,
}

// ============================================================================
// DownloadDispatcher - Constructor
// ============================================================================

impl DownloadDispatcher {
    /// Creates a dispatcher over fetch/transcode collaborators.
    #[must_use]
    pub fn new(
        config: DownloadConfig,
        bus: EventBus,
        fetcher: Arc<dyn Fetcher>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Arc<Self> {
        let running = Arc::new(Semaphore::new(config.max_concurrent));
        Arc::new(Self {
            config,
            bus,
            fetcher,
            transcoder,
            observer: RwLock::new(None),
            running,
            state: Mutex::new(DispatchState::default()),
        })
    }

    /// Wires the job observer (the tab manager).
    pub fn set_observer(&self, observer: Arc<dyn JobObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn JobObserver>> {
        self.observer.read().clone()
    }
}

// ============================================================================
// DownloadDispatcher - Queries
// ============================================================================

impl DownloadDispatcher {
    /// Returns a snapshot of a job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<DownloadJob> {
        self.state.lock().jobs.get(&id).map(|entry| entry.job.clone())
    }

    /// Returns snapshots of all known jobs, terminal ones included.
    #[must_use]
    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.state
            .lock()
            .jobs
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Number of jobs currently occupying queue slots.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active_by_url.len()
    }
}

// ============================================================================
// DownloadDispatcher - Enqueue
// ============================================================================

impl DownloadDispatcher {
    /// Accepts a media record for download.
    ///
    /// A URL already queued or running coalesces into the existing job and
    /// returns its ID; completed or failed URLs start fresh.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] when the queue is at capacity.
    pub async fn enqueue(self: &Arc<Self>, record: MediaRecord) -> Result<JobId> {
        let task_id = record.task_id;
        let id = {
            let mut state = self.state.lock();

            if let Some(existing) = state.active_by_url.get(&record.url) {
                debug!(job = %existing, url = %record.url, "download request coalesced");
                return Ok(*existing);
            }

            if state.active_by_url.len() >= self.config.queue_capacity {
                return Err(Error::resource_exhausted(
                    "download queue",
                    self.config.queue_capacity,
                ));
            }

            let id = JobId::next();
            let destination = self
                .config
                .download_dir
                .join(derive_filename(&record.url, record.media_type));
            let (cancel, _) = watch::channel(false);

            state.active_by_url.insert(record.url.clone(), id);
            state.jobs.insert(
                id,
                JobEntry {
                    job: DownloadJob {
                        id,
                        record,
                        status: JobStatus::Queued,
                        progress: 0.0,
                        destination,
                        attempts: 0,
                    },
                    cancel,
                    gate: Arc::new(Notify::new()),
                },
            );
            id
        };

        if let Some(observer) = self.observer() {
            observer.job_started(task_id).await;
        }

        info!(job = %id, task = %task_id, "download queued");
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.run_job(id).await;
        });
        Ok(id)
    }
}

// ============================================================================
// DownloadDispatcher - Pause / Resume / Cancel
// ============================================================================

impl DownloadDispatcher {
    /// Pauses a queued job.
    ///
    /// Running jobs keep running. Returns whether the job is now paused.
    ///
    /// # Errors
    ///
    /// [`Error::JobNotFound`] for unknown jobs.
    pub fn pause(&self, id: JobId) -> Result<bool> {
        let mut state = self.state.lock();
        let entry = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::job_not_found(id))?;
        if entry.job.status == JobStatus::Queued {
            entry.job.status = JobStatus::Paused;
            debug!(job = %id, "download paused");
        }
        Ok(entry.job.status == JobStatus::Paused)
    }

    /// Resumes a paused job; a no-op for any other status.
    ///
    /// # Errors
    ///
    /// [`Error::JobNotFound`] for unknown jobs.
    pub fn resume(&self, id: JobId) -> Result<()> {
        let gate = {
            let mut state = self.state.lock();
            let entry = state
                .jobs
                .get_mut(&id)
                .ok_or_else(|| Error::job_not_found(id))?;
            if entry.job.status != JobStatus::Paused {
                return Ok(());
            }
            entry.job.status = JobStatus::Queued;
            Arc::clone(&entry.gate)
        };
        debug!(job = %id, "download resumed");
        gate.notify_waiters();
        Ok(())
    }

    /// Cancels every in-flight job owned by a task.
    ///
    /// Queue slots are released immediately; other tasks' jobs are never
    /// affected. Cancelled jobs emit no `DownloadFailed`.
    pub fn cancel_task(&self, task_id: TaskId) {
        let mut state = self.state.lock();
        let DispatchState {
            jobs,
            active_by_url,
        } = &mut *state;

        let mut cancelled = 0usize;
        for entry in jobs.values_mut() {
            if entry.job.record.task_id == task_id && entry.job.status.is_in_flight() {
                entry.job.status = JobStatus::Cancelled;
                let _ = entry.cancel.send(true);
                entry.gate.notify_waiters();
                cancelled += 1;
            }
        }
        active_by_url.retain(|_, id| {
            jobs.get(id)
                .is_some_and(|entry| entry.job.status.is_in_flight())
        });

        if cancelled > 0 {
            info!(task = %task_id, cancelled, "task downloads cancelled");
        }
    }
}

// ============================================================================
// DownloadDispatcher - Worker
// ============================================================================

impl DownloadDispatcher {
    /// Runs one job to a terminal state, honoring pause/cancel at every
    /// await point.
    async fn run_job(self: Arc<Self>, id: JobId) {
        let Some((mut cancel_rx, gate)) = ({
            let state = self.state.lock();
            state
                .jobs
                .get(&id)
                .map(|entry| (entry.cancel.subscribe(), Arc::clone(&entry.gate)))
        }) else {
            return;
        };

        // Wait through pauses before competing for a slot.
        loop {
            match self.get(id).map(|job| job.status) {
                Some(JobStatus::Queued) => break,
                Some(JobStatus::Paused) => {
                    tokio::select! {
                        _ = gate.notified() => {}
                        _ = cancel_rx.changed() => return self.finish_cancelled(id).await,
                    }
                }
                _ => return self.finish_cancelled(id).await,
            }
        }

        loop {
            let Some(job) = self.get(id) else { return };
            if job.status.is_terminal() {
                return self.finish_cancelled(id).await;
            }

            // A slot is held only for the attempt itself; backoffs wait
            // unslotted so other queued jobs can run.
            let permit = tokio::select! {
                permit = Arc::clone(&self.running).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = cancel_rx.changed() => return self.finish_cancelled(id).await,
            };

            let attempt = {
                let mut state = self.state.lock();
                let Some(entry) = state.jobs.get_mut(&id) else {
                    return;
                };
                entry.job.status = JobStatus::Running;
                entry.job.attempts += 1;
                entry.job.attempts
            };
            debug!(job = %id, attempt, url = %job.record.url, "download attempt");

            let outcome = tokio::select! {
                result = timeout(self.config.fetch_timeout, self.attempt(&job)) => match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::timeout(
                        "download attempt",
                        self.config.fetch_timeout.as_millis() as u64,
                    )),
                },
                _ = cancel_rx.changed() => return self.finish_cancelled(id).await,
            };
            drop(permit);

            match outcome {
                Ok(bytes) => return self.finish_completed(id, bytes).await,
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        job = %id,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient download failure, retrying"
                    );
                    {
                        let mut state = self.state.lock();
                        if let Some(entry) = state.jobs.get_mut(&id) {
                            entry.job.status = JobStatus::Queued;
                        }
                    }
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = cancel_rx.changed() => return self.finish_cancelled(id).await,
                    }
                }
                Err(e) => return self.finish_failed(id, &e).await,
            }
        }
    }

    /// Performs one transfer attempt, routed by media type.
    async fn attempt(self: &Arc<Self>, job: &DownloadJob) -> Result<u64> {
        let headers = build_request_headers(
            &job.record.url,
            &job.record.headers,
            job.record.referrer.as_deref(),
        );

        let id = job.id;
        let this = Arc::clone(self);
        let progress: ProgressFn = Arc::new(move |fraction| {
            this.report_progress(id, fraction);
        });

        if job.record.media_type.needs_transcode() {
            self.transcoder
                .transcode(&job.record.url, &headers, &job.destination, progress)
                .await
        } else {
            self.fetcher
                .fetch(&job.record.url, &headers, &job.destination, progress)
                .await
        }
    }

    /// Records forward progress and emits an event; regressions are dropped.
    fn report_progress(&self, id: JobId, fraction: f64) {
        let event = {
            let mut state = self.state.lock();
            let Some(entry) = state.jobs.get_mut(&id) else {
                return;
            };
            let clamped = fraction.clamp(0.0, 1.0);
            if clamped <= entry.job.progress || entry.job.status != JobStatus::Running {
                return;
            }
            entry.job.progress = clamped;
            Event::DownloadProgress {
                job_id: id,
                task_id: entry.job.record.task_id,
                progress: clamped,
            }
        };
        self.bus.emit(event);
    }
}

// ============================================================================
// DownloadDispatcher - Terminal Transitions
// ============================================================================

impl DownloadDispatcher {
    /// Marks a job completed, frees its slot, and emits `DownloadComplete`.
    async fn finish_completed(&self, id: JobId, bytes: u64) {
        let Some((task_id, event)) = self.settle(id, JobStatus::Completed, |job| {
            job.progress = 1.0;
            Event::DownloadComplete {
                job_id: id,
                task_id: job.record.task_id,
                destination: job.destination.clone(),
                bytes,
            }
        }) else {
            return;
        };
        info!(job = %id, bytes, "download complete");
        self.bus.emit(event);
        if let Some(observer) = self.observer() {
            observer.job_finished(task_id).await;
        }
    }

    /// Marks a job failed, frees its slot, and emits exactly one
    /// `DownloadFailed`.
    async fn finish_failed(&self, id: JobId, error: &Error) {
        let Some((task_id, event)) = self.settle(id, JobStatus::Failed, |job| {
            Event::DownloadFailed {
                job_id: id,
                task_id: job.record.task_id,
                error: error.to_string(),
            }
        }) else {
            return;
        };
        warn!(job = %id, error = %error, "download failed");
        self.bus.emit(event);
        if let Some(observer) = self.observer() {
            observer.job_finished(task_id).await;
        }
    }

    /// Worker-side cleanup after a cancel (or a vanished entry). Emits no
    /// transfer events; `cancel_task` already freed the slot.
    async fn finish_cancelled(&self, id: JobId) {
        let task_id = {
            let mut state = self.state.lock();
            let DispatchState {
                jobs,
                active_by_url,
            } = &mut *state;
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            if !entry.job.status.is_terminal() {
                entry.job.status = JobStatus::Cancelled;
            }
            if active_by_url.get(&entry.job.record.url) == Some(&id) {
                active_by_url.remove(&entry.job.record.url);
            }
            if entry.job.status == JobStatus::Cancelled {
                Some(entry.job.record.task_id)
            } else {
                None
            }
        };
        if let Some(task_id) = task_id {
            debug!(job = %id, "download cancelled");
            if let Some(observer) = self.observer() {
                observer.job_finished(task_id).await;
            }
        }
    }

    /// Applies a terminal status, releases the URL slot, and builds the
    /// terminal event under the lock.
    fn settle(
        &self,
        id: JobId,
        status: JobStatus,
        build: impl FnOnce(&mut DownloadJob) -> Event,
    ) -> Option<(TaskId, Event)> {
        let mut state = self.state.lock();
        let DispatchState {
            jobs,
            active_by_url,
        } = &mut *state;
        let entry = jobs.get_mut(&id)?;
        if entry.job.status.is_terminal() {
            return None;
        }
        entry.job.status = status;
        if active_by_url.get(&entry.job.record.url) == Some(&id) {
            active_by_url.remove(&entry.job.record.url);
        }
        let event = build(&mut entry.job);
        Some((entry.job.record.task_id, event))
    }
}

// ============================================================================
// Filename Derivation
// ============================================================================

/// Derives a safe destination filename from a media URL.
///
/// Uses the URL's last path segment when one exists, sanitized for the
/// filesystem; otherwise a timestamped fallback. Segmented media always
/// lands in an `.mp4` container regardless of the manifest's name.
#[must_use]
pub fn derive_filename(url: &str, media_type: MediaType) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|segment| !segment.is_empty())
    });

    let name = segment
        .map(|s| sanitize_filename(&s))
        .filter(|s| !s.is_empty());

    let stamp = || {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    };

    let ext = media_type.destination_extension();
    match name {
        Some(name) if media_type.needs_transcode() => {
            let mut path = PathBuf::from(name);
            path.set_extension("mp4");
            path.to_string_lossy().into_owned()
        }
        Some(name) if name.contains('.') => name,
        Some(name) => format!("{name}.{ext}"),
        None => format!("media_{}.{ext}", stamp()),
    }
}

/// Strips characters that are invalid or dangerous in filenames and bounds
/// the length.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .filter(|c| !c.is_control() && !INVALID_FILENAME_CHARS.contains(c))
        .collect();
    if out.len() > MAX_FILENAME_LEN {
        let mut cut = MAX_FILENAME_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out.trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

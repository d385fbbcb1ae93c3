//! Media detection over intercepted network responses.
//!
//! While a task has a live page, an [`Interceptor`] pump consumes the page's
//! response stream and classifies each response into a [`MediaType`] by URL
//! suffix first, content type second. Classification is constant time and
//! never blocks the page's own event delivery; everything heavier (header
//! capture, dedup lookup) is O(1) amortized against the per-task record map.
//!
//! Exactly one [`MediaDetected`](crate::events::Event::MediaDetected) event
//! is emitted per new (task, URL) pair; repeated sightings are suppressed.
//! Detaching the pump discards no already-emitted records — they stay in the
//! [`MediaStore`] until the owning task closes.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::engine::EngineResponse;
use crate::events::{Event, EventBus};
use crate::identifiers::TaskId;

// ============================================================================
// Constants
// ============================================================================

/// URL fragments that disqualify a response outright.
///
/// Trackers, ad beacons, and static assets; checked before any media
/// classification so the common case is a single scan and an early return.
const SKIP_PATTERNS: &[&str] = &[
    // Tracking / analytics
    "google-analytics",
    "googletagmanager",
    "googleads",
    "googlesyndication",
    "doubleclick",
    "facebook.com/tr",
    "analytics",
    "tracking",
    "beacon",
    "pixel",
    "telemetry",
    // Static assets
    ".js",
    ".css",
    ".woff",
    ".woff2",
    ".ttf",
    ".eot",
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".svg",
    ".ico",
    ".webp",
    // Misc
    "favicon",
    "fonts.googleapis",
    "fonts.gstatic",
];

/// Direct-download video suffixes.
const MP4_SUFFIXES: &[&str] = &[".mp4", ".mov", ".m4v"];

/// Suffixes that are recognizably media but of no known container.
///
/// WebM and bare audio; some CDNs serve these without any content type, so
/// the URL is the only signal.
const OTHER_SUFFIXES: &[&str] = &[".webm", ".mp3", ".m4a", ".aac", ".ogg", ".wav", ".flac"];

// ============================================================================
// MediaType
// ============================================================================

/// Classified kind of a discovered media resource.
///
/// A closed tagged variant decided once at detection time; downstream
/// routing never re-inspects the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Direct-download video (mp4/mov/m4v).
    Mp4,

    /// HLS playlist; segmented fetch + transcode.
    M3u8,

    /// DASH manifest; segmented fetch + transcode.
    Mpd,

    /// Recognizably media, but of no known container (webm, audio, ...).
    ///
    /// Ambiguous classification resolves here; it is a lower-priority
    /// record, not an error.
    Other,
}

impl MediaType {
    /// Returns the destination file extension for this type.
    ///
    /// Segmented formats are muxed to mp4 by the transcoder.
    #[inline]
    #[must_use]
    pub fn destination_extension(&self) -> &'static str {
        match self {
            Self::Mp4 | Self::M3u8 | Self::Mpd => "mp4",
            Self::Other => "bin",
        }
    }

    /// Returns `true` if downloading requires the transcode pipeline.
    #[inline]
    #[must_use]
    pub fn needs_transcode(&self) -> bool {
        matches!(self, Self::M3u8 | Self::Mpd)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mp4 => "mp4",
            Self::M3u8 => "m3u8",
            Self::Mpd => "mpd",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classifies a response into a media type.
///
/// Returns `None` for responses that are not media (static assets,
/// trackers, documents). URL suffix wins over content type.
#[must_use]
pub fn classify(url: &str, content_type: Option<&str>) -> Option<MediaType> {
    let url = url.to_ascii_lowercase();

    for pattern in SKIP_PATTERNS {
        if url.contains(pattern) {
            return None;
        }
    }

    for suffix in MP4_SUFFIXES {
        if url.contains(suffix) {
            return Some(MediaType::Mp4);
        }
    }

    if url.contains(".m3u8") || (url.contains("manifest") && url.contains("hls")) {
        return Some(MediaType::M3u8);
    }

    if url.contains(".mpd") || (url.contains("dash") && url.contains("manifest")) {
        return Some(MediaType::Mpd);
    }

    for suffix in OTHER_SUFFIXES {
        if url.contains(suffix) {
            return Some(MediaType::Other);
        }
    }

    let content_type = content_type?.to_ascii_lowercase();
    if content_type.contains("video/mp4") || content_type.contains("video/quicktime") {
        Some(MediaType::Mp4)
    } else if content_type.contains("mpegurl") {
        Some(MediaType::M3u8)
    } else if content_type.contains("dash+xml") {
        Some(MediaType::Mpd)
    } else if content_type.starts_with("video/") || content_type.starts_with("audio/") {
        Some(MediaType::Other)
    } else {
        None
    }
}

// ============================================================================
// MediaRecord
// ============================================================================

/// A discovered, classified, deduplicated media resource.
///
/// Immutable once created. Deduplicated by (task, URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Task that discovered the resource.
    pub task_id: TaskId,

    /// Resource URL.
    pub url: String,

    /// Classified media type.
    pub media_type: MediaType,

    /// Request headers captured for authenticated replay.
    pub headers: HashMap<String, String>,

    /// Page that initiated the request, if known.
    pub referrer: Option<String>,

    /// When the resource was first seen.
    pub detected_at: SystemTime,
}

impl MediaRecord {
    /// Creates a bare record with no captured headers.
    ///
    /// Used for user-initiated downloads of URLs the interceptor never saw.
    #[must_use]
    pub fn new(task_id: TaskId, url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            task_id,
            url: url.into(),
            media_type,
            headers: HashMap::new(),
            referrer: None,
            detected_at: SystemTime::now(),
        }
    }

    /// Builds a record from an intercepted response.
    #[must_use]
    pub fn from_response(task_id: TaskId, response: &EngineResponse, media_type: MediaType) -> Self {
        Self {
            task_id,
            url: response.url.clone(),
            media_type,
            headers: response.request_headers.clone(),
            referrer: response.referrer.clone(),
            detected_at: SystemTime::now(),
        }
    }
}

// ============================================================================
// MediaStore
// ============================================================================

/// Per-task registry of discovered media, deduplicated by URL.
#[derive(Default)]
pub struct MediaStore {
    records: Mutex<FxHashMap<TaskId, FxHashMap<String, MediaRecord>>>,
}

impl MediaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record unless the (task, URL) pair is already known.
    ///
    /// Returns `true` if the record was new.
    pub fn insert_new(&self, record: MediaRecord) -> bool {
        let mut records = self.records.lock();
        let per_task = records.entry(record.task_id).or_default();
        if per_task.contains_key(&record.url) {
            return false;
        }
        per_task.insert(record.url.clone(), record);
        true
    }

    /// Looks up a record by (task, URL).
    #[must_use]
    pub fn get(&self, task_id: TaskId, url: &str) -> Option<MediaRecord> {
        self.records.lock().get(&task_id)?.get(url).cloned()
    }

    /// Returns all records for a task.
    #[must_use]
    pub fn for_task(&self, task_id: TaskId) -> Vec<MediaRecord> {
        self.records
            .lock()
            .get(&task_id)
            .map(|per_task| per_task.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a task's records of one media type.
    #[must_use]
    pub fn for_task_by_type(&self, task_id: TaskId, media_type: MediaType) -> Vec<MediaRecord> {
        self.records
            .lock()
            .get(&task_id)
            .map(|per_task| {
                per_task
                    .values()
                    .filter(|r| r.media_type == media_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every record of a closed task.
    pub fn remove_task(&self, task_id: TaskId) {
        self.records.lock().remove(&task_id);
    }
}

// ============================================================================
// Interceptor
// ============================================================================

/// Running response pump for one task's page.
///
/// Returned by [`Interceptor::attach`]; the pump ends when the page's
/// response stream closes or the handle is detached/dropped.
#[derive(Debug)]
pub struct InterceptorHandle {
    pump: JoinHandle<()>,
}

impl InterceptorHandle {
    /// Stops the pump. Already-emitted records are untouched.
    pub fn detach(self) {
        self.pump.abort();
    }
}

impl Drop for InterceptorHandle {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Attaches media detection to a page's response stream.
pub struct Interceptor;

impl Interceptor {
    /// Spawns the classification pump for a task's page.
    ///
    /// For each response: classify, dedup against the store, and emit one
    /// `MediaDetected` for every genuinely new record.
    pub fn attach(
        task_id: TaskId,
        mut responses: mpsc::UnboundedReceiver<EngineResponse>,
        store: std::sync::Arc<MediaStore>,
        bus: EventBus,
    ) -> InterceptorHandle {
        let pump = tokio::spawn(async move {
            debug!(task = %task_id, "interceptor attached");
            while let Some(response) = responses.recv().await {
                if response.status >= 400 {
                    continue;
                }
                let Some(media_type) = classify(&response.url, response.content_type.as_deref())
                else {
                    continue;
                };

                let record = MediaRecord::from_response(task_id, &response, media_type);
                if store.insert_new(record.clone()) {
                    debug!(task = %task_id, media_type = %media_type, url = %record.url, "media detected");
                    bus.emit(Event::MediaDetected { record });
                } else {
                    trace!(task = %task_id, url = %response.url, "duplicate media sighting suppressed");
                }
            }
            debug!(task = %task_id, "interceptor stream ended");
        });

        InterceptorHandle { pump }
    }
}

// ============================================================================
// Tests
// ============================================================================

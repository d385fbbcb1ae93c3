//! Fetch and transcode collaborators.
//!
//! The dispatcher owns retry/backoff policy; these collaborators own the
//! actual byte transfer and muxing. Both are traits so tests (and embedders
//! with their own transfer stack) can substitute implementations:
//!
//! - [`HttpFetcher`]: streamed direct download over reqwest, for MP4 and
//!   other directly fetchable resources.
//! - [`FfmpegTranscoder`]: spawns `ffmpeg` to pull segmented HLS/DASH
//!   streams and mux them into an MP4 container.
//!
//! Errors are classified at this boundary: connection/timeout/5xx map to
//! [`Error::DownloadTransient`], HTTP 4xx and disk failures to
//! [`Error::DownloadPermanent`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Browser-like headers merged under captured ones.
///
/// Many media servers reject requests that do not look like a browser.
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    ("Accept", "*/*"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Connection", "keep-alive"),
    ("Sec-Fetch-Dest", "video"),
    ("Sec-Fetch-Mode", "no-cors"),
    ("Sec-Fetch-Site", "cross-site"),
];

/// Stderr lines kept from a failed ffmpeg run.
const FFMPEG_ERROR_TAIL: usize = 10;

// ============================================================================
// Progress Callback
// ============================================================================

/// Progress callback invoked with a fraction in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// A progress callback that discards all reports.
#[must_use]
pub fn noop_progress() -> ProgressFn {
    Arc::new(|_| {})
}

// ============================================================================
// Traits
// ============================================================================

/// Direct streamed download to a destination path.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches `url` with replay `headers` into `destination`.
    ///
    /// Returns the number of bytes written.
    async fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        destination: &Path,
        progress: ProgressFn,
    ) -> Result<u64>;
}

/// Segmented fetch + mux for manifest-based media.
#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    /// Pulls the stream behind `manifest_url` into `destination`.
    ///
    /// Returns the number of bytes written.
    async fn transcode(
        &self,
        manifest_url: &str,
        headers: &HashMap<String, String>,
        destination: &Path,
        progress: ProgressFn,
    ) -> Result<u64>;
}

// ============================================================================
// Header Assembly
// ============================================================================

/// Builds replay headers for a download request.
///
/// Captured headers win over the browser-like defaults. `Referer` and
/// `Origin` are filled in from the capturing page, falling back to the media
/// URL's own origin — many video servers check both.
#[must_use]
pub fn build_request_headers(
    url: &str,
    captured: &HashMap<String, String>,
    referrer: Option<&str>,
) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = DEFAULT_HEADERS
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();

    for (key, value) in captured {
        headers.insert(key.clone(), value.clone());
    }

    let origin_of = |value: &str| {
        Url::parse(value).ok().and_then(|parsed| {
            let host = parsed.host_str()?.to_string();
            Some(format!("{}://{}", parsed.scheme(), host))
        })
    };

    if !headers.contains_key("Referer") {
        let referer = referrer
            .map(str::to_string)
            .or_else(|| origin_of(url).map(|origin| format!("{origin}/")));
        if let Some(referer) = referer {
            headers.insert("Referer".to_string(), referer);
        }
    }

    if !headers.contains_key("Origin") {
        let origin = referrer.and_then(origin_of).or_else(|| origin_of(url));
        if let Some(origin) = origin {
            headers.insert("Origin".to_string(), origin);
        }
    }

    headers
}

/// Formats headers as the CRLF blob ffmpeg's `-headers` flag expects.
#[must_use]
pub fn format_header_blob(headers: &HashMap<String, String>) -> String {
    let mut blob = String::new();
    for (key, value) in headers {
        blob.push_str(key);
        blob.push_str(": ");
        blob.push_str(value);
        blob.push_str("\r\n");
    }
    blob
}

// ============================================================================
// HttpFetcher
// ============================================================================

/// Streamed HTTP fetcher over a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with an overall per-request timeout.
    ///
    /// # Errors
    ///
    /// [`Error::DownloadPermanent`] if the client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::permanent(format!("http client init failed: {e}")))?;
        Ok(Self { client })
    }
}

/// Maps a reqwest error to the retry taxonomy.
fn map_http_error(e: &reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_body() {
        Error::transient(e.to_string())
    } else {
        Error::permanent(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        destination: &Path,
        progress: ProgressFn,
    ) -> Result<u64> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| map_http_error(&e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(Error::transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Error::permanent(format!("HTTP {status}")));
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| Error::permanent(format!("cannot create {destination:?}: {e}")))?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_http_error(&e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::permanent(format!("disk write failed: {e}")))?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                progress((written as f64 / total as f64).min(1.0));
            }
        }

        file.flush()
            .await
            .map_err(|e| Error::permanent(format!("disk flush failed: {e}")))?;
        progress(1.0);

        debug!(url, bytes = written, "direct fetch complete");
        Ok(written)
    }
}

// ============================================================================
// FfmpegTranscoder
// ============================================================================

/// Spawns ffmpeg to pull segmented HLS/DASH media into an MP4 file.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegTranscoder {
    /// Uses `ffmpeg` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }

    /// Uses a specific ffmpeg binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        manifest_url: &str,
        headers: &HashMap<String, String>,
        destination: &Path,
        progress: ProgressFn,
    ) -> Result<u64> {
        let header_blob = format_header_blob(headers);

        let mut child = Command::new(&self.binary)
            .arg("-y")
            .arg("-headers")
            .arg(&header_blob)
            .arg("-i")
            .arg(manifest_url)
            // Copy streams as-is; fix ADTS audio for HLS-in-MP4.
            .arg("-c")
            .arg("copy")
            .arg("-bsf:a")
            .arg("aac_adtstoasc")
            .arg(destination)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::permanent(format!("failed to launch ffmpeg: {e}")))?;

        // ffmpeg writes progress to stderr; keep a tail for diagnostics.
        let mut tail: Vec<String> = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() >= FFMPEG_ERROR_TAIL {
                    tail.remove(0);
                }
                tail.push(line);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::permanent(format!("ffmpeg wait failed: {e}")))?;

        if !status.success() {
            warn!(manifest_url, code = ?status.code(), "ffmpeg failed");
            return Err(Error::permanent(format!(
                "ffmpeg exited with {status}: {}",
                tail.join(" | ")
            )));
        }

        progress(1.0);
        let bytes = tokio::fs::metadata(destination)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        debug!(manifest_url, bytes, "transcode complete");
        Ok(bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_headers_win_over_defaults() {
        let captured = HashMap::from([("User-Agent".to_string(), "custom/1.0".to_string())]);
        let headers =
            build_request_headers("https://cdn.example.com/v.mp4", &captured, None);
        assert_eq!(headers.get("User-Agent").unwrap(), "custom/1.0");
        assert_eq!(headers.get("Accept").unwrap(), "*/*");
    }

    #[test]
    fn test_referer_falls_back_to_media_origin() {
        let headers =
            build_request_headers("https://cdn.example.com/path/v.mp4", &HashMap::new(), None);
        assert_eq!(headers.get("Referer").unwrap(), "https://cdn.example.com/");
        assert_eq!(headers.get("Origin").unwrap(), "https://cdn.example.com");
    }

    #[test]
    fn test_referrer_page_sets_origin() {
        let headers = build_request_headers(
            "https://cdn.example.com/v.mp4",
            &HashMap::new(),
            Some("https://watch.example/player"),
        );
        assert_eq!(headers.get("Referer").unwrap(), "https://watch.example/player");
        assert_eq!(headers.get("Origin").unwrap(), "https://watch.example");
    }

    #[test]
    fn test_header_blob_format() {
        let headers = HashMap::from([("Cookie".to_string(), "a=1".to_string())]);
        let blob = format_header_blob(&headers);
        assert_eq!(blob, "Cookie: a=1\r\n");
    }

    #[test]
    fn test_http_error_classification() {
        // Builder misuse produces a permanent (non-network) error.
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(map_http_error(&err), Error::DownloadPermanent { .. }));
    }
}

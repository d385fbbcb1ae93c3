//! Rawser core - browser session and media download orchestrator.
//!
//! This library coordinates browser automation sessions ("tasks") against a
//! pluggable browser engine, sniffs media resources out of their network
//! traffic, and downloads what it finds through a bounded, retryable job
//! queue.
//!
//! # Architecture
//!
//! The core sits between two collaborators it knows nothing concrete about:
//!
//! - **Engine**: any browser automation backend implementing the [`Engine`]
//!   trait (contexts, pages, navigation, response streams)
//! - **Frontend**: any GUI or headless driver sending [`Command`]s and
//!   consuming [`Event`]s over the [`EventBus`]
//!
//! Key design principles:
//!
//! - One task owns one context for its whole life; pages come and go
//! - Caps are enforced before engine calls, never exceeded transiently
//! - Per-task command serialization; distinct tasks run fully in parallel
//! - Downloads never require a page; a failing job fails only itself
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rawser_core::{
//!     Controller, DownloadDispatcher, Engine, EventBus, FfmpegTranscoder,
//!     HttpFetcher, MediaStore, OrchestratorConfig, ResourcePool, Result,
//!     TabManager,
//! };
//!
//! async fn run(engine: Arc<dyn Engine>) -> Result<()> {
//!     let config = OrchestratorConfig::new().with_max_contexts(16);
//!     let bus = EventBus::new();
//!
//!     let pool = Arc::new(ResourcePool::new(engine, &config));
//!     let manager = Arc::new(TabManager::new(
//!         pool,
//!         Arc::new(MediaStore::new()),
//!         bus.clone(),
//!         config.clone(),
//!     ));
//!     let dispatcher = DownloadDispatcher::new(
//!         config.download,
//!         bus.clone(),
//!         Arc::new(HttpFetcher::new(std::time::Duration::from_secs(3600))?),
//!         Arc::new(FfmpegTranscoder::new()),
//!     );
//!     let controller = Controller::new(manager, dispatcher, bus);
//!
//!     let task = controller.manager().create("https://example.com").await?;
//!     controller.manager().navigate(task, "https://example.com").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Caps, timeouts, and download policy |
//! | [`controller`] | Command-loop glue between frontend and core |
//! | [`download`] | Download dispatcher, fetch/transcode collaborators |
//! | [`engine`] | [`Engine`] trait, lifecycle gate, resource pool |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | [`Command`]/[`Event`] types and the [`EventBus`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`intercept`] | Response classification and the media registry |
//! | [`tabs`] | Task registry, state machine, command surface |

// ============================================================================
// Modules
// ============================================================================

/// Caps, timeouts, and download policy.
///
/// Use [`OrchestratorConfig::new()`] and the `with_*` builders.
pub mod config;

/// Command-loop glue between a frontend and the core.
pub mod controller;

/// Download dispatcher and its fetch/transcode collaborators.
pub mod download;

/// Engine abstraction: the [`Engine`] trait, the lifecycle gate, and the
/// context/page resource pool.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed command/event channel between the core and its frontend.
pub mod events;

/// Type-safe identifiers for tasks, jobs, contexts, and pages.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Network response classification and the per-task media registry.
pub mod intercept;

/// Task registry, per-task state machine, and the public command surface.
pub mod tabs;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{DownloadConfig, OrchestratorConfig};

// Controller
pub use controller::Controller;

// Download types
pub use download::{
    DownloadDispatcher, DownloadJob, Fetcher, FfmpegTranscoder, HttpFetcher, JobObserver,
    JobStatus, Transcoder,
};

// Engine types
pub use engine::{ContextHandle, Engine, EngineHandle, EngineResponse, PageHandle, ResourcePool};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{Command, Event, EventBus};

// Identifier types
pub use identifiers::{ContextId, JobId, PageId, TaskId};

// Interception types
pub use intercept::{MediaRecord, MediaStore, MediaType};

// Tab types
pub use tabs::{TabManager, TabState, TaskSnapshot};

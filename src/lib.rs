//! Gallery Download Core Library
//!
//! This library provides the download orchestration and fault-tolerance
//! engine for multi-page image galleries (E-Hentai/ExHentai-style sites). It
//! fetches gallery metadata, walks each gallery's pages, classifies and
//! retries failures, checkpoints progress so a crash or restart can resume,
//! and falls back to a headless browser when direct fetches are blocked.
//!
//! # Architecture
//!
//! - [`http`] - per-worker HTTP session (C1)
//! - [`category`] - error classification & retry policy (C2)
//! - [`retry`] - retry executor with circuit breaker (C3)
//! - [`gallery`] - gallery data model and processor (C4)
//! - [`image`] - image-page discovery and atomic save (C5)
//! - [`fallback`] - headless-browser fallback path (C6)
//! - [`session`] - per-gallery lifecycle state machine (C7)
//! - [`resume`] - durable per-URL checkpoint store (C8)
//! - [`events`] / [`orchestrator`] - event bus and queue driver (C9)
//! - [`state`] - shared in-memory progress/flags store (C10)
//! - [`traits`] - the UI/naming/filesystem seams the embedding process implements
//! - [`config`] - ambient settings and per-gallery download options
//!
//! This crate holds no GUI code and performs no authentication of its own
//! (§1 Non-goals); the embedding process supplies cookies, a
//! [`traits::NamingProvider`], a [`traits::UiSink`], and drives the
//! [`orchestrator::Orchestrator`] queue.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod category;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod gallery;
pub mod http;
pub mod image;
pub mod orchestrator;
pub mod resume;
pub mod retry;
pub mod session;
pub mod state;
pub mod traits;

// Re-export commonly used types
pub use category::{ErrorCategory, Severity};
pub use config::{ConfigError, DownloadOptions, DuplicatePolicy, Settings};
pub use error::DownloadError;
pub use events::{Event, EventBus};
pub use fallback::FallbackExecutor;
pub use gallery::{DownloadRange, GalleryMetadata, GalleryProcessor, GalleryTask, UrlStatus};
pub use http::HttpClient;
pub use image::{ImageSaver, SaveOutcome};
pub use orchestrator::Orchestrator;
pub use resume::{ResumeError, ResumePoint, ResumeStore};
pub use retry::{CircuitBreaker, Outcome, RetryExecutor};
pub use session::{SessionAction, SessionMachine, SessionState, TransitionRejected};
pub use state::StateStore;
pub use traits::{
    DefaultNamingProvider, FileSystem, NamingProvider, NullUiSink, TokioFileSystem, UiSink,
};

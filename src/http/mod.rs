//! HTTP client (C1, §6): per-worker sessions and default headers shared
//! across the gallery processor and image saver.

mod client;
mod user_agent;

pub use client::{FetchResult, HttpClient};

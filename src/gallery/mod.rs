//! Gallery data model and processor (C4, §3, §4.4).

pub mod processor;
pub mod types;

pub use processor::GalleryProcessor;
pub use types::{DownloadRange, GalleryMetadata, GalleryTask, ImagePageRef, UrlStatus};

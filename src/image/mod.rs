//! Image fetch/save (C5, §4.5).

mod filename;
mod saver;

pub use saver::{DiscoveredImage, ImageSaver, SaveOutcome, discover_image};

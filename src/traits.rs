//! External collaborator interfaces (§9).
//!
//! The original implementation reaches into its GUI parent via runtime
//! reflection and duck typing. Here those contracts are explicit traits the
//! engine depends on and the embedding process implements, so the core never
//! holds a reference back to its host and every collaborator is mockable in
//! tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::category::Severity;

/// The small set of operations the engine needs from its host UI (§9).
/// `post_log`/`post_progress` are fire-and-forget; `schedule_update` lets the
/// host batch several notifications onto its own main-thread tick.
#[async_trait]
pub trait UiSink: Send + Sync {
    fn post_log(&self, severity: Severity, message: &str);
    fn post_progress(&self, url: &str, current: u32, total: u32);
    fn schedule_update(&self);
}

/// A `UiSink` that discards everything; useful as a default collaborator for
/// the harness binary and for tests that don't assert on UI output.
pub struct NullUiSink;

#[async_trait]
impl UiSink for NullUiSink {
    fn post_log(&self, _severity: Severity, _message: &str) {}
    fn post_progress(&self, _url: &str, _current: u32, _total: u32) {}
    fn schedule_update(&self) {}
}

/// Renders a save-folder / filename from a gallery's metadata. Naming
/// templates are out of scope for the core (§1 Non-goals); this trait is the
/// narrow interface the core calls into instead of deciding templates
/// itself.
pub trait NamingProvider: Send + Sync {
    fn render_gallery_folder(&self, title: &str, artist: Option<&str>) -> PathBuf;
    fn render_image_filename(&self, relative_page: u32, source_url: &str) -> String;
}

/// A `NamingProvider` that mirrors the source's default pattern closely
/// enough for tests and the harness binary: `Artist_Title/`.
pub struct DefaultNamingProvider;

impl NamingProvider for DefaultNamingProvider {
    fn render_gallery_folder(&self, title: &str, artist: Option<&str>) -> PathBuf {
        let safe_title = sanitize(title);
        match artist {
            Some(artist) => PathBuf::from(format!("{}_{}", sanitize(artist), safe_title)),
            None => PathBuf::from(safe_title),
        }
    }

    fn render_image_filename(&self, relative_page: u32, source_url: &str) -> String {
        let ext = source_url
            .rsplit('.')
            .next()
            .filter(|candidate| candidate.len() <= 5 && !candidate.contains('/'))
            .unwrap_or("jpg");
        format!("{relative_page:04}.{ext}")
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if "/\\:*?\"<>|".contains(c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Filesystem operations the engine performs, abstracted so tests can swap
/// in an in-memory implementation without touching a real disk.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    async fn exists(&self, path: &Path) -> bool;
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// `tokio::fs`-backed implementation used outside tests.
pub struct TokioFileSystem;

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_naming_provider_joins_artist_and_title() {
        let provider = DefaultNamingProvider;
        let folder = provider.render_gallery_folder("My Gallery", Some("Some Artist"));
        assert_eq!(folder, PathBuf::from("Some Artist_My Gallery"));
    }

    #[test]
    fn default_naming_provider_sanitizes_unsafe_characters() {
        let provider = DefaultNamingProvider;
        let folder = provider.render_gallery_folder("A/B:C", None);
        assert_eq!(folder, PathBuf::from("A_B_C"));
    }

    #[test]
    fn render_image_filename_pads_relative_page() {
        let provider = DefaultNamingProvider;
        let name = provider.render_image_filename(7, "https://example.com/i/007.png");
        assert_eq!(name, "0007.png");
    }

    #[tokio::test]
    async fn tokio_filesystem_create_dir_all_then_exists() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        let fs = TokioFileSystem;
        fs.create_dir_all(&nested).await.unwrap();
        assert!(fs.exists(&nested).await);
    }
}

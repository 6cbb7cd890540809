//! Image fetcher & saver (C5, §4.5).
//!
//! Per image page: fetch the page HTML, discover the single `<img>` source,
//! stream the image to a temp file, apply the duplicate-file policy, and
//! atomically rename the temp file into place. Partial writes are never
//! renamed into place — every early return on error leaves the temp file
//! either absent or orphaned, never at the target path.

use std::path::{Path, PathBuf};

use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::DuplicatePolicy;
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::traits::FileSystem;

use super::filename::resolve_unique_path;

/// What an image page's HTML yielded (§4.5 step 1).
#[derive(Debug, Clone)]
pub struct DiscoveredImage {
    pub image_url: String,
    /// The `nl` query parameter some gallery sites use to refetch a page
    /// whose image link has expired; re-appended by the caller on retry.
    pub refetch_token: Option<String>,
}

/// Parses an image page's HTML for its single `<img>` source and `nl` token.
///
/// # Errors
/// Returns [`DownloadError::Parse`] if no `<img>` element is present.
pub fn discover_image(page_url: &str, html: &str) -> Result<DiscoveredImage, DownloadError> {
    let document = Html::parse_document(html);
    let img_selector =
        Selector::parse("#img, img#img, .sni img, img").expect("static selector is valid");

    let src = document
        .select(&img_selector)
        .find_map(|el| el.value().attr("src"))
        .ok_or_else(|| DownloadError::parse("image page (<img> src)", page_url))?;

    let nl_selector =
        Selector::parse("a#loadfail, a[onclick*='nl']").expect("static selector is valid");
    let refetch_token = document
        .select(&nl_selector)
        .find_map(|el| el.value().attr("href"))
        .and_then(|href| href.split("nl=").nth(1))
        .map(|tail| tail.split(['&', '\'', '"']).next().unwrap_or(tail).to_string());

    Ok(DiscoveredImage {
        image_url: src.to_string(),
        refetch_token,
    })
}

/// Result of saving one image (§4.5 steps 2-5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    AlreadyPresent(PathBuf),
}

/// Fetches and saves one gallery page's image.
pub struct ImageSaver<'a> {
    http: &'a HttpClient,
    fs: &'a dyn FileSystem,
}

impl<'a> ImageSaver<'a> {
    #[must_use]
    pub fn new(http: &'a HttpClient, fs: &'a dyn FileSystem) -> Self {
        Self { http, fs }
    }

    /// Runs the full per-page procedure (§4.5 steps 1-5). `filename` is the
    /// name the [`crate::traits::NamingProvider`] already rendered for this
    /// page (extension included).
    ///
    /// # Errors
    /// Returns [`DownloadError`] per the error contracts in §4.5: a 404 at
    /// step 1 or 2 surfaces as `HttpStatus{status: 404}` (classified
    /// `net.client_error` by the caller's retry executor); IO failures at
    /// step 4 surface as [`DownloadError::Io`].
    pub async fn fetch_and_save(
        &self,
        image_page_url: &str,
        save_dir: &Path,
        filename: &str,
        duplicate_policy: DuplicatePolicy,
    ) -> Result<SaveOutcome, DownloadError> {
        let page_html = self.http.get_text(image_page_url).await?;
        let discovered = discover_image(image_page_url, &page_html)?;

        let target = save_dir.join(filename);

        if self.fs.exists(&target).await {
            match duplicate_policy {
                DuplicatePolicy::Skip => {
                    debug!(path = %target.display(), "duplicate-file policy: skip");
                    return Ok(SaveOutcome::AlreadyPresent(target));
                }
                DuplicatePolicy::Rename => {
                    let renamed = resolve_unique_path(save_dir, filename);
                    return self.download_into(&discovered.image_url, &renamed).await;
                }
                DuplicatePolicy::Overwrite => {
                    // fall through: write-through to the same target below.
                }
            }
        }

        self.download_into(&discovered.image_url, &target).await
    }

    async fn download_into(
        &self,
        image_url: &str,
        target: &Path,
    ) -> Result<SaveOutcome, DownloadError> {
        let tmp_path = append_tmp_suffix(target);
        let fetch = self.http.download_streaming(image_url, &tmp_path).await;
        if let Err(error) = fetch {
            let _ = self.fs.remove_file(&tmp_path).await;
            return Err(error);
        }

        self.fs.rename(&tmp_path, target).await.map_err(|source| {
            warn!(path = %target.display(), "atomic rename failed, temp file left on disk");
            DownloadError::io(target.to_path_buf(), source)
        })?;

        Ok(SaveOutcome::Saved(target.to_path_buf()))
    }
}

fn append_tmp_suffix(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    target.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::traits::TokioFileSystem;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn discover_image_finds_img_src() {
        let html = r#"<html><body><img id="img" src="https://i.example.com/0001.jpg"></body></html>"#;
        let discovered = discover_image("https://e/g/1/p1", html).unwrap();
        assert_eq!(discovered.image_url, "https://i.example.com/0001.jpg");
    }

    #[test]
    fn discover_image_errors_without_img() {
        let html = "<html><body>no image here</body></html>";
        let error = discover_image("https://e/g/1/p1", html).unwrap_err();
        assert!(matches!(error, DownloadError::Parse { .. }));
    }

    #[tokio::test]
    async fn fetch_and_save_writes_file_and_renames_atomically() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<img id="img" src="{}/i/1.jpg">"#,
                server.uri()
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/i/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 128]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = HttpClient::new(None).unwrap();
        let fs = TokioFileSystem;
        let saver = ImageSaver::new(&http, &fs);

        let outcome = saver
            .fetch_and_save(
                &format!("{}/page/1", server.uri()),
                dir.path(),
                "0001.jpg",
                DuplicatePolicy::Overwrite,
            )
            .await
            .unwrap();

        match outcome {
            SaveOutcome::Saved(path) => {
                assert!(path.exists());
                assert_eq!(tokio::fs::read(&path).await.unwrap().len(), 128);
            }
            SaveOutcome::AlreadyPresent(_) => panic!("expected a fresh save"),
        }
    }

    #[tokio::test]
    async fn skip_policy_leaves_existing_file_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<img id="img" src="{}/i/1.jpg">"#,
                server.uri()
            )))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("0001.jpg"), b"existing").await.unwrap();
        let http = HttpClient::new(None).unwrap();
        let fs = TokioFileSystem;
        let saver = ImageSaver::new(&http, &fs);

        let outcome = saver
            .fetch_and_save(
                &format!("{}/page/1", server.uri()),
                dir.path(),
                "0001.jpg",
                DuplicatePolicy::Skip,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SaveOutcome::AlreadyPresent(_)));
        let body = tokio::fs::read(dir.path().join("0001.jpg")).await.unwrap();
        assert_eq!(body, b"existing");
    }

    #[tokio::test]
    async fn rename_policy_appends_numeric_suffix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<img id="img" src="{}/i/1.jpg">"#,
                server.uri()
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/i/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8; 16]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("0001.jpg"), b"existing").await.unwrap();
        let http = HttpClient::new(None).unwrap();
        let fs = TokioFileSystem;
        let saver = ImageSaver::new(&http, &fs);

        let outcome = saver
            .fetch_and_save(
                &format!("{}/page/1", server.uri()),
                dir.path(),
                "0001.jpg",
                DuplicatePolicy::Rename,
            )
            .await
            .unwrap();

        match outcome {
            SaveOutcome::Saved(path) => assert_eq!(path, dir.path().join("0001_1.jpg")),
            SaveOutcome::AlreadyPresent(_) => panic!("expected a renamed save"),
        }
    }

    #[tokio::test]
    async fn missing_image_page_maps_to_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = HttpClient::new(None).unwrap();
        let fs = TokioFileSystem;
        let saver = ImageSaver::new(&http, &fs);

        let error = saver
            .fetch_and_save(
                &format!("{}/page/missing", server.uri()),
                dir.path(),
                "0001.jpg",
                DuplicatePolicy::Overwrite,
            )
            .await
            .unwrap_err();
        match error {
            DownloadError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {other}"),
        }
    }
}

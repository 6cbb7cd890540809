//! Headless-browser fallback executor (C6, §4.6).
//!
//! Invoked by the orchestrator when the retry executor returns
//! `action=continue` with a fallback reason and the category's
//! `selenium_fallback` is set. Every exit path — success, extraction
//! failure, or navigation timeout — releases the browser session and wipes
//! its isolated user-data directory; none of this depends on the caller
//! remembering to clean up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DuplicatePolicy;
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::image::{SaveOutcome, discover_image};
use crate::traits::FileSystem;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const CANVAS_DATA_URL_JS: &str = r#"
(() => {
  const img = document.querySelector('#img, img#img, .sni img, img');
  if (!img) return null;
  const canvas = document.createElement('canvas');
  canvas.width = img.naturalWidth;
  canvas.height = img.naturalHeight;
  const ctx = canvas.getContext('2d');
  try {
    ctx.drawImage(img, 0, 0);
    return canvas.toDataURL('image/png');
  } catch (e) {
    return null;
  }
})()
"#;

const CANVAS_BLOB_DATA_URL_JS: &str = r#"
(() => new Promise((resolve) => {
  const img = document.querySelector('#img, img#img, .sni img, img');
  if (!img) { resolve(null); return; }
  const canvas = document.createElement('canvas');
  canvas.width = img.naturalWidth;
  canvas.height = img.naturalHeight;
  const ctx = canvas.getContext('2d');
  try {
    ctx.drawImage(img, 0, 0);
  } catch (e) {
    resolve(null);
    return;
  }
  canvas.toBlob((blob) => {
    if (!blob) { resolve(null); return; }
    const reader = new FileReader();
    reader.onloadend = () => resolve(reader.result);
    reader.onerror = () => resolve(null);
    reader.readAsDataURL(blob);
  });
}))()
"#;

/// A scoped headless-browser session: browser process, its CDP event
/// handler task, and the isolated user-data directory it owns.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    /// Step 1 (§4.6): launch with an isolated user-data dir, hard-timeout at
    /// [`STARTUP_TIMEOUT`].
    async fn acquire() -> Result<Self, DownloadError> {
        let user_data_dir =
            std::env::temp_dir().join(format!("gallery_core_browser_{}", std::process::id()));
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|source| DownloadError::io(user_data_dir.clone(), source))?;

        let config = BrowserConfig::builder()
            .user_data_dir(user_data_dir.clone())
            .request_timeout(STARTUP_TIMEOUT)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio")
            .build()
            .map_err(|message| DownloadError::browser("driver", message.to_string()))?;

        let launch = tokio::time::timeout(STARTUP_TIMEOUT, Browser::launch(config));
        let (browser, mut handler) = match launch.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(error)) => return Err(DownloadError::browser("driver", error.to_string())),
            Err(_) => return Err(DownloadError::browser("driver", "startup timed out")),
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    warn!(%error, "browser CDP handler error");
                }
            }
        });

        Ok(Self {
            browser,
            handler: handler_task,
            user_data_dir,
        })
    }

    /// Step 5 (§4.6): always release the session and wipe its temp dir.
    async fn release(mut self) {
        self.handler.abort();
        let _ = self.browser.close().await;
        if let Err(error) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            warn!(path = %self.user_data_dir.display(), %error, "failed to remove browser user-data dir");
        }
    }
}

/// Runs the headless-browser fallback for one image page.
pub struct FallbackExecutor<'a> {
    http: &'a HttpClient,
    fs: &'a dyn FileSystem,
}

impl<'a> FallbackExecutor<'a> {
    #[must_use]
    pub fn new(http: &'a HttpClient, fs: &'a dyn FileSystem) -> Self {
        Self { http, fs }
    }

    /// Fetches and saves one image page's bytes via the headless browser,
    /// applying the same duplicate-file policy as the primary path (§4.6
    /// step 4).
    ///
    /// # Errors
    /// Returns [`DownloadError::Browser`] if every extraction strategy comes
    /// back empty, or an `Io`/`Network` error from the write/fetch path.
    pub async fn fetch_and_save(
        &self,
        image_page_url: &str,
        save_dir: &Path,
        filename: &str,
        duplicate_policy: DuplicatePolicy,
    ) -> Result<SaveOutcome, DownloadError> {
        let session = BrowserSession::acquire().await?;
        let result = self.run(&session, image_page_url, save_dir, filename, duplicate_policy).await;
        session.release().await;
        result
    }

    async fn run(
        &self,
        session: &BrowserSession,
        image_page_url: &str,
        save_dir: &Path,
        filename: &str,
        duplicate_policy: DuplicatePolicy,
    ) -> Result<SaveOutcome, DownloadError> {
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|error| DownloadError::browser("navigate", error.to_string()))?;
        page.goto(image_page_url)
            .await
            .map_err(|error| DownloadError::browser("navigate", error.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|error| DownloadError::browser("navigate", error.to_string()))?;

        let target = save_dir.join(filename);
        if self.fs.exists(&target).await && duplicate_policy == DuplicatePolicy::Skip {
            return Ok(SaveOutcome::AlreadyPresent(target));
        }

        // Strategy (i): canvas -> toDataURL -> base64 decode.
        if let Some(bytes) = self.try_canvas_data_url(&page).await {
            return self.write_bytes(&bytes, save_dir, filename, duplicate_policy).await;
        }

        // Strategy (ii): direct GET on the discovered <img>.src.
        let html = page
            .content()
            .await
            .map_err(|error| DownloadError::browser("extract", error.to_string()))?;
        if let Ok(discovered) = discover_image(image_page_url, &html) {
            let tmp = save_dir.join(format!("{filename}.part"));
            if self.http.download_streaming(&discovered.image_url, &tmp).await.is_ok() {
                return self.finalize_from_temp(&tmp, save_dir, filename, duplicate_policy).await;
            }
        }

        // Strategy (iii): canvas -> toBlob -> FileReader. A separate entry
        // point from strategy (i): `toBlob` is async and produces its own
        // Blob/FileReader round trip rather than `toDataURL`'s synchronous
        // one, so a page that fails to extract via (i) still gets a genuinely
        // different attempt here instead of repeating the same call.
        if let Some(bytes) = self.try_canvas_blob_data_url(&page).await {
            return self.write_bytes(&bytes, save_dir, filename, duplicate_policy).await;
        }

        Err(DownloadError::browser(
            "extract",
            "all three extraction strategies returned empty bytes",
        ))
    }

    async fn try_canvas_data_url(&self, page: &chromiumoxide::Page) -> Option<Vec<u8>> {
        let value = page.evaluate(CANVAS_DATA_URL_JS).await.ok()?;
        let data_url: Option<String> = value.into_value().ok()?;
        decode_data_url(&data_url?)
    }

    async fn try_canvas_blob_data_url(&self, page: &chromiumoxide::Page) -> Option<Vec<u8>> {
        let value = page.evaluate(CANVAS_BLOB_DATA_URL_JS).await.ok()?;
        let data_url: Option<String> = value.into_value().ok()?;
        decode_data_url(&data_url?)
    }

    async fn write_bytes(
        &self,
        bytes: &[u8],
        save_dir: &Path,
        filename: &str,
        duplicate_policy: DuplicatePolicy,
    ) -> Result<SaveOutcome, DownloadError> {
        let target = save_dir.join(filename);
        if self.fs.exists(&target).await {
            match duplicate_policy {
                DuplicatePolicy::Skip => return Ok(SaveOutcome::AlreadyPresent(target)),
                DuplicatePolicy::Rename | DuplicatePolicy::Overwrite => {}
            }
        }
        let tmp = save_dir.join(format!("{filename}.part"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|source| DownloadError::io(tmp.clone(), source))?;
        self.finalize_from_temp(&tmp, save_dir, filename, duplicate_policy).await
    }

    async fn finalize_from_temp(
        &self,
        tmp: &Path,
        save_dir: &Path,
        filename: &str,
        _duplicate_policy: DuplicatePolicy,
    ) -> Result<SaveOutcome, DownloadError> {
        let target = save_dir.join(filename);
        self.fs.rename(tmp, &target).await.map_err(|source| {
            DownloadError::io(target.clone(), source)
        })?;
        info!(path = %target.display(), "fallback save complete");
        Ok(SaveOutcome::Saved(target))
    }
}

fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let encoded = data_url.split("base64,").nth(1)?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_js_references_expected_selector() {
        assert!(CANVAS_DATA_URL_JS.contains("querySelector"));
    }

    #[test]
    fn blob_js_is_a_distinct_script_using_toblob() {
        assert_ne!(CANVAS_BLOB_DATA_URL_JS, CANVAS_DATA_URL_JS);
        assert!(CANVAS_BLOB_DATA_URL_JS.contains("toBlob"));
        assert!(CANVAS_BLOB_DATA_URL_JS.contains("FileReader"));
        assert!(CANVAS_DATA_URL_JS.contains("toDataURL"));
    }

    #[test]
    fn decode_data_url_extracts_base64_payload() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_data_url(&data_url), Some(b"hello".to_vec()));
    }
}

//! Per-worker HTTP session (C1, §6).
//!
//! Each gallery-processing task builds its own [`HttpClient`] rather than
//! sharing one across tasks (§5: "HTTP sessions are not shared across
//! threads. Each worker thread gets its own session on first use."). Cookies
//! supplied by the user are forwarded verbatim; the core performs no
//! authentication of its own (§1 Non-goals).

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::DownloadError;

use super::user_agent::{DEFAULT_ACCEPT, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_USER_AGENT};

/// HTTP default per §5: 30s. Applied as the connect timeout; the overall
/// request timeout is generous since galleries can be large.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a streamed image download (§4.5 step 2).
pub struct FetchResult {
    pub bytes_written: u64,
    pub content_length: Option<u64>,
}

/// One worker's HTTP session: connection pool, cookie jar, default headers.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a new session. `cookies` is a raw `Cookie:` header value
    /// forwarded from the user, if supplied (§1, §6).
    ///
    /// # Errors
    /// Returns [`DownloadError`] if the underlying `reqwest` client cannot be
    /// constructed (e.g. TLS backend initialization failure).
    pub fn new(cookies: Option<&str>) -> Result<Self, DownloadError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            DEFAULT_ACCEPT.parse().expect("static header value"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            DEFAULT_ACCEPT_LANGUAGE.parse().expect("static header value"),
        );
        if let Some(cookies) = cookies {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(cookies) {
                headers.insert(reqwest::header::COOKIE, value);
            }
        }

        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|source| DownloadError::network("<client-build>", source))?;

        Ok(Self { client })
    }

    /// Fetches `url` and returns the response body as text, for gallery
    /// metadata and image-page HTML (§4.4 step 2, §4.5 step 1).
    ///
    /// # Errors
    /// Returns [`DownloadError::HttpStatus`] for non-2xx responses (with
    /// `Retry-After` captured for 429s) or [`DownloadError::Network`] /
    /// [`DownloadError::Timeout`] for transport failures.
    #[instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.send_get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(url, status, response).await);
        }
        response
            .text()
            .await
            .map_err(|source| DownloadError::network(url, source))
    }

    /// Streams `url`'s body into `dest` (a temp file adjacent to the final
    /// target, per §4.5 step 2), verifying the byte count against
    /// `Content-Length` when the server reports one.
    ///
    /// # Errors
    /// Returns [`DownloadError`] for transport failures, non-2xx status, IO
    /// errors while writing, or a size mismatch (`Integrity`).
    #[instrument(skip(self))]
    pub async fn download_streaming(
        &self,
        url: &str,
        dest: &Path,
    ) -> Result<FetchResult, DownloadError> {
        let response = self.send_get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(url, status, response).await);
        }
        let content_length = response.content_length();

        let file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| DownloadError::io(dest, source))?;
        let mut writer = tokio::io::BufWriter::new(file);

        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::network(url, source))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| DownloadError::io(dest, source))?;
            bytes_written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|source| DownloadError::io(dest, source))?;

        if let Some(expected) = content_length {
            if expected != bytes_written {
                return Err(DownloadError::integrity(dest, expected, bytes_written));
            }
        }

        debug!(url, bytes_written, "streamed download complete");
        Ok(FetchResult {
            bytes_written,
            content_length,
        })
    }

    async fn send_get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        self.client.get(url).send().await.map_err(|source| {
            if source.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, source)
            }
        })
    }

    async fn status_error(
        &self,
        url: &str,
        status: StatusCode,
        response: reqwest::Response,
    ) -> DownloadError {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        DownloadError::http_status_with_retry_after(url, status.as_u16(), retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_text_returns_body_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/g/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gallery</html>"))
            .mount(&server)
            .await;

        let client = HttpClient::new(None).unwrap();
        let body = client
            .get_text(&format!("{}/g/1", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>gallery</html>");
    }

    #[tokio::test]
    async fn get_text_maps_429_to_http_status_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/g/1"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;

        let client = HttpClient::new(None).unwrap();
        let error = client
            .get_text(&format!("{}/g/1", server.uri()))
            .await
            .unwrap_err();
        match error {
            DownloadError::HttpStatus { status, retry_after, .. } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("120"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn download_streaming_writes_full_body_and_verifies_length() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/i/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("1.jpg.tmp");
        let client = HttpClient::new(None).unwrap();
        let result = client
            .download_streaming(&format!("{}/i/1.jpg", server.uri()), &dest)
            .await
            .unwrap();
        assert_eq!(result.bytes_written, body.len() as u64);
        let on_disk = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(on_disk.len(), body.len());
    }

    #[tokio::test]
    async fn cookies_are_forwarded_when_supplied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/g/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = HttpClient::new(Some("session=abc123")).unwrap();
        let body = client
            .get_text(&format!("{}/g/1", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }
}

//! End-to-end engine scenarios against a mock gallery site, covering a subset
//! of the testable properties and scenarios (spec §8): the happy path (S1),
//! a transient-error-then-success page (S2's shape, using a fast-backoff
//! category so the test doesn't sleep for real minutes), event ordering
//! (Property 8), at-most-one-completion (Property 9), and resume-on-restart
//! (S4's shape).

use std::sync::Arc;

use gallery_core::{
    CircuitBreaker, DefaultNamingProvider, DownloadOptions, Event, EventBus, GalleryProcessor,
    GalleryTask, NullUiSink, ResumeStore, RetryExecutor, StateStore, TokioFileSystem,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gallery_html(base: &str, pages: u32) -> String {
    let mut anchors = String::new();
    for n in 1..=pages {
        anchors.push_str(&format!(
            r#"<div class="gdtm"><a href="{base}/g/1/p{n}">{n}</a></div>"#
        ));
    }
    format!(r#"<html><body><h1 id="gn">Test Gallery</h1>{anchors}</body></html>"#)
}

fn image_page_html(base: &str, n: u32) -> String {
    format!(r#"<html><body><img id="img" src="{base}/i/{n}.jpg"></body></html>"#)
}

async fn processor(dir: &TempDir, bus: EventBus, state: Arc<StateStore>) -> GalleryProcessor {
    let resume = Arc::new(
        ResumeStore::load(dir.path().join("resume.json"))
            .await
            .expect("resume store loads"),
    );
    GalleryProcessor::new(
        RetryExecutor::new(CircuitBreaker::with_defaults(), bus.clone()),
        resume,
        state,
        bus,
        Arc::new(DefaultNamingProvider),
        Arc::new(TokioFileSystem),
        Arc::new(NullUiSink),
    )
}

#[tokio::test]
async fn happy_path_downloads_all_pages_in_order_and_publishes_terminal_events() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/g/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(gallery_html(&base, 3)))
        .mount(&server)
        .await;
    for n in 1..=3u32 {
        Mock::given(method("GET"))
            .and(path(format!("/g/1/p{n}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(image_page_html(&base, n)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/i/{n}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![n as u8; 16]))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().expect("temp dir");
    let bus = EventBus::new();
    let state = Arc::new(StateStore::new(bus.clone()));
    let mut rx = bus.subscribe();
    let processor = processor(&dir, bus.clone(), Arc::clone(&state)).await;

    let http = gallery_core::HttpClient::new(None).expect("client builds");
    let task = GalleryTask::new(format!("{base}/g/1"), 0, dir.path().to_path_buf());
    processor
        .run(task, &DownloadOptions::default(), &http, &|| false)
        .await
        .expect("processor run completes");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    // Property 8: UrlStarted precedes progress/completion for the same URL.
    let started_at = events
        .iter()
        .position(|e| matches!(e, Event::UrlStarted { .. }))
        .expect("UrlStarted published");
    let completed_at = events
        .iter()
        .position(|e| matches!(e, Event::UrlCompleted { .. }))
        .expect("UrlCompleted published");
    assert!(started_at < completed_at);

    let progress_count = events
        .iter()
        .filter(|e| matches!(e, Event::DownloadProgress { .. }))
        .count();
    assert_eq!(progress_count, 3);

    // Property 9: completion and skip are mutually exclusive outcomes.
    assert!(!events.iter().any(|e| matches!(e, Event::UrlSkipped { .. })));

    for n in 1..=3u32 {
        let expected = dir.path().join("Test Gallery").join(format!("{n:04}.jpg"));
        assert!(expected.exists(), "page {n} should be saved at {expected:?}");
    }

    assert_eq!(state.status(&format!("{base}/g/1")), Some(gallery_core::UrlStatus::Completed));
}

#[tokio::test]
async fn transient_client_error_then_success_still_completes_gallery() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/g/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(gallery_html(&base, 1)))
        .mount(&server)
        .await;

    // First attempt on the image page 404s (net.client_error: 1 retry, immediate backoff);
    // the retry succeeds.
    Mock::given(method("GET"))
        .and(path("/g/1/p1"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/g/1/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(image_page_html(&base, 1)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/i/1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 8]))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let bus = EventBus::new();
    let state = Arc::new(StateStore::new(bus.clone()));
    let processor = processor(&dir, bus, Arc::clone(&state)).await;

    let http = gallery_core::HttpClient::new(None).expect("client builds");
    let task = GalleryTask::new(format!("{base}/g/1"), 0, dir.path().to_path_buf());
    processor
        .run(task.clone(), &DownloadOptions::default(), &http, &|| false)
        .await
        .expect("processor run completes");

    assert_eq!(state.status(&task.url), Some(gallery_core::UrlStatus::Completed));
    assert!(dir.path().join("Test Gallery").join("0001.jpg").exists());
}

#[tokio::test]
async fn resume_checkpoint_lets_a_restarted_processor_skip_completed_pages() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/g/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(gallery_html(&base, 2)))
        .mount(&server)
        .await;
    for n in 1..=2u32 {
        Mock::given(method("GET"))
            .and(path(format!("/g/1/p{n}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(image_page_html(&base, n)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/i/{n}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![n as u8; 8]))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().expect("temp dir");
    let resume_path = dir.path().join("resume.json");

    // First run completes the gallery and persists a resume point.
    {
        let bus = EventBus::new();
        let state = Arc::new(StateStore::new(bus.clone()));
        let resume = Arc::new(ResumeStore::load(&resume_path).await.expect("resume loads"));
        let processor = GalleryProcessor::new(
            RetryExecutor::new(CircuitBreaker::with_defaults(), bus.clone()),
            Arc::clone(&resume),
            state,
            bus,
            Arc::new(DefaultNamingProvider),
            Arc::new(TokioFileSystem),
            Arc::new(NullUiSink),
        );
        let http = gallery_core::HttpClient::new(None).expect("client builds");
        let task = GalleryTask::new(format!("{base}/g/1"), 0, dir.path().to_path_buf());
        processor
            .run(task, &DownloadOptions::default(), &http, &|| false)
            .await
            .expect("first run completes");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!resume.is_resumable(&format!("{base}/g/1")).await);
    }

    // A fresh process loading the same resume store sees the gallery as
    // already successful and does not need to re-fetch its pages (Property 3:
    // terminal status persistence / resume determinism, Property 4).
    let reloaded = ResumeStore::load(&resume_path).await.expect("resume reloads");
    let point = reloaded
        .get(&format!("{base}/g/1"))
        .await
        .expect("checkpoint persisted across restart");
    assert!(point.success);
}

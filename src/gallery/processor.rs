//! Gallery processor (C4, §4.4): the single-threaded-per-task procedure that
//! drives one [`GalleryTask`] from its first metadata fetch to its last
//! page, checkpointing into the resume store as it goes.

use std::path::PathBuf;
use std::sync::Arc;

use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::category::{FinalAction, Stage};
use crate::config::{DownloadOptions, DuplicatePolicy};
use crate::error::DownloadError;
use crate::events::{Event, EventBus};
use crate::http::HttpClient;
use crate::image::ImageSaver;
use crate::resume::{DownloadRangeInfo, ResumePoint, ResumeStore, Reason, SubStage};
use crate::retry::{FailureReason, Outcome, PauseSignal, RetryExecutor, log_final_failure};
use crate::session::{SessionAction, SessionMachine};
use crate::state::StateStore;
use crate::traits::{FileSystem, NamingProvider, UiSink};

use super::types::{DownloadRange, GalleryMetadata, GalleryTask, ImagePageRef, UrlStatus};

/// What the processor loop does after one page terminates (§4.4's
/// failure-action handling table plus the implicit "keep going" success
/// path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopOutcome {
    Continue,
    SkipUrl,
    Pause,
    Abort,
    Manual,
}

/// Drives one gallery through the full fetch/download/checkpoint procedure.
pub struct GalleryProcessor {
    executor: RetryExecutor,
    resume: Arc<ResumeStore>,
    state: Arc<StateStore>,
    bus: EventBus,
    naming: Arc<dyn NamingProvider>,
    fs: Arc<dyn FileSystem>,
    ui: Arc<dyn UiSink>,
}

impl GalleryProcessor {
    #[must_use]
    pub fn new(
        executor: RetryExecutor,
        resume: Arc<ResumeStore>,
        state: Arc<StateStore>,
        bus: EventBus,
        naming: Arc<dyn NamingProvider>,
        fs: Arc<dyn FileSystem>,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        Self {
            executor,
            resume,
            state,
            bus,
            naming,
            fs,
            ui,
        }
    }

    /// Runs the full §4.4 procedure for `task`. Returns once the gallery
    /// reaches a terminal `UrlStatus` (`completed`, `skipped`, `error`) or a
    /// pause/manual-intervention point.
    ///
    /// # Errors
    /// Returns [`DownloadError`] only for failures the caller cannot recover
    /// from at this level (e.g. the gallery metadata fetch itself being
    /// unretriable); per-page failures are absorbed into the loop per the
    /// failure-action table and never propagate here.
    pub async fn run(
        &self,
        mut task: GalleryTask,
        options: &DownloadOptions,
        http: &HttpClient,
        pause: &impl PauseSignal,
    ) -> Result<(), DownloadError> {
        let mut session = SessionMachine::new(task.url.clone());
        if let Err(rejected) = session.apply(SessionAction::Start, &self.bus).await {
            warn!(url = %task.url, ?rejected, "unexpected rejection entering initializing state");
        }
        self.state.set_status(&task.url, UrlStatus::Downloading);
        self.bus.publish(Event::UrlStarted {
            url: task.url.clone(),
        });

        // Step 1 + 2: metadata fetch, wrapped in the retry executor (stage=metadata).
        let metadata = match self
            .executor
            .execute(&task.url, task.user_max_retries, pause, || {
                fetch_gallery_metadata(http, &task.url)
            })
            .await
        {
            Outcome::Success { value, .. } => value,
            Outcome::Failure(failure) => {
                log_final_failure(&task.url, &failure);
                let _ = session.apply(SessionAction::Error, &self.bus).await;
                self.state.set_status(&task.url, UrlStatus::Error);
                self.bus.publish(Event::DownloadError {
                    url: task.url.clone(),
                    category: failure.category,
                    severity: crate::category::severity_for(failure.category, 1, Stage::Metadata, 0),
                    message: "failed to fetch gallery metadata".to_string(),
                });
                return Ok(());
            }
        };

        if let Err(rejected) = session.apply(SessionAction::Start, &self.bus).await {
            warn!(url = %task.url, ?rejected, "unexpected rejection entering downloading state");
        }

        // Step 1 (folder resolution; needs title/artist from metadata to render).
        let save_folder = self
            .resolve_save_folder(&task.save_folder, &metadata, options.duplicate_folder_policy)
            .await?;
        task.save_folder = save_folder.clone();

        // Step 3: apply download range.
        let range = task.applied_range.unwrap_or(DownloadRange {
            start: 1,
            end: metadata.total_pages.max(1),
        });
        self.state.set_range(&task.url, range);

        let pages = self.build_page_list(&metadata, range, &save_folder);

        // Step 4: resume translation.
        let existing = self.resume.get(&task.url).await;
        let resume_from_relative = self.translate_resume_point(existing.as_ref(), range);

        let total = pages.len() as u32;
        let image_saver = ImageSaver::new(http, self.fs.as_ref());

        // Step 5: iterate pages.
        for page in pages.into_iter().filter(|p| p.relative_page >= resume_from_relative) {
            let checkpoint = ResumePoint {
                url: task.url.clone(),
                stage: Stage::ImageFetch,
                sub_stage: SubStage::Before,
                absolute_page_number: Some(page.absolute_page),
                relative_page: Some(page.relative_page),
                download_range_info: Some(range_info(range, page.relative_page, total, page.absolute_page)),
                save_folder: save_folder.clone(),
                gallery_metadata: Some(metadata.clone()),
                stage_data: stage_data(&page),
                retry_count: 0,
                reason: Reason::Progress,
                timestamp: 0,
                success: false,
            };
            self.resume.update(checkpoint).await;

            let filename = self
                .naming
                .render_image_filename(page.relative_page, &page.image_page_url);

            let outcome = self
                .executor
                .execute(&page.image_page_url, task.user_max_retries, pause, || {
                    image_saver.fetch_and_save(
                        &page.image_page_url,
                        &save_folder,
                        &filename,
                        options.duplicate_file_policy,
                    )
                })
                .await;

            match outcome {
                Outcome::Success { .. } => {
                    self.mark_page_success(&task.url, &page, total, &metadata.title, &save_folder, &mut session)
                        .await;
                }
                Outcome::Failure(failure) => {
                    log_final_failure(&page.image_page_url, &failure);

                    let needs_fallback = matches!(
                        failure.reason,
                        FailureReason::FallbackNeeded
                            | FailureReason::FallbackEarly
                            | FailureReason::SeleniumImmediate
                    );

                    let loop_outcome = if needs_fallback {
                        match self
                            .attempt_fallback(http, &page, &save_folder, &filename, options)
                            .await
                        {
                            Ok(()) => {
                                self.mark_page_success(
                                    &task.url,
                                    &page,
                                    total,
                                    &metadata.title,
                                    &save_folder,
                                    &mut session,
                                )
                                .await;
                                LoopOutcome::Continue
                            }
                            Err(fallback_error) => {
                                warn!(
                                    url = %page.image_page_url,
                                    %fallback_error,
                                    "headless-browser fallback also failed"
                                );
                                self.handle_failure(&failure.category.final_action())
                            }
                        }
                    } else {
                        self.handle_failure(&failure.action)
                    };

                    match loop_outcome {
                        LoopOutcome::Continue => continue,
                        LoopOutcome::SkipUrl => {
                            self.bus.publish(Event::UrlSkipped {
                                url: task.url.clone(),
                                reason: format!("{:?}", failure.category),
                            });
                            return Ok(());
                        }
                        LoopOutcome::Pause => {
                            let mut checkpoint = self.resume.get(&task.url).await.unwrap_or_else(|| {
                                ResumePoint::new(&task.url, Stage::ImageFetch, save_folder.clone(), 0)
                            });
                            checkpoint.reason = Reason::Pause;
                            self.resume.update(checkpoint).await;
                            let _ = session.apply(SessionAction::Pause, &self.bus).await;
                            self.state.set_status(&task.url, UrlStatus::Paused);
                            self.bus.publish(Event::DownloadPaused { url: task.url.clone() });
                            return Ok(());
                        }
                        LoopOutcome::Abort => {
                            self.state.request_stop();
                            let _ = session.apply(SessionAction::Abort, &self.bus).await;
                            self.state.set_status(&task.url, UrlStatus::Error);
                            self.bus.publish(Event::DownloadError {
                                url: task.url.clone(),
                                category: failure.category,
                                severity: crate::category::Severity::Critical,
                                message: "aborted".to_string(),
                            });
                            return Ok(());
                        }
                        LoopOutcome::Manual => {
                            let _ = session.apply(SessionAction::Pause, &self.bus).await;
                            self.state.set_status(&task.url, UrlStatus::Paused);
                            self.ui.post_log(
                                crate::category::Severity::High,
                                "manual intervention required",
                            );
                            return Ok(());
                        }
                    }
                }
            }
        }

        // Step 6.
        self.resume.mark_success(&task.url).await;
        self.state.set_status(&task.url, UrlStatus::Completed);
        self.bus.publish(Event::UrlCompleted { url: task.url.clone() });
        info!(url = %task.url, "gallery completed");
        Ok(())
    }

    async fn resolve_save_folder(
        &self,
        base_dir: &std::path::Path,
        metadata: &GalleryMetadata,
        policy: DuplicatePolicy,
    ) -> Result<PathBuf, DownloadError> {
        let base = base_dir.join(
            self.naming
                .render_gallery_folder(&metadata.title, metadata.artist.as_deref()),
        );
        let exists = self.fs.exists(&base).await;
        let resolved = if exists {
            match policy {
                DuplicatePolicy::Skip | DuplicatePolicy::Overwrite => base,
                DuplicatePolicy::Rename => resolve_unique_dir(&base),
            }
        } else {
            base
        };
        self.fs
            .create_dir_all(&resolved)
            .await
            .map_err(|source| DownloadError::io(resolved.clone(), source))?;
        Ok(resolved)
    }

    fn build_page_list(
        &self,
        metadata: &GalleryMetadata,
        range: DownloadRange,
        save_folder: &std::path::Path,
    ) -> Vec<ImagePageRef> {
        metadata
            .page_urls
            .iter()
            .enumerate()
            .map(|(index, url)| (index as u32 + 1, url))
            .filter(|(absolute_page, _)| *absolute_page >= range.start && *absolute_page <= range.end)
            .map(|(absolute_page, url)| ImagePageRef {
                relative_page: range.relative_of(absolute_page).unwrap_or(1),
                absolute_page,
                image_page_url: url.clone(),
                target_path: save_folder.join(format!("{absolute_page:04}")),
            })
            .collect()
    }

    /// Step 4 (§4.4): recompute where to resume given a stored checkpoint and
    /// the range currently in effect.
    fn translate_resume_point(&self, existing: Option<&ResumePoint>, range: DownloadRange) -> u32 {
        let Some(point) = existing else {
            return 1;
        };
        if point.success {
            return u32::MAX;
        }
        match (&point.download_range_info, point.absolute_page_number) {
            (Some(info), Some(absolute)) if info.start != range.start || info.end != range.end => {
                range.relative_of(absolute).unwrap_or(1).clamp(1, range.total())
            }
            _ => point.relative_page.unwrap_or(1),
        }
    }

    /// Records a page's bookkeeping once it has been saved, whether that came
    /// from the primary fetch or the headless-browser fallback.
    async fn mark_page_success(
        &self,
        url: &str,
        page: &ImagePageRef,
        total: u32,
        title: &str,
        save_folder: &std::path::Path,
        session: &mut SessionMachine,
    ) {
        self.state.update_progress(url, page.relative_page, total, title);
        let mut after = self.resume.get(url).await.unwrap_or_else(|| {
            ResumePoint::new(url, Stage::ImageFetch, save_folder.to_path_buf(), 0)
        });
        after.sub_stage = SubStage::After;
        after.relative_page = Some(page.relative_page);
        self.resume.update(after).await;

        if page.relative_page == total {
            let _ = session.apply(SessionAction::Complete, &self.bus).await;
        }
    }

    /// Runs the headless-browser fallback (C6) for one page, once the retry
    /// executor has decided the category and retry count call for it (§4.4,
    /// §4.6).
    async fn attempt_fallback(
        &self,
        http: &HttpClient,
        page: &ImagePageRef,
        save_folder: &std::path::Path,
        filename: &str,
        options: &DownloadOptions,
    ) -> Result<(), DownloadError> {
        crate::fallback::FallbackExecutor::new(http, self.fs.as_ref())
            .fetch_and_save(&page.image_page_url, save_folder, filename, options.duplicate_file_policy)
            .await
            .map(|_| ())
    }

    /// Maps a terminal `Failure` action to the §4.4 failure-action table.
    fn handle_failure(&self, action: &FinalAction) -> LoopOutcome {
        match action {
            FinalAction::Continue | FinalAction::SkipImage => LoopOutcome::Continue,
            FinalAction::SkipUrl => LoopOutcome::SkipUrl,
            FinalAction::Pause => LoopOutcome::Pause,
            FinalAction::Abort => LoopOutcome::Abort,
            FinalAction::Manual => LoopOutcome::Manual,
        }
    }
}

fn range_info(range: DownloadRange, relative_page: u32, relative_total: u32, absolute_page: u32) -> DownloadRangeInfo {
    DownloadRangeInfo {
        enabled: true,
        start: range.start,
        end: range.end,
        relative_page,
        relative_total,
        absolute_page,
    }
}

fn stage_data(page: &ImagePageRef) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    map.insert("image_page_url".to_string(), page.image_page_url.clone());
    map.insert("target_path".to_string(), page.target_path.display().to_string());
    map
}

fn resolve_unique_dir(base: &std::path::Path) -> PathBuf {
    let parent = base.parent().unwrap_or_else(|| std::path::Path::new("."));
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gallery".to_string());
    for n in 1..1000 {
        let candidate = parent.join(format!("{name}_{n}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    parent.join(name)
}

/// Fetches and parses gallery metadata (§4.4 step 2): title, artist, and the
/// ordered list of per-page image-page URLs.
async fn fetch_gallery_metadata(http: &HttpClient, url: &str) -> Result<GalleryMetadata, DownloadError> {
    let html = http.get_text(url).await?;
    parse_gallery_metadata(url, &html)
}

fn parse_gallery_metadata(url: &str, html: &str) -> Result<GalleryMetadata, DownloadError> {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("h1#gn, h1.gallery-title, h1").expect("static selector is valid");
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .ok_or_else(|| DownloadError::parse("gallery metadata (title)", url))?;

    let artist_selector = Selector::parse("[data-artist], .artist a").expect("static selector is valid");
    let artist = document
        .select(&artist_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let page_selector = Selector::parse(".gdtm a, .itg a, a.gallery-page").expect("static selector is valid");
    let page_urls: Vec<String> = document
        .select(&page_selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::to_string)
        .collect();

    if page_urls.is_empty() {
        return Err(DownloadError::parse("gallery metadata (page list)", url));
    }

    Ok(GalleryMetadata {
        title,
        artist,
        total_pages: page_urls.len() as u32,
        page_urls,
    })
}

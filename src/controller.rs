//! Download Job Controller
//!
//! Owns the single tracked download job: submission, progress polling, stall
//! detection, cancellation, artifact retrieval and the history mutations that
//! follow. Also runs the one-shot transcript/summary/sentiment requests.
//!
//! The job and the history share one lock so a state change and its persisted
//! write are never interleaved with another mutation. The lock is never held
//! across progress/cancel/artifact calls; results are applied only after
//! re-checking that the same job is still being tracked.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::{Artifact, JobApi, RemoteStatus, StartJobRequest};
use crate::error::{ApiError, ClientError, Result, ValidationError};
use crate::events::{self, helpers, Banner, ClientEvent};
use crate::history::{History, HistoryStore};
use crate::models::{DownloadJob, JobStatus, SentimentData, VideoEntry};
use crate::url_utils;

/// Timing and output configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub stall_timeout: Duration,
    pub download_folder: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(30),
            download_folder: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// Result of a single progress poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// Still downloading.
    Progress { percent: u8 },
    /// Artifact retrieved and written.
    Completed { job_id: String, path: PathBuf },
    /// Terminal failure; the controller is idle again.
    Failed(ClientError),
    /// No downloading job with that id; nothing was done.
    Inactive,
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Completed { .. } | PollOutcome::Failed(_))
    }
}

struct ControllerState<S: HistoryStore> {
    job: Option<DownloadJob>,
    history: History<S>,
}

/// The recurring poll task currently running, if any.
struct Poller {
    job_id: String,
    generation: u64,
    cancel_tx: broadcast::Sender<()>,
}

pub struct DownloadController<A: JobApi, S: HistoryStore> {
    config: ControllerConfig,
    api: Arc<A>,
    state: Mutex<ControllerState<S>>,
    banner: Mutex<Option<Banner>>,
    event_tx: mpsc::Sender<ClientEvent>,
    active_poller: Mutex<Option<Poller>>,
    poller_generation: AtomicU64,
}

impl<A: JobApi, S: HistoryStore> DownloadController<A, S> {
    /// Create a controller. No background task is spawned until
    /// `begin_tracking` is called.
    pub fn new(
        config: ControllerConfig,
        api: Arc<A>,
        history: History<S>,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            config,
            api,
            state: Mutex::new(ControllerState { job: None, history }),
            banner: Mutex::new(None),
            event_tx,
            active_poller: Mutex::new(None),
            poller_generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of the tracked job, if any.
    pub async fn current_job(&self) -> Option<DownloadJob> {
        self.state.lock().await.job.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.state
            .lock()
            .await
            .job
            .as_ref()
            .map(|j| j.status)
            .unwrap_or(JobStatus::Idle)
    }

    pub async fn history(&self) -> Vec<VideoEntry> {
        self.state.lock().await.history.entries().to_vec()
    }

    pub async fn find_entry(&self, video_id: &str) -> Option<VideoEntry> {
        self.state.lock().await.history.find(video_id).cloned()
    }

    pub async fn banner(&self) -> Option<Banner> {
        self.banner.lock().await.clone()
    }

    pub async fn dismiss_banner(&self) {
        *self.banner.lock().await = None;
    }

    pub async fn is_polling(&self) -> bool {
        self.active_poller.lock().await.is_some()
    }

    // ========================================================================
    // Download lifecycle
    // ========================================================================

    /// Ask the backend to start a download job and track it.
    ///
    /// Does not start polling; see `start_and_track`.
    pub async fn start_download(
        &self,
        source_url: &str,
        format_id: &str,
        video_id: &str,
    ) -> Result<DownloadJob> {
        if format_id.trim().is_empty() {
            return Err(self.reject(ValidationError::MissingFormat.into()).await);
        }
        if video_id.trim().is_empty() {
            return Err(self
                .reject(ValidationError::MissingVideoId(source_url.to_string()).into())
                .await);
        }

        // Held across the start call so two concurrent starts cannot both win.
        let mut state = self.state.lock().await;
        if let Some(job) = &state.job {
            let err = ValidationError::JobActive {
                job_id: job.job_id.clone(),
            };
            drop(state);
            return Err(self.reject(err.into()).await);
        }

        let title = state
            .history
            .find_matching(source_url, video_id)
            .map(|e| e.title.clone())
            .unwrap_or_default();
        let req = StartJobRequest {
            url: source_url.to_string(),
            video_format_id: format_id.to_string(),
            video_id: video_id.to_string(),
            title,
        };

        let job_id = match self.api.start_job(&req).await {
            Ok(id) => id,
            Err(e) => {
                drop(state);
                return Err(self
                    .reject(ClientError::backend("Error starting download", e))
                    .await);
            }
        };

        let job = DownloadJob::started(&job_id, source_url, video_id);
        state.job = Some(job.clone());

        let recorded = state.history.update_matching(source_url, video_id, |e| {
            e.download_id = Some(job_id.clone());
        });
        drop(state);
        if let Err(e) = recorded {
            // The backend job exists, so keep tracking it.
            self.reject(e.into()).await;
        }

        log::info!(
            "Started download {} for {} (format {})",
            job_id,
            source_url,
            format_id
        );
        events::emit(
            &self.event_tx,
            ClientEvent::DownloadStarted {
                job_id,
                video_id: video_id.to_string(),
            },
        )
        .await;

        Ok(job)
    }

    /// Start a download and begin polling it.
    pub async fn start_and_track(
        self: &Arc<Self>,
        source_url: &str,
        format_id: &str,
        video_id: &str,
    ) -> Result<DownloadJob>
    where
        A: 'static,
        S: 'static,
    {
        let job = self.start_download(source_url, format_id, video_id).await?;
        self.begin_tracking(&job.job_id).await;
        Ok(job)
    }

    /// Query the backend once and apply the result to the tracked job.
    pub async fn poll_once(&self, job_id: &str) -> PollOutcome {
        if !self.is_downloading(job_id).await {
            return PollOutcome::Inactive;
        }

        let result = self.api.progress(job_id).await;

        let mut state = self.state.lock().await;
        let Some(job) = state
            .job
            .as_mut()
            .filter(|j| j.job_id == job_id && j.is_downloading())
        else {
            return PollOutcome::Inactive;
        };

        let report = match result {
            Ok(report) => report,
            Err(ApiError::NotFound) => {
                state.job = None;
                drop(state);
                let err = ClientError::JobNotFound {
                    job_id: job_id.to_string(),
                };
                return self.fail_job(job_id, err).await;
            }
            Err(e) => {
                state.job = None;
                drop(state);
                let err = ClientError::backend("Error checking progress", e);
                return self.fail_job(job_id, err).await;
            }
        };

        match report.status {
            RemoteStatus::Error => {
                state.job = None;
                drop(state);
                let err = ClientError::JobFailed {
                    job_id: job_id.to_string(),
                    message: report
                        .error
                        .unwrap_or_else(|| "Download failed".to_string()),
                };
                self.fail_job(job_id, err).await
            }
            RemoteStatus::Completed => {
                // Concurrent polls now see the job as inactive.
                job.status = JobStatus::Completed;
                job.progress_percent = 100;
                let url = job.source_url.clone();
                let video_id = job.video_id.clone();
                let title = state
                    .history
                    .find_matching(&url, &video_id)
                    .map(|e| e.title.clone())
                    .unwrap_or_default();
                drop(state);
                self.complete(job_id, &url, &video_id, &title).await
            }
            RemoteStatus::Downloading => {
                let now = Instant::now();
                if report.progress > 0 && report.progress < 100 {
                    job.last_progress_at = now;
                }

                let idle_for = now.duration_since(job.last_progress_at);
                if idle_for >= self.config.stall_timeout && report.progress < 100 {
                    // Marked before the cancel call so no other poll repeats it.
                    job.status = JobStatus::Error;
                    drop(state);

                    log::warn!(
                        "Download {} stalled: no progress for {:?}",
                        job_id,
                        idle_for
                    );
                    if let Err(e) = self.api.cancel(job_id).await {
                        log::warn!("Cancel after stall failed for {}: {}", job_id, e);
                    }
                    self.forget_job(job_id).await;

                    let err = ClientError::Stall {
                        job_id: job_id.to_string(),
                    };
                    return self.fail_job(job_id, err).await;
                }

                job.progress_percent = report.progress;
                drop(state);

                events::emit(
                    &self.event_tx,
                    ClientEvent::DownloadProgress {
                        job_id: job_id.to_string(),
                        percent: report.progress,
                    },
                )
                .await;
                PollOutcome::Progress {
                    percent: report.progress,
                }
            }
        }
    }

    /// Cancel the tracked job on the backend and stop tracking it.
    ///
    /// Only a job that is still downloading can be canceled; once it is
    /// completing or failing the outcome is already decided.
    pub async fn cancel_download(&self) -> Result<()> {
        let tracked = self
            .state
            .lock()
            .await
            .job
            .as_ref()
            .filter(|j| j.is_downloading())
            .map(|j| j.job_id.clone());
        let Some(job_id) = tracked else {
            return Err(self.reject(ValidationError::NoActiveJob.into()).await);
        };

        match self.api.cancel(&job_id).await {
            Ok(()) => {
                if self.forget_downloading(&job_id).await {
                    self.stop_polling(&job_id).await;
                    log::info!("Canceled download {}", job_id);
                    events::emit(
                        &self.event_tx,
                        ClientEvent::DownloadCanceled {
                            job_id: job_id.clone(),
                        },
                    )
                    .await;
                    events::emit(&self.event_tx, helpers::info("Download canceled")).await;
                } else {
                    log::info!("Download {} finished before the cancel took effect", job_id);
                }
                Ok(())
            }
            Err(ApiError::NotFound) => {
                if !self.forget_downloading(&job_id).await {
                    return Ok(());
                }
                let err = ClientError::JobNotFound {
                    job_id: job_id.clone(),
                };
                match self.fail_job(&job_id, err).await {
                    PollOutcome::Failed(err) => Err(err),
                    _ => Ok(()),
                }
            }
            Err(e) => {
                // The job may still be running; keep tracking it.
                Err(self
                    .reject(ClientError::backend("Error canceling download", e))
                    .await)
            }
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Spawn the recurring poll task for `job_id`, replacing any existing one.
    ///
    /// First poll after `initial_delay`, then every `poll_interval`, until a
    /// terminal outcome, cancellation or `shutdown`.
    pub async fn begin_tracking(self: &Arc<Self>, job_id: &str)
    where
        A: 'static,
        S: 'static,
    {
        let (cancel_tx, mut cancel_rx) = broadcast::channel::<()>(1);
        let generation = self.poller_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.active_poller.lock().await.replace(Poller {
            job_id: job_id.to_string(),
            generation,
            cancel_tx,
        });
        if let Some(prev) = previous {
            log::debug!("Replacing poller for {}", prev.job_id);
            let _ = prev.cancel_tx.send(());
        }

        let this = Arc::clone(self);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let first = Instant::now() + this.config.initial_delay;
            let mut ticker = tokio::time::interval_at(first, this.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.recv() => {
                        log::debug!("Poller for {} received stop signal", job_id);
                        break;
                    }
                    _ = ticker.tick() => {
                        match this.poll_once(&job_id).await {
                            PollOutcome::Progress { .. } => {}
                            outcome => {
                                log::debug!("Poller for {} finished: {:?}", job_id, outcome);
                                break;
                            }
                        }
                    }
                }
            }

            this.clear_poller(generation).await;
        });
    }

    /// Stop any polling task. The tracked job, if any, is left alone.
    pub async fn shutdown(&self) {
        if let Some(poller) = self.active_poller.lock().await.take() {
            log::info!("Stopping poller for {}", poller.job_id);
            let _ = poller.cancel_tx.send(());
        }
    }

    async fn stop_polling(&self, job_id: &str) {
        let mut active = self.active_poller.lock().await;
        if active.as_ref().is_some_and(|p| p.job_id == job_id) {
            if let Some(poller) = active.take() {
                let _ = poller.cancel_tx.send(());
            }
        }
    }

    async fn clear_poller(&self, generation: u64) {
        let mut active = self.active_poller.lock().await;
        if active.as_ref().is_some_and(|p| p.generation == generation) {
            *active = None;
        }
    }

    // ========================================================================
    // One-shot operations
    // ========================================================================

    /// Fetch metadata for `url` and add it to the front of the history.
    pub async fn fetch_info(&self, url: &str) -> Result<VideoEntry> {
        let Some(normalized) = url_utils::normalize_http_url(url) else {
            return Err(self
                .reject(ValidationError::InvalidUrl(url.to_string()).into())
                .await);
        };

        let local_id = url_utils::extract_video_id(&normalized);
        if let Some(id) = &local_id {
            if self.state.lock().await.history.find(id).is_some() {
                let err = ValidationError::DuplicateVideo {
                    video_id: id.clone(),
                };
                return Err(self.reject(err.into()).await);
            }
        }

        let info = match self.api.info(&normalized).await {
            Ok(info) => info,
            Err(e) => {
                return Err(self
                    .reject(ClientError::backend("Error fetching video info", e))
                    .await)
            }
        };

        let Some(video_id) = info.video_id.clone().or(local_id) else {
            return Err(self
                .reject(ValidationError::MissingVideoId(normalized).into())
                .await);
        };

        let mut entry = VideoEntry::new(&video_id, &normalized, &info.title);
        entry.thumbnail = info.thumbnail;
        entry.duration = info.duration;
        entry.video_formats = info.video_formats;

        let len = {
            let mut state = self.state.lock().await;
            if let Err(e) = state.history.add(entry.clone()) {
                drop(state);
                return Err(self.reject(e.into()).await);
            }
            state.history.len()
        };

        log::info!("Added {} ({}) to history", entry.video_id, entry.title);
        events::emit(
            &self.event_tx,
            ClientEvent::MetadataReady {
                video_id: entry.video_id.clone(),
                title: entry.title.clone(),
            },
        )
        .await;
        events::emit(&self.event_tx, ClientEvent::HistoryChanged { len }).await;

        Ok(entry)
    }

    /// Generate a transcript for `url` and store it on the matching entry.
    pub async fn generate_transcript(&self, url: &str) -> Result<String> {
        let url = self.normalize_or_reject(url).await?;

        let result = match self.api.transcript(&url).await {
            Ok(r) => r,
            Err(e) => {
                return Err(self
                    .reject(ClientError::backend("Error generating transcript", e))
                    .await)
            }
        };

        let video_id = result
            .video_id
            .clone()
            .or_else(|| url_utils::extract_video_id(&url))
            .unwrap_or_default();
        let transcript = result.transcript;

        let updated = self
            .update_entry(&url, &video_id, |e| e.set_transcript(transcript.clone()))
            .await?;
        let video_id = updated.map(|e| e.video_id).unwrap_or(video_id);

        events::emit(&self.event_tx, ClientEvent::TranscriptReady { video_id }).await;
        events::emit(&self.event_tx, helpers::success("Transcript generated")).await;
        Ok(transcript)
    }

    /// Summarize a video whose transcript was already generated.
    pub async fn generate_summary(&self, video_id: &str) -> Result<String> {
        let has_transcript = self
            .state
            .lock()
            .await
            .history
            .find(video_id)
            .is_some_and(|e| e.has_transcript);
        if !has_transcript {
            let err = ValidationError::TranscriptRequired {
                video_id: video_id.to_string(),
            };
            return Err(self.reject(err.into()).await);
        }

        let result = match self.api.summary(video_id).await {
            Ok(r) => r,
            Err(e) => {
                return Err(self
                    .reject(ClientError::backend("Error generating summary", e))
                    .await)
            }
        };
        let summary = result.summary;

        self.update_entry("", video_id, |e| e.set_summary(summary.clone()))
            .await?;

        events::emit(
            &self.event_tx,
            ClientEvent::SummaryReady {
                video_id: video_id.to_string(),
            },
        )
        .await;
        events::emit(&self.event_tx, helpers::success("Summary generated")).await;
        Ok(summary)
    }

    /// Run comment sentiment analysis for `url`.
    pub async fn analyze_sentiment(&self, url: &str) -> Result<SentimentData> {
        let url = self.normalize_or_reject(url).await?;

        let mut data = match self.api.sentiment(&url).await {
            Ok(d) => d,
            Err(e) => {
                return Err(self
                    .reject(ClientError::backend("Error analyzing sentiment", e))
                    .await)
            }
        };

        let updated = self
            .update_entry(&url, &data.video_id.clone(), |e| {
                if data.video_id.is_empty() {
                    data.video_id = e.video_id.clone();
                }
                e.set_sentiment(data.clone());
            })
            .await?;
        if data.video_id.is_empty() {
            data.video_id = updated
                .map(|e| e.video_id)
                .or_else(|| url_utils::extract_video_id(&url))
                .unwrap_or_default();
        }

        events::emit(
            &self.event_tx,
            ClientEvent::SentimentReady {
                video_id: data.video_id.clone(),
                total_analyzed: data.sentiment_summary.total_analyzed,
            },
        )
        .await;
        events::emit(&self.event_tx, helpers::success("Sentiment analysis complete")).await;
        Ok(data)
    }

    /// Remove the history entry at `index`.
    pub async fn remove_history(&self, index: usize) -> Result<VideoEntry> {
        let (removed, len) = {
            let mut state = self.state.lock().await;
            match state.history.remove(index) {
                Ok(removed) => (removed, state.history.len()),
                Err(e) => {
                    drop(state);
                    return Err(self.reject(e.into()).await);
                }
            }
        };

        log::info!("Removed {} from history", removed.video_id);
        events::emit(&self.event_tx, ClientEvent::HistoryChanged { len }).await;
        Ok(removed)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn is_downloading(&self, job_id: &str) -> bool {
        self.state
            .lock()
            .await
            .job
            .as_ref()
            .is_some_and(|j| j.job_id == job_id && j.is_downloading())
    }

    /// Drop the tracked job if it is still `job_id`. Returns whether it was.
    async fn forget_job(&self, job_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.job.as_ref().is_some_and(|j| j.job_id == job_id) {
            state.job = None;
            true
        } else {
            false
        }
    }

    /// Drop the tracked job only if it is `job_id` and still downloading.
    async fn forget_downloading(&self, job_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state
            .job
            .as_ref()
            .is_some_and(|j| j.job_id == job_id && j.is_downloading())
        {
            state.job = None;
            true
        } else {
            false
        }
    }

    async fn complete(&self, job_id: &str, url: &str, video_id: &str, title: &str) -> PollOutcome {
        let written = match self.api.artifact(job_id).await {
            Ok(artifact) => self.write_artifact(title, artifact).await,
            Err(e) => Err(anyhow::Error::new(e)),
        };

        let path = match written {
            Ok(path) => path,
            Err(e) => {
                self.forget_job(job_id).await;
                let err = ClientError::ArtifactRetrieval {
                    job_id: job_id.to_string(),
                    message: format!("{:#}", e),
                };
                return self.fail_job(job_id, err).await;
            }
        };

        let marked = {
            let mut state = self.state.lock().await;
            if state.job.as_ref().is_some_and(|j| j.job_id == job_id) {
                state.job = None;
                let result = state
                    .history
                    .update_matching(url, video_id, |e| e.mark_downloaded(job_id));
                Some(result.map(|updated| updated.map(|_| state.history.len())))
            } else {
                None
            }
        };

        self.stop_polling(job_id).await;

        let Some(marked) = marked else {
            log::warn!(
                "Download {} stopped being tracked while saving; {} left in place",
                job_id,
                path.display()
            );
            return PollOutcome::Inactive;
        };
        let len = match marked {
            Ok(Some(len)) => Some(len),
            Ok(None) => {
                log::warn!("No history entry matches finished download {}", job_id);
                None
            }
            Err(e) => {
                self.reject(e.into()).await;
                None
            }
        };
        log::info!("Download {} saved to {}", job_id, path.display());

        if let Some(len) = len {
            events::emit(&self.event_tx, ClientEvent::HistoryChanged { len }).await;
        }
        events::emit(
            &self.event_tx,
            ClientEvent::DownloadCompleted {
                job_id: job_id.to_string(),
                path: path.clone(),
            },
        )
        .await;
        events::emit(&self.event_tx, helpers::success("Download completed")).await;

        PollOutcome::Completed {
            job_id: job_id.to_string(),
            path,
        }
    }

    async fn write_artifact(&self, title: &str, artifact: Artifact) -> anyhow::Result<PathBuf> {
        let folder = &self.config.download_folder;
        tokio::fs::create_dir_all(folder)
            .await
            .with_context(|| format!("create download folder: {}", folder.display()))?;

        let file_name = artifact_file_name(title, artifact.file_name.as_deref());
        let path = unique_path(folder, &file_name).await?;

        tokio::fs::write(&path, &artifact.bytes)
            .await
            .with_context(|| format!("write artifact: {}", path.display()))?;
        Ok(path)
    }

    /// Report a terminal job error: stop polling, raise the banner, notify.
    async fn fail_job(&self, job_id: &str, err: ClientError) -> PollOutcome {
        self.stop_polling(job_id).await;
        log::error!("Download {} failed: {}", job_id, err);

        let err = self.reject(err).await;
        events::emit(
            &self.event_tx,
            ClientEvent::DownloadFailed {
                job_id: job_id.to_string(),
                error_code: err.code(),
                user_message: err.to_string(),
            },
        )
        .await;
        PollOutcome::Failed(err)
    }

    /// Raise the banner and a transient error notice for `err`, then hand it back.
    async fn reject(&self, err: ClientError) -> ClientError {
        log::warn!("{}", err);
        *self.banner.lock().await = Some(Banner::new(err.code(), err.to_string()));
        events::emit(&self.event_tx, helpers::error(err.to_string())).await;
        err
    }

    async fn normalize_or_reject(&self, url: &str) -> Result<String> {
        match url_utils::normalize_http_url(url) {
            Some(u) => Ok(u),
            None => Err(self
                .reject(ValidationError::InvalidUrl(url.to_string()).into())
                .await),
        }
    }

    /// Update and persist the entry matching a one-shot result.
    ///
    /// A result with no matching entry is still returned to the caller but
    /// not stored.
    async fn update_entry<F>(&self, url: &str, video_id: &str, f: F) -> Result<Option<VideoEntry>>
    where
        F: FnOnce(&mut VideoEntry),
    {
        let result = self
            .state
            .lock()
            .await
            .history
            .update_matching(url, video_id, f);
        match result {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                log::warn!("No history entry for {} / {}; result not stored", url, video_id);
                Ok(None)
            }
            Err(e) => Err(self.reject(e.into()).await),
        }
    }
}

/// Name for a downloaded artifact: the backend's suggestion when given,
/// otherwise the video title, always sanitized.
fn artifact_file_name(title: &str, suggested: Option<&str>) -> String {
    let raw = match suggested {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ if !title.trim().is_empty() => format!("{}.mp4", title.trim()),
        _ => "video.mp4".to_string(),
    };
    let clean = sanitize_filename::sanitize(&raw);
    if clean.trim().is_empty() {
        "video.mp4".to_string()
    } else {
        clean
    }
}

/// `name`, or `name (1)`, `name (2)`... when the folder already has it.
async fn unique_path(folder: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    let candidate = folder.join(file_name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    for n in 1..1000 {
        let name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = folder.join(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    anyhow::bail!("no free file name for {} in {}", file_name, folder.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeJobApi;
    use crate::api::{ProgressReport, VideoInfo};
    use crate::events::ErrorCode;
    use crate::history::tests::FailingStore;
    use crate::history::MemoryHistoryStore;
    use crate::models::VideoFormat;
    use tokio::sync::Notify;

    type TestController = DownloadController<FakeJobApi, MemoryHistoryStore>;

    const URL: &str = "https://www.youtube.com/watch?v=abcDEF12345";
    const VID: &str = "abcDEF12345";

    struct Harness {
        controller: Arc<TestController>,
        rx: mpsc::Receiver<ClientEvent>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<ClientEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.rx.try_recv() {
                out.push(ev);
            }
            out
        }
    }

    fn entry() -> VideoEntry {
        let mut e = VideoEntry::new(VID, URL, "Test Video");
        e.video_formats = vec![VideoFormat {
            format_id: "22".to_string(),
            label: "720p".to_string(),
        }];
        e
    }

    fn harness(api: FakeJobApi, entries: Vec<VideoEntry>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            download_folder: dir.path().to_path_buf(),
            ..ControllerConfig::default()
        };
        let (tx, rx) = mpsc::channel(256);
        let history = History::open(MemoryHistoryStore::with_entries(entries)).unwrap();
        Harness {
            controller: Arc::new(DownloadController::new(config, Arc::new(api), history, tx)),
            rx,
            _dir: dir,
        }
    }

    fn calls(counter: &std::sync::atomic::AtomicUsize) -> usize {
        FakeJobApi::count(counter)
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_touching_job() {
        let api = FakeJobApi::new().with_job("abc").with_job("def");
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        let first = c.start_download(URL, "22", VID).await.unwrap();
        let err = c.start_download(URL, "22", VID).await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::JobActive { ref job_id }) if job_id == "abc"
        ));
        let job = c.current_job().await.unwrap();
        assert_eq!(job.job_id, first.job_id);
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(calls(&c.api().start_calls), 1);
    }

    #[tokio::test]
    async fn start_requires_format_and_records_job_id() {
        let h = harness(FakeJobApi::new().with_job("abc"), vec![entry()]);
        let c = &h.controller;

        let err = c.start_download(URL, "", VID).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::MissingFormat)
        ));
        assert_eq!(calls(&c.api().start_calls), 0);
        assert_eq!(c.status().await, JobStatus::Idle);

        c.start_download(URL, "22", VID).await.unwrap();
        let stored = c.find_entry(VID).await.unwrap();
        assert_eq!(stored.download_id.as_deref(), Some("abc"));
        assert!(!stored.downloaded);
    }

    #[tokio::test]
    async fn failed_start_creates_no_job() {
        let h = harness(FakeJobApi::new(), vec![entry()]);
        let c = &h.controller;

        let err = c.start_download(URL, "99", VID).await.unwrap_err();
        assert!(matches!(err, ClientError::BackendRequest { status: Some(400), .. }));
        assert!(c.current_job().await.is_none());
        assert_eq!(c.banner().await.unwrap().error_code, ErrorCode::BackendRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_progress_does_not_mask_stall_clock() {
        let api = FakeJobApi::new().with_job("abc").script(vec![
            Ok(ProgressReport::downloading(40)),
            Ok(ProgressReport::downloading(0)),
            Ok(ProgressReport::downloading(0)),
        ]);
        let mut h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_download(URL, "22", VID).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(matches!(
            c.poll_once("abc").await,
            PollOutcome::Progress { percent: 40 }
        ));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(matches!(
            c.poll_once("abc").await,
            PollOutcome::Progress { percent: 0 }
        ));

        // 31s since the last forward progress at 40%.
        tokio::time::advance(Duration::from_secs(11)).await;
        let outcome = c.poll_once("abc").await;
        assert!(matches!(outcome, PollOutcome::Failed(ClientError::Stall { .. })));

        assert_eq!(calls(&c.api().cancel_calls), 1);
        assert_eq!(c.status().await, JobStatus::Idle);
        assert_eq!(c.banner().await.unwrap().user_message, "Download stalled");

        // Nothing left to poll or cancel.
        assert!(matches!(c.poll_once("abc").await, PollOutcome::Inactive));
        assert_eq!(calls(&c.api().cancel_calls), 1);
        assert_eq!(calls(&c.api().progress_calls), 3);

        let stalls = h
            .drain()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    ClientEvent::DownloadFailed {
                        error_code: ErrorCode::Stalled,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(stalls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_progress_from_start_stalls_after_timeout() {
        let api = FakeJobApi::new().with_job("abc").script(vec![
            Ok(ProgressReport::downloading(0)),
            Ok(ProgressReport::downloading(0)),
        ]);
        let h = harness(api, vec![entry()]);
        let c = &h.controller;
        c.start_download(URL, "22", VID).await.unwrap();

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert!(matches!(c.poll_once("abc").await, PollOutcome::Progress { .. }));

        // Exactly the timeout since the start counts as stalled.
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(matches!(
            c.poll_once("abc").await,
            PollOutcome::Failed(ClientError::Stall { .. })
        ));
        assert_eq!(calls(&c.api().cancel_calls), 1);
    }

    #[tokio::test]
    async fn scenario_progress_then_completed() {
        let api = FakeJobApi::new().with_job("abc").script(vec![
            Ok(ProgressReport::downloading(40)),
            Ok(ProgressReport::completed()),
        ]);
        let mut h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_download(URL, "22", VID).await.unwrap();
        assert!(matches!(
            c.poll_once("abc").await,
            PollOutcome::Progress { percent: 40 }
        ));

        let path = match c.poll_once("abc").await {
            PollOutcome::Completed { job_id, path } => {
                assert_eq!(job_id, "abc");
                path
            }
            other => panic!("unexpected outcome: {other:?}"),
        };

        assert_eq!(std::fs::read(&path).unwrap(), b"video-bytes");
        assert_eq!(path.file_name().unwrap(), "Test Video.mp4");
        assert_eq!(calls(&c.api().artifact_calls), 1);
        assert_eq!(c.status().await, JobStatus::Idle);
        assert!(!c.is_polling().await);

        let stored = c.find_entry(VID).await.unwrap();
        assert!(stored.downloaded);
        assert_eq!(stored.download_id.as_deref(), Some("abc"));
        {
            let state = c.state.lock().await;
            assert!(state.history.store().entries[0].downloaded);
        }

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::DownloadCompleted { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ClientEvent::DownloadFailed { .. })));
    }

    #[tokio::test]
    async fn scenario_backend_error_shows_in_banner() {
        let api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Ok(ProgressReport::failed(Some("codec failure")))]);
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        let outcome = c.poll_once("abc").await;

        assert!(matches!(outcome, PollOutcome::Failed(ClientError::JobFailed { .. })));
        let banner = c.banner().await.unwrap();
        assert_eq!(banner.user_message, "codec failure");
        assert_eq!(banner.error_code, ErrorCode::JobFailed);
        assert_eq!(c.status().await, JobStatus::Idle);
        assert_eq!(calls(&c.api().artifact_calls), 0);
        assert!(!c.find_entry(VID).await.unwrap().downloaded);

        c.dismiss_banner().await;
        assert!(c.banner().await.is_none());
    }

    #[tokio::test]
    async fn backend_error_without_message_is_generic() {
        let api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Ok(ProgressReport::failed(None))]);
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        c.poll_once("abc").await;
        assert_eq!(c.banner().await.unwrap().user_message, "Download failed");
    }

    #[tokio::test]
    async fn concurrent_polls_complete_once() {
        let mut api = FakeJobApi::new().with_job("abc").script(vec![
            Ok(ProgressReport::completed()),
            Ok(ProgressReport::completed()),
        ]);
        api.yield_in_progress = true;
        let h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_download(URL, "22", VID).await.unwrap();
        let (a, b) = tokio::join!(c.poll_once("abc"), c.poll_once("abc"));

        let completed = [&a, &b]
            .iter()
            .filter(|o| matches!(o, PollOutcome::Completed { .. }))
            .count();
        assert_eq!(completed, 1, "outcomes: {a:?} / {b:?}");
        assert!([&a, &b].iter().any(|o| matches!(o, PollOutcome::Inactive)));
        assert_eq!(calls(&c.api().artifact_calls), 1);

        let state = c.state.lock().await;
        let downloaded = state
            .history
            .entries()
            .iter()
            .filter(|e| e.downloaded)
            .count();
        assert_eq!(downloaded, 1);
        assert_eq!(state.history.store().saves, 2);
    }

    #[tokio::test]
    async fn artifact_failure_is_distinct_and_terminal() {
        let api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Ok(ProgressReport::completed())]);
        *api.artifact_error.lock().unwrap() = Some(ApiError::Http {
            status: 500,
            message: "disk full".to_string(),
        });
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        let outcome = c.poll_once("abc").await;

        assert!(matches!(
            outcome,
            PollOutcome::Failed(ClientError::ArtifactRetrieval { .. })
        ));
        assert_eq!(c.status().await, JobStatus::Idle);
        assert!(!c.find_entry(VID).await.unwrap().downloaded);
        assert_eq!(
            c.banner().await.unwrap().error_code,
            ErrorCode::ArtifactRetrieval
        );
    }

    #[tokio::test]
    async fn poll_not_found_forgets_job() {
        let api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Err(ApiError::NotFound)]);
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        assert!(matches!(
            c.poll_once("abc").await,
            PollOutcome::Failed(ClientError::JobNotFound { .. })
        ));
        assert!(c.current_job().await.is_none());
    }

    #[tokio::test]
    async fn generic_poll_failure_also_clears_job() {
        let api = FakeJobApi::new().with_job("abc").script(vec![Err(ApiError::Http {
            status: 502,
            message: "bad gateway".to_string(),
        })]);
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        let outcome = c.poll_once("abc").await;

        match outcome {
            PollOutcome::Failed(ClientError::BackendRequest { status, message }) => {
                assert_eq!(status, Some(502));
                assert!(message.starts_with("Error checking progress"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(c.current_job().await.is_none());

        // Retryable: a new start is accepted.
        c.api()
            .start_ids
            .lock()
            .unwrap()
            .push_back(Ok("def".to_string()));
        assert_eq!(c.start_download(URL, "22", VID).await.unwrap().job_id, "def");
    }

    #[tokio::test]
    async fn poll_for_other_job_is_inactive() {
        let h = harness(FakeJobApi::new().with_job("abc"), vec![entry()]);
        let c = &h.controller;

        assert!(matches!(c.poll_once("abc").await, PollOutcome::Inactive));
        c.start_download(URL, "22", VID).await.unwrap();
        assert!(matches!(c.poll_once("zzz").await, PollOutcome::Inactive));
        assert_eq!(calls(&c.api().progress_calls), 0);
    }

    #[tokio::test]
    async fn cancel_resets_to_idle() {
        let mut h = harness(FakeJobApi::new().with_job("abc"), vec![entry()]);
        let c = h.controller.clone();

        c.start_download(URL, "22", VID).await.unwrap();
        c.cancel_download().await.unwrap();

        assert_eq!(c.status().await, JobStatus::Idle);
        assert_eq!(calls(&c.api().cancel_calls), 1);
        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::DownloadCanceled { job_id } if job_id == "abc")));
    }

    #[tokio::test]
    async fn cancel_while_saving_artifact_is_rejected() {
        let gate = Arc::new(Notify::new());
        let mut api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Ok(ProgressReport::completed())]);
        api.artifact_gate = Some(gate.clone());
        let mut h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_download(URL, "22", VID).await.unwrap();
        let poll = tokio::spawn({
            let c = c.clone();
            async move { c.poll_once("abc").await }
        });
        while calls(&c.api().artifact_calls) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(c.status().await, JobStatus::Completed);

        let err = c.cancel_download().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::NoActiveJob)
        ));
        assert_eq!(calls(&c.api().cancel_calls), 0);

        gate.notify_one();
        assert!(matches!(poll.await.unwrap(), PollOutcome::Completed { .. }));
        assert!(c.find_entry(VID).await.unwrap().downloaded);

        let events = h.drain();
        assert!(!events
            .iter()
            .any(|e| matches!(e, ClientEvent::DownloadCanceled { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::DownloadCompleted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_stall_sends_no_second_cancel() {
        let gate = Arc::new(Notify::new());
        let mut api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Ok(ProgressReport::downloading(0))]);
        api.cancel_gate = Some(gate.clone());
        let mut h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_download(URL, "22", VID).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let poll = tokio::spawn({
            let c = c.clone();
            async move { c.poll_once("abc").await }
        });
        while calls(&c.api().cancel_calls) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(c.status().await, JobStatus::Error);

        let err = c.cancel_download().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::NoActiveJob)
        ));

        gate.notify_one();
        assert!(matches!(
            poll.await.unwrap(),
            PollOutcome::Failed(ClientError::Stall { .. })
        ));
        assert_eq!(calls(&c.api().cancel_calls), 1);
        assert_eq!(c.status().await, JobStatus::Idle);
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, ClientEvent::DownloadCanceled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_running_poller() {
        let api = FakeJobApi::new().with_job("abc").script(vec![
            Ok(ProgressReport::downloading(10)),
            Ok(ProgressReport::downloading(20)),
        ]);
        let h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_and_track(URL, "22", VID).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(calls(&c.api().progress_calls), 1);

        c.cancel_download().await.unwrap();
        assert!(!c.is_polling().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls(&c.api().progress_calls), 1);
        assert_eq!(c.status().await, JobStatus::Idle);
    }

    #[tokio::test]
    async fn history_write_failure_raises_banner_but_keeps_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            download_folder: dir.path().to_path_buf(),
            ..ControllerConfig::default()
        };
        let (tx, _rx) = mpsc::channel(64);
        let history = History::open(FailingStore {
            entries: vec![entry()],
        })
        .unwrap();
        let c = DownloadController::new(
            config,
            Arc::new(FakeJobApi::new().with_job("abc")),
            history,
            tx,
        );

        let job = c.start_download(URL, "22", VID).await.unwrap();
        assert_eq!(job.job_id, "abc");
        assert_eq!(c.status().await, JobStatus::Downloading);
        assert_eq!(c.banner().await.unwrap().error_code, ErrorCode::Storage);
        assert!(c.find_entry(VID).await.unwrap().download_id.is_none());
    }

    #[tokio::test]
    async fn cancel_failure_keeps_job() {
        let api = FakeJobApi::new().with_job("abc");
        *api.cancel_error.lock().unwrap() = Some(ApiError::Unreachable("refused".to_string()));
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        let err = c.cancel_download().await.unwrap_err();

        assert!(matches!(err, ClientError::BackendRequest { .. }));
        assert_eq!(c.current_job().await.unwrap().job_id, "abc");
        assert!(c.banner().await.is_some());
    }

    #[tokio::test]
    async fn cancel_not_found_forgets_job() {
        let api = FakeJobApi::new().with_job("abc");
        *api.cancel_error.lock().unwrap() = Some(ApiError::NotFound);
        let h = harness(api, vec![entry()]);
        let c = &h.controller;

        c.start_download(URL, "22", VID).await.unwrap();
        let err = c.cancel_download().await.unwrap_err();

        assert!(matches!(err, ClientError::JobNotFound { .. }));
        assert!(c.current_job().await.is_none());
    }

    #[tokio::test]
    async fn cancel_without_job_is_rejected() {
        let h = harness(FakeJobApi::new(), vec![]);
        let err = h.controller.cancel_download().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::NoActiveJob)
        ));
        assert_eq!(calls(&h.controller.api().cancel_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tracking_follows_schedule_and_stops_on_completion() {
        let api = FakeJobApi::new().with_job("abc").script(vec![
            Ok(ProgressReport::downloading(10)),
            Ok(ProgressReport::downloading(50)),
            Ok(ProgressReport::completed()),
        ]);
        let mut h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_and_track(URL, "22", VID).await.unwrap();
        assert!(c.is_polling().await);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(calls(&c.api().progress_calls), 0);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(calls(&c.api().progress_calls), 1);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(calls(&c.api().progress_calls), 2);

        loop {
            match h.rx.recv().await {
                Some(ClientEvent::DownloadCompleted { .. }) => break,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls(&c.api().progress_calls), 3);
        assert!(!c.is_polling().await);
        assert_eq!(c.status().await, JobStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_polling() {
        let api = FakeJobApi::new()
            .with_job("abc")
            .script(vec![Ok(ProgressReport::downloading(10))]);
        let h = harness(api, vec![entry()]);
        let c = h.controller.clone();

        c.start_and_track(URL, "22", VID).await.unwrap();
        c.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls(&c.api().progress_calls), 0);
        assert!(!c.is_polling().await);
        assert_eq!(c.status().await, JobStatus::Downloading);
    }

    #[tokio::test]
    async fn fetch_info_prepends_and_rejects_duplicates() {
        let info = VideoInfo {
            video_id: None,
            title: "Fresh".to_string(),
            thumbnail: "https://img/1.jpg".to_string(),
            duration: Some(61),
            video_formats: vec![VideoFormat {
                format_id: "18".to_string(),
                label: "360p".to_string(),
            }],
        };
        let old = VideoEntry::new("oldVideo01", "https://youtu.be/oldVideo01", "Old");
        let h = harness(FakeJobApi::new().with_info(info), vec![old]);
        let c = &h.controller;

        let added = c.fetch_info("https://youtu.be/newVideo01#t=3").await.unwrap();
        assert_eq!(added.video_id, "newVideo01");
        assert_eq!(added.url, "https://youtu.be/newVideo01");
        assert!(added.offers_format("18"));

        let ids: Vec<_> = c.history().await.into_iter().map(|e| e.video_id).collect();
        assert_eq!(ids, vec!["newVideo01", "oldVideo01"]);

        let err = c.fetch_info("https://youtu.be/newVideo01").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::DuplicateVideo { .. })
        ));
        assert_eq!(c.history().await.len(), 2);
        assert_eq!(c.banner().await.unwrap().error_code, ErrorCode::DuplicateVideo);
    }

    #[tokio::test]
    async fn fetch_info_rejects_invalid_url() {
        let h = harness(FakeJobApi::new(), vec![]);
        let err = h.controller.fetch_info("not a url").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn summary_requires_transcript() {
        let h = harness(FakeJobApi::new(), vec![entry()]);
        let c = &h.controller;

        let err = c.generate_summary(VID).await.unwrap_err();
        assert_eq!(err.to_string(), "Please generate transcript first");
        assert_eq!(calls(&c.api().summary_calls), 0);

        let transcript = c.generate_transcript(URL).await.unwrap();
        assert_eq!(transcript, "hello world");
        assert!(c.find_entry(VID).await.unwrap().has_transcript);

        let summary = c.generate_summary(VID).await.unwrap();
        assert_eq!(summary, "a short summary");
        let stored = c.find_entry(VID).await.unwrap();
        assert!(stored.has_summary);
        assert_eq!(stored.summary.as_deref(), Some("a short summary"));
    }

    #[tokio::test]
    async fn sentiment_fills_missing_video_id() {
        let h = harness(FakeJobApi::new(), vec![entry()]);
        let c = &h.controller;

        let data = c.analyze_sentiment(URL).await.unwrap();
        assert_eq!(data.video_id, VID);

        let stored = c.find_entry(VID).await.unwrap();
        assert!(stored.has_analysis);
        assert_eq!(stored.sentiment_data.unwrap().video_id, VID);
    }

    #[tokio::test]
    async fn remove_history_by_index() {
        let entries = vec![
            VideoEntry::new("aaaaaa", "https://youtu.be/aaaaaa", "A"),
            VideoEntry::new("bbbbbb", "https://youtu.be/bbbbbb", "B"),
            VideoEntry::new("cccccc", "https://youtu.be/cccccc", "C"),
        ];
        let h = harness(FakeJobApi::new(), entries);
        let c = &h.controller;

        assert_eq!(c.remove_history(1).await.unwrap().video_id, "bbbbbb");
        let ids: Vec<_> = c.history().await.into_iter().map(|e| e.video_id).collect();
        assert_eq!(ids, vec!["aaaaaa", "cccccc"]);

        assert!(c.remove_history(5).await.is_err());
    }

    #[test]
    fn artifact_names_are_sanitized() {
        assert_eq!(artifact_file_name("a/b: c", None), "ab c.mp4");
        assert_eq!(artifact_file_name("", None), "video.mp4");
        assert_eq!(artifact_file_name("T", Some("clip.webm")), "clip.webm");
    }

    #[tokio::test]
    async fn unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("v (1).mp4"), b"x").unwrap();

        let path = unique_path(dir.path(), "v.mp4").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "v (2).mp4");
    }
}
